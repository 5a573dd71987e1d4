use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Wakes consumers that watch the email tables. Delivery is best effort:
/// implementations log failures and never surface them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn ping(&self, path: &str);
}

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
    key: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str, key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn ping(&self, path: &str) {
        if self.base_url.is_empty() {
            tracing::debug!(path, "notification url not configured");
            return;
        }
        let url = self.endpoint(path);
        let result = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .header("App-Key", &self.key)
            .json(&serde_json::json!({}))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %url, "notification sent");
            }
            Ok(response) => {
                tracing::warn!(url = %url, status = %response.status(), "notification rejected");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "notification failed");
            }
        }
    }
}
