use serde::Deserialize;
use thiserror::Error;
use ticketmail_core::{Store, role};
use ticketmail_mail::{InboundAccount, OutboundAccount};

#[derive(Debug, Error)]
pub(crate) enum WorkerError {
    #[error("{0} config not found")]
    MissingConfig(&'static str),
    #[error("{role} config attribute not valid: {reason}")]
    InvalidConfig { role: &'static str, reason: String },
    #[error("EMAIL_INBOUND is not selected as active inbound. Current: {0}")]
    InactiveChannel(String),
    #[error("mail transport unavailable: {0}")]
    Transport(String),
    #[error("failed to save email")]
    SaveFailed,
    #[error("email sender {0} is on the blacklist")]
    Blacklisted(String),
}

#[derive(Debug, Default, Deserialize)]
struct AppAttributes {
    #[serde(default)]
    active_email_inbound: Option<String>,
}

async fn attributes(store: &Store, code: &'static str) -> Result<String, WorkerError> {
    let row = store
        .config_by_code(code)
        .await
        .ok_or(WorkerError::MissingConfig(code))?;
    if row.attributes.trim().is_empty() {
        return Err(WorkerError::InvalidConfig {
            role: code,
            reason: "empty attributes".to_string(),
        });
    }
    Ok(row.attributes)
}

/// Fails unless the APP config selects `EMAIL_INBOUND` as the active inbound.
pub(crate) async fn require_active_inbound(store: &Store) -> Result<(), WorkerError> {
    let raw = attributes(store, role::APP).await?;
    let app: AppAttributes =
        serde_json::from_str(&raw).map_err(|err| WorkerError::InvalidConfig {
            role: role::APP,
            reason: err.to_string(),
        })?;
    match app.active_email_inbound.as_deref() {
        Some(role::EMAIL_INBOUND) => Ok(()),
        other => Err(WorkerError::InactiveChannel(
            other.unwrap_or("none").to_string(),
        )),
    }
}

pub(crate) async fn inbound_account(store: &Store) -> Result<InboundAccount, WorkerError> {
    let raw = attributes(store, role::EMAIL_INBOUND).await?;
    InboundAccount::from_json(&raw).map_err(|err| WorkerError::InvalidConfig {
        role: role::EMAIL_INBOUND,
        reason: format!("{:#}", err),
    })
}

/// `code` is `EMAIL_OUTBOUND` or `EMAIL_NOTIFICATION`.
pub(crate) async fn outbound_account(
    store: &Store,
    code: &'static str,
) -> Result<OutboundAccount, WorkerError> {
    let raw = attributes(store, code).await?;
    OutboundAccount::from_json(&raw).map_err(|err| WorkerError::InvalidConfig {
        role: code,
        reason: format!("{:#}", err),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use ticketmail_core::{Record, Store};

    pub(crate) fn temp_path(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{}-{}-{}", prefix, std::process::id(), ts))
    }

    pub(crate) async fn fresh_store() -> anyhow::Result<Store> {
        let db_path = temp_path("ticketmail-worker").with_extension("db");
        let _ = std::fs::remove_file(&db_path);
        let store = Store::connect(
            db_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("invalid temp db path"))?,
            5,
        )
        .await?;
        store.init().await?;
        Ok(store)
    }

    pub(crate) async fn put_config(store: &Store, code: &str, attributes: &str) -> i64 {
        store
            .insert(
                "configs",
                &Record::new().set("code", code).set("attributes", attributes),
            )
            .await
    }
}
