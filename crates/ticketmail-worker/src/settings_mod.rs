use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Settings {
    pub(crate) database: DatabaseSettings,
    pub(crate) inbound: InboundSettings,
    pub(crate) attachments: AttachmentSettings,
    pub(crate) notify: NotifySettings,
    pub(crate) template: TemplateSettings,
    pub(crate) alert: AlertSettings,
    pub(crate) schedule: ScheduleSettings,
    pub(crate) log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct DatabaseSettings {
    pub(crate) url: String,
    pub(crate) max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "ticketmail.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct InboundSettings {
    /// Oldest day searched for unseen messages, `YYYY-MM-DD`.
    pub(crate) since: String,
    pub(crate) fetch_limit: usize,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            since: "2025-01-14".to_string(),
            fetch_limit: 20,
        }
    }
}

impl InboundSettings {
    pub(crate) fn since_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.since.trim(), "%Y-%m-%d")
            .with_context(|| format!("inbound.since is not a date: {:?}", self.since))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct AttachmentSettings {
    pub(crate) dir: PathBuf,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("attachments"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct NotifySettings {
    pub(crate) url: String,
    pub(crate) key: String,
    pub(crate) path: String,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            path: "/email_notif".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct TemplateSettings {
    pub(crate) enabled: bool,
    pub(crate) path: PathBuf,
    pub(crate) ticket_url: String,
    pub(crate) domain_name: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("templates/email.html"),
            ticket_url: String::new(),
            domain_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct AlertSettings {
    pub(crate) recipients: Vec<String>,
    pub(crate) subject_prefix: String,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            subject_prefix: "[ALERT]".to_string(),
        }
    }
}

/// Intervals in seconds; 0 disables the task.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ScheduleSettings {
    pub(crate) receive_secs: u64,
    pub(crate) send_secs: u64,
    pub(crate) resend_secs: u64,
    pub(crate) notification_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            receive_secs: 60,
            send_secs: 120,
            resend_secs: 0,
            notification_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct LogSettings {
    pub(crate) json: bool,
}

impl Settings {
    pub(crate) fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid settings file")
    }

    /// Applies `TICKETMAIL_*` overrides read through `lookup`. Returns the
    /// overrides that were ignored so they can be logged once logging is up.
    pub(crate) fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("TICKETMAIL_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(url) = get("TICKETMAIL_NOTIFY_URL") {
            self.notify.url = url;
        }
        if let Some(key) = get("TICKETMAIL_NOTIFY_KEY") {
            self.notify.key = key;
        }
        if let Some(dir) = get("TICKETMAIL_ATTACHMENT_DIR") {
            self.attachments.dir = PathBuf::from(dir);
        }
        match get("TICKETMAIL_FETCH_LIMIT").map(|v| v.trim().parse::<usize>()) {
            Some(Ok(limit)) => self.inbound.fetch_limit = limit,
            Some(Err(_)) => {
                ignored.push("TICKETMAIL_FETCH_LIMIT is not a number, ignored".to_string())
            }
            None => {}
        }
        ignored
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url is empty");
        }
        if self.inbound.fetch_limit == 0 {
            bail!("inbound.fetch_limit must be at least 1");
        }
        self.inbound.since_date()?;
        Ok(())
    }
}

/// Loaded settings plus the warnings gathered before logging existed.
pub(crate) fn load_settings(explicit: Option<&str>) -> Result<(Settings, Vec<String>)> {
    let text = match explicit {
        Some(path) => Some(
            std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path))?,
        ),
        None => load_config_text(),
    };
    let mut settings = match text {
        Some(text) => Settings::parse(&text)?,
        None => Settings::default(),
    };
    let warnings = settings.apply_env(|key| std::env::var(key).ok());
    settings.validate()?;
    Ok((settings, warnings))
}

fn load_config_text() -> Option<String> {
    for path in config_path_candidates() {
        if let Ok(content) = std::fs::read_to_string(&path) {
            return Some(content);
        }
    }
    None
}

fn config_path_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("ticketmail.toml")];
    let xdg = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(dir) = xdg {
        paths.push(dir.join("ticketmail").join("ticketmail.toml"));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() -> anyhow::Result<()> {
        let settings = Settings::parse("")?;
        assert_eq!(settings.database.url, "ticketmail.db");
        assert_eq!(settings.inbound.fetch_limit, 20);
        assert_eq!(settings.notify.path, "/email_notif");
        assert_eq!(settings.schedule.receive_secs, 60);
        assert_eq!(settings.schedule.resend_secs, 0);
        settings.validate()?;
        Ok(())
    }

    #[test]
    fn sections_override_defaults() -> anyhow::Result<()> {
        let settings = Settings::parse(
            r#"
[inbound]
since = "2024-12-01"
fetch_limit = 5

[alert]
recipients = ["ops@example.com"]

[schedule]
resend_secs = 600

[log]
json = true
"#,
        )?;
        assert_eq!(
            settings.inbound.since_date()?,
            NaiveDate::from_ymd_opt(2024, 12, 1).ok_or_else(|| anyhow::anyhow!("date"))?
        );
        assert_eq!(settings.inbound.fetch_limit, 5);
        assert_eq!(settings.alert.recipients, vec!["ops@example.com"]);
        assert_eq!(settings.alert.subject_prefix, "[ALERT]");
        assert_eq!(settings.schedule.resend_secs, 600);
        assert_eq!(settings.schedule.send_secs, 120);
        assert!(settings.log.json);
        Ok(())
    }

    #[test]
    fn env_overrides_win_over_file() -> anyhow::Result<()> {
        let mut settings = Settings::parse("[database]\nurl = \"file.db\"\n")?;
        let ignored = settings.apply_env(|key| match key {
            "TICKETMAIL_DATABASE_URL" => Some("env.db".to_string()),
            "TICKETMAIL_FETCH_LIMIT" => Some("7".to_string()),
            "TICKETMAIL_NOTIFY_KEY" => Some("  ".to_string()),
            _ => None,
        });
        assert!(ignored.is_empty());
        assert_eq!(settings.database.url, "env.db");
        assert_eq!(settings.inbound.fetch_limit, 7);
        assert_eq!(settings.notify.key, "");
        Ok(())
    }

    #[test]
    fn bad_env_override_is_reported_not_applied() -> anyhow::Result<()> {
        let mut settings = Settings::parse("[inbound]\nfetch_limit = 4\n")?;
        let ignored = settings.apply_env(|key| {
            (key == "TICKETMAIL_FETCH_LIMIT").then(|| "lots".to_string())
        });
        assert_eq!(ignored, vec!["TICKETMAIL_FETCH_LIMIT is not a number, ignored"]);
        assert_eq!(settings.inbound.fetch_limit, 4);
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() -> anyhow::Result<()> {
        let settings = Settings::parse("[inbound]\nsince = \"yesterday\"\n")?;
        assert!(settings.validate().is_err());
        let settings = Settings::parse("[inbound]\nfetch_limit = 0\n")?;
        assert!(settings.validate().is_err());
        Ok(())
    }
}
