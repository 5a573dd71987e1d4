//! Mail protocol integration: IMAP intake, SMTP delivery and the HTTP
//! notification ping.

mod inbox;
mod notify;
mod smtp;

use std::fmt;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer};

pub use inbox::{ImapMailbox, Mailbox, MailboxCounts};
pub use notify::{HttpNotifier, Notifier};
pub use smtp::{MailTransport, OutgoingAttachment, OutgoingMail, SmtpMailer};

/// Credentials of the inbound account, decoded from the `EMAIL_INBOUND`
/// config attributes.
#[derive(Clone, Deserialize)]
pub struct InboundAccount {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_imap_port", deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default, deserialize_with = "loose_flag")]
    pub ssl: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, deserialize_with = "loose_flag")]
    pub autoreply: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub skip_tls_verify: bool,
}

/// Credentials of an outbound account (`EMAIL_OUTBOUND` or
/// `EMAIL_NOTIFICATION`).
#[derive(Clone, Deserialize)]
pub struct OutboundAccount {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port", deserialize_with = "loose_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub sender: String,
}

impl InboundAccount {
    pub fn from_json(attributes: &str) -> Result<Self> {
        let account: Self =
            serde_json::from_str(attributes).context("inbound account attributes")?;
        if account.host.trim().is_empty() {
            anyhow::bail!("inbound account has no host");
        }
        Ok(account)
    }
}

impl OutboundAccount {
    pub fn from_json(attributes: &str) -> Result<Self> {
        let account: Self =
            serde_json::from_str(attributes).context("outbound account attributes")?;
        if account.host.trim().is_empty() {
            anyhow::bail!("outbound account has no host");
        }
        Ok(account)
    }

    /// Address used in the From header; falls back to the login name.
    pub fn from_address(&self) -> &str {
        if self.sender.trim().is_empty() {
            &self.username
        } else {
            &self.sender
        }
    }
}

impl fmt::Debug for InboundAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundAccount")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl", &self.ssl)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("autoreply", &self.autoreply)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .finish()
    }
}

impl fmt::Debug for OutboundAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundAccount")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("sender", &self.sender)
            .finish()
    }
}

fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Flag(bool),
    Number(i64),
    Text(String),
}

fn loose_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Loose>::deserialize(deserializer)?;
    let port = match value {
        Some(Loose::Number(n)) => u16::try_from(n).ok(),
        Some(Loose::Text(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    port.filter(|p| *p > 0)
        .ok_or_else(|| serde::de::Error::custom("port must be a number between 1 and 65535"))
}

fn loose_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Loose>::deserialize(deserializer)? {
        Some(Loose::Flag(b)) => b,
        Some(Loose::Number(n)) => n == 1,
        Some(Loose::Text(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        None => false,
    })
}

/// IMAP SEARCH date, e.g. `14-Jan-2025`.
pub fn imap_date(date: NaiveDate) -> String {
    let month = match date.month() {
        1 => "Jan",
        2 => "Feb",
        3 => "Mar",
        4 => "Apr",
        5 => "May",
        6 => "Jun",
        7 => "Jul",
        8 => "Aug",
        9 => "Sep",
        10 => "Oct",
        11 => "Nov",
        _ => "Dec",
    };
    format!("{}-{}-{}", date.day(), month, date.year())
}
