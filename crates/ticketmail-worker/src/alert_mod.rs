use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ticketmail_content::{TemplateVars, apply_template};
use ticketmail_mail::{MailTransport, OutboundAccount, OutgoingMail};

use crate::settings_mod::Settings;

/// A failure worth an operator email: the failing worker kind
/// (`receiver`, `sender`) and the email id when one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Alert {
    pub(crate) kind: String,
    pub(crate) id: Option<String>,
}

impl Alert {
    pub(crate) fn new(kind: &str, id: Option<i64>) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.map(|id| id.to_string()),
        }
    }

    pub(crate) fn message(&self) -> String {
        match &self.id {
            Some(id) => format!("There was an error for email {}. ID: {}", self.kind, id),
            None => format!("There was an error for email {}", self.kind),
        }
    }
}

/// Raising an alert never blocks or fails the caller.
#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Runs `ticketmail alert <kind> [id]` as a detached child process.
pub(crate) struct ProcessAlertSink {
    config: Option<String>,
}

impl ProcessAlertSink {
    pub(crate) fn new(config: Option<&str>) -> Self {
        Self {
            config: config.map(str::to_string),
        }
    }

    fn args(&self, alert: &Alert) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.clone());
        }
        args.push("alert".to_string());
        args.push(alert.kind.clone());
        if let Some(id) = &alert.id {
            args.push(id.clone());
        }
        args
    }
}

#[async_trait]
impl AlertSink for ProcessAlertSink {
    async fn raise(&self, alert: Alert) {
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(err) => {
                tracing::error!(kind = %alert.kind, error = %err, "cannot locate alert executable");
                return;
            }
        };
        match tokio::process::Command::new(exe)
            .args(self.args(&alert))
            .stdin(std::process::Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                tracing::info!(kind = %alert.kind, id = ?alert.id, "alert process started");
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(err) => {
                tracing::error!(kind = %alert.kind, error = %err, "failed to start alert process");
            }
        }
    }
}

/// The template file when it exists and can be read.
pub(crate) fn read_template(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(template) => Some(template),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "email template unreadable");
            None
        }
    }
}

pub(crate) fn build_alert_mail(
    settings: &Settings,
    account: &OutboundAccount,
    alert: &Alert,
    template: Option<&str>,
) -> OutgoingMail {
    let message = alert.message();
    let html = match template {
        Some(template) => apply_template(
            template,
            &TemplateVars {
                ticket_url: &settings.template.ticket_url,
                domain_name: &settings.template.domain_name,
                email_content: &message,
            },
        ),
        None => html_escape::encode_text(&message).into_owned(),
    };
    OutgoingMail {
        from: account.from_address().to_string(),
        sender: Some(account.username.clone()),
        to: settings.alert.recipients.clone(),
        subject: format!(
            "{} {}",
            settings.alert.subject_prefix, settings.template.domain_name
        )
        .trim()
        .to_string(),
        html,
        ..OutgoingMail::default()
    }
}

/// Sends one alert. Every failure is logged and swallowed.
pub(crate) async fn run_alert(
    settings: &Settings,
    account: &OutboundAccount,
    transport: &dyn MailTransport,
    alert: &Alert,
) {
    if settings.alert.recipients.is_empty() {
        tracing::warn!(from = "sender-alert", "no alert recipients configured");
        return;
    }
    if let Err(err) = transport.verify().await {
        tracing::error!(from = "sender-alert", error = %format!("{:#}", err), "could not connect to SMTP server");
        return;
    }
    let template = read_template(&settings.template.path);
    let mail = build_alert_mail(settings, account, alert, template.as_deref());
    match transport.send(&mail).await {
        Ok(()) => tracing::info!(
            from = "sender-alert",
            to = %mail.to.join(","),
            "alert email sent"
        ),
        Err(err) => tracing::error!(
            from = "sender-alert",
            error = %format!("{:#}", err),
            "alert email could not be sent"
        ),
    }
}

/// Entry of the `alert` command.
pub(crate) async fn alert(settings: &Settings, alert: &Alert) -> Result<()> {
    let store = crate::open_store(settings).await?;
    let account = crate::roles_mod::outbound_account(&store, ticketmail_core::role::EMAIL_NOTIFICATION)
        .await
        .context("alert account")?;
    let transport = ticketmail_mail::SmtpMailer::new(&account)?;
    run_alert(settings, &account, &transport, alert).await;
    Ok(())
}
