use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use ticketmail_content::{TemplateVars, apply_template, nl2br, render_quoted_thread, split_addresses};
use ticketmail_core::{EmailStatus, QueuedEmail, Store, now_timestamp, role};
use ticketmail_mail::{
    HttpNotifier, MailTransport, Notifier, OutboundAccount, OutgoingAttachment, OutgoingMail,
    SmtpMailer,
};

use crate::alert_mod::{Alert, AlertSink, ProcessAlertSink, read_template};
use crate::roles_mod::{WorkerError, outbound_account};
use crate::settings_mod::Settings;

/// Which account a pass delivers for and how bodies are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Profile {
    /// Agent replies and autoreplies; agent replies quote the thread.
    Reply,
    /// System notifications, optionally wrapped in the HTML template.
    Notification,
}

impl Profile {
    fn role(self) -> &'static str {
        match self {
            Profile::Reply => role::EMAIL_OUTBOUND,
            Profile::Notification => role::EMAIL_NOTIFICATION,
        }
    }

    fn log_name(self) -> &'static str {
        match self {
            Profile::Reply => "sender",
            Profile::Notification => "sender-notification",
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DispatchReport {
    pub(crate) sent: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
}

async fn reply_body(store: &Store, row: &QueuedEmail) -> String {
    let own = row.email.content_html.as_deref().unwrap_or("");
    let quoted = match (row.email.user_id, row.ticket_id) {
        (Some(_), Some(ticket_id)) => {
            render_quoted_thread(&store.thread_emails(ticket_id).await).html
        }
        _ => String::new(),
    };
    nl2br(&format!("{}{}", own, quoted))
}

fn notification_body(settings: &Settings, row: &QueuedEmail, template: Option<&str>) -> String {
    let content = nl2br(row.email.content_html.as_deref().unwrap_or(""));
    match template {
        Some(template) => apply_template(
            template,
            &TemplateVars {
                ticket_url: &settings.template.ticket_url,
                domain_name: &settings.template.domain_name,
                email_content: &content,
            },
        ),
        None => content,
    }
}

/// Stored attachments of an email. Files missing on disk are skipped.
async fn load_attachments(store: &Store, email_id: i64, from: &'static str) -> Vec<OutgoingAttachment> {
    let mut attachments = Vec::new();
    for row in store.attachments_for_email(email_id).await {
        let path = Path::new(&row.path).join(&row.file_name);
        match tokio::fs::read(&path).await {
            Ok(data) => attachments.push(OutgoingAttachment {
                mime: row.mime_type.clone().unwrap_or_else(|| {
                    mime_guess::from_path(&path)
                        .first_or_octet_stream()
                        .to_string()
                }),
                filename: row.file_name,
                data,
            }),
            Err(err) => tracing::warn!(
                from,
                email_id,
                path = %path.display(),
                error = %err,
                "attachment not readable, sending without it"
            ),
        }
    }
    attachments
}

/// One delivery pass over the account's outbound rows of today in `status`.
///
/// Rows are claimed one at a time and handled strictly in order. A failed
/// send marks the row `error` and raises an alert without stopping the pass.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_dispatch(
    store: &Store,
    settings: &Settings,
    profile: Profile,
    status: EmailStatus,
    account: &OutboundAccount,
    transport: &dyn MailTransport,
    notifier: &dyn Notifier,
    alerts: &dyn AlertSink,
) -> Result<DispatchReport> {
    let from = profile.log_name();
    transport
        .verify()
        .await
        .map_err(|err| WorkerError::Transport(format!("{:#}", err)))?;

    let template = match profile {
        Profile::Notification if settings.template.enabled => read_template(&settings.template.path),
        _ => None,
    };

    let rows = store
        .queued_outbound(&account.username, status, Local::now().date_naive())
        .await;
    tracing::info!(from, status = status.name(), total = rows.len(), "outbound rows selected");

    let mut report = DispatchReport::default();
    for row in rows {
        let email_id = row.email.id;
        if store.claim_email(email_id, status).await == 0 {
            tracing::error!(from, email_id, "email already claimed by another pass");
            report.skipped += 1;
            continue;
        }

        let html = match profile {
            Profile::Reply => reply_body(store, &row).await,
            Profile::Notification => notification_body(settings, &row, template.as_deref()),
        };
        let mail = OutgoingMail {
            from: account.from_address().to_string(),
            sender: Some(account.username.clone()),
            to: split_addresses(row.email.email_to.as_deref()),
            cc: split_addresses(row.email.email_cc.as_deref()),
            bcc: split_addresses(row.email.email_bcc.as_deref()),
            subject: row.email.subject.clone().unwrap_or_default(),
            html,
            attachments: load_attachments(store, email_id, from).await,
        };

        match transport.send(&mail).await {
            Ok(()) => {
                if store.mark_email_sent(email_id, &now_timestamp()).await == 0 {
                    tracing::error!(from, email_id, "email sent but status not updated to sent");
                } else {
                    tracing::info!(from, email_id, to = %mail.recipients().join(","), "email successfully sent");
                }
                report.sent += 1;
                notifier.ping(&settings.notify.path).await;
            }
            Err(err) => {
                let message = format!("{:#}", err);
                if store.mark_email_error(email_id, &message).await == 0 {
                    tracing::error!(from, email_id, error = %message, "email failed and status not updated to error");
                } else {
                    tracing::error!(from, email_id, error = %message, "email failed to send");
                }
                report.failed += 1;
                alerts.raise(Alert::new("sender", Some(email_id))).await;
            }
        }
    }
    Ok(report)
}

/// Entry of the `send` and `notify` commands.
pub(crate) async fn dispatch(
    settings: &Settings,
    config: Option<&str>,
    profile: Profile,
    status: &str,
) -> Result<()> {
    let status = EmailStatus::from_name(status).unwrap_or_else(|| {
        tracing::warn!(from = profile.log_name(), status, "unknown status, using queued");
        EmailStatus::Queued
    });
    let store = crate::open_store(settings).await?;
    let account = outbound_account(&store, profile.role()).await?;
    let transport = SmtpMailer::new(&account)
        .with_context(|| format!("transport for {}:{}", account.host, account.port))?;
    let notifier = HttpNotifier::new(&settings.notify.url, &settings.notify.key)?;
    let alerts = ProcessAlertSink::new(config);

    let report = run_dispatch(
        &store, settings, profile, status, &account, &transport, &notifier, &alerts,
    )
    .await?;
    tracing::info!(
        from = profile.log_name(),
        sent = report.sent,
        failed = report.failed,
        skipped = report.skipped,
        "dispatch pass finished"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use ticketmail_mail::{MailTransport, OutgoingMail};

    /// Records delivered mail; subjects listed in `fail_subjects` fail.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub(crate) fail_subjects: Vec<String>,
        pub(crate) refuse_verify: bool,
        pub(crate) sent: Mutex<Vec<OutgoingMail>>,
    }

    impl FakeTransport {
        pub(crate) fn failing_on(subjects: &[&str]) -> Self {
            Self {
                fail_subjects: subjects.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub(crate) fn sent(&self) -> Vec<OutgoingMail> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl MailTransport for FakeTransport {
        async fn verify(&self) -> Result<()> {
            if self.refuse_verify {
                return Err(anyhow!("connection refused"));
            }
            Ok(())
        }

        async fn send(&self, mail: &OutgoingMail) -> Result<()> {
            if self.fail_subjects.contains(&mail.subject) {
                return Err(anyhow!("550 mailbox unavailable"));
            }
            self.sent
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .push(mail.clone());
            Ok(())
        }
    }
}
