use anyhow::{Context, Result};
use chrono::Local;
use ticketmail_content::{ParsedEmail, parse_message};
use ticketmail_core::{Direction, EmailStatus, NewEmail, Store, format_timestamp};
use ticketmail_mail::{HttpNotifier, ImapMailbox, InboundAccount, Mailbox, Notifier};

use crate::alert_mod::{Alert, AlertSink, ProcessAlertSink};
use crate::attachment_mod::save_attachments;
use crate::autoreply_mod::{AutoReplySource, queue_autoreply};
use crate::identity_mod::resolve_customer;
use crate::roles_mod::{WorkerError, inbound_account, require_active_inbound};
use crate::settings_mod::Settings;
use crate::thread_mod::{InboundRef, ThreadOutcome, thread_email};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ReceiveReport {
    pub(crate) stored: usize,
    pub(crate) blacklisted: usize,
    pub(crate) failed: usize,
}

fn inbound_row(uid: u32, parsed: &ParsedEmail, customer_id: i64) -> NewEmail {
    NewEmail {
        uid: Some(uid.to_string()),
        email_date: format_timestamp(parsed.date),
        email_from: parsed.from_address().to_string(),
        email_to: parsed.to.join(";"),
        email_cc: parsed.cc.join(";"),
        email_bcc: parsed.bcc.join(";"),
        subject: parsed.subject.clone(),
        content: parsed.content(),
        content_html: parsed.content_html(),
        email_status_id: EmailStatus::Unread.code(),
        direction_id: Direction::Inbound.code(),
        contact_name: parsed.from_name().unwrap_or("").to_string(),
        customer_id,
        is_complete: true,
        ..NewEmail::default()
    }
}

/// Processes one parsed message. Returns the stored email id, or the
/// reason the message must stay unseen.
async fn handle_message(
    store: &Store,
    settings: &Settings,
    account: &InboundAccount,
    notifier: &dyn Notifier,
    blacklist: &[String],
    uid: u32,
    parsed: &ParsedEmail,
) -> Result<i64, WorkerError> {
    let from = parsed.from_address();
    let blacklisted = blacklist.iter().any(|b| b.eq_ignore_ascii_case(from));
    let customer_id = if blacklisted {
        0
    } else {
        resolve_customer(store, from, parsed.from_name()).await
    };

    let email_id = store
        .insert_email(&inbound_row(uid, parsed, customer_id))
        .await;
    if email_id == 0 {
        return Err(WorkerError::SaveFailed);
    }
    tracing::info!(from = "receiver", email_id, uid, "new email inserted");

    if blacklisted {
        return Err(WorkerError::Blacklisted(from.to_string()));
    }

    let outcome = thread_email(
        store,
        &InboundRef {
            email_id,
            customer_id,
            contact: from,
            subject: &parsed.subject,
        },
    )
    .await;
    match &outcome {
        Some(threaded) => tracing::debug!(
            from = "receiver",
            email_id,
            ticket_id = threaded.ticket_id(),
            "email threaded"
        ),
        None => tracing::error!(from = "receiver", email_id, "email stored without ticket"),
    }

    if let Some(ThreadOutcome::Created { ticket }) = &outcome {
        if account.autoreply {
            let source = AutoReplySource {
                uid: Some(uid.to_string()),
                email_from: from,
                contact_name: parsed.from_name(),
                subject: &parsed.subject,
                customer_id,
            };
            queue_autoreply(
                store,
                &account.username,
                &source,
                ticket,
                Local::now().naive_local(),
            )
            .await;
        }
    }

    save_attachments(
        store,
        &settings.attachments.dir,
        Local::now().date_naive(),
        email_id,
        &parsed.attachments,
    )
    .await;

    notifier.ping(&settings.notify.path).await;
    Ok(email_id)
}

/// One pass over the unseen messages of the selected mailbox.
///
/// Each message is flagged seen as soon as its own handling is over. A
/// message whose row could not be saved stays unseen for the next pass and
/// raises an alert. Only handled messages count towards the fetch limit.
/// The mailbox is closed whatever the outcome.
pub(crate) async fn run_receive(
    store: &Store,
    settings: &Settings,
    account: &InboundAccount,
    mailbox: &mut dyn Mailbox,
    notifier: &dyn Notifier,
    alerts: &dyn AlertSink,
) -> Result<ReceiveReport> {
    let outcome = receive_unseen(store, settings, account, mailbox, notifier, alerts).await;
    if let Err(err) = mailbox.close().await {
        tracing::warn!(from = "receiver", error = %format!("{:#}", err), "mailbox close failed");
    }
    outcome
}

async fn receive_unseen(
    store: &Store,
    settings: &Settings,
    account: &InboundAccount,
    mailbox: &mut dyn Mailbox,
    notifier: &dyn Notifier,
    alerts: &dyn AlertSink,
) -> Result<ReceiveReport> {
    let mut report = ReceiveReport::default();
    let blacklist = store.blacklist_contacts().await;
    let since = settings.inbound.since_date()?;
    let limit = settings.inbound.fetch_limit;

    let uids = mailbox.unseen_since(since).await?;
    let unseen = uids.len();
    for (position, uid) in uids.into_iter().enumerate() {
        if report.stored + report.blacklisted >= limit {
            tracing::info!(
                from = "receiver",
                unseen,
                limit,
                remaining = unseen - position,
                "fetch limit reached, remaining messages wait for the next pass"
            );
            break;
        }

        let raw = match mailbox.fetch_raw(uid).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!(from = "receiver", uid, error = %format!("{:#}", err), "fetch failed");
                report.failed += 1;
                continue;
            }
        };
        let parsed = match parse_message(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(from = "receiver", uid, error = %format!("{:#}", err), "unparsable message");
                report.failed += 1;
                continue;
            }
        };

        match handle_message(store, settings, account, notifier, &blacklist, uid, &parsed).await {
            Ok(_) => report.stored += 1,
            Err(WorkerError::Blacklisted(sender)) => {
                tracing::warn!(from = "receiver", uid, sender = %sender, "email sender on blacklist contact");
                report.blacklisted += 1;
            }
            Err(err) => {
                tracing::error!(from = "receiver", uid, error = %err, "message left unseen");
                report.failed += 1;
                if matches!(err, WorkerError::SaveFailed) {
                    alerts.raise(Alert::new("receiver", None)).await;
                }
                continue;
            }
        }

        if let Err(err) = mailbox.mark_seen(&[uid]).await {
            tracing::error!(from = "receiver", uid, error = %format!("{:#}", err), "failed to flag message seen");
        }
    }
    Ok(report)
}

/// Entry of the `receive` command.
pub(crate) async fn receive(settings: &Settings, config: Option<&str>) -> Result<()> {
    let store = crate::open_store(settings).await?;
    require_active_inbound(&store).await?;
    let account = inbound_account(&store).await?;
    let notifier = HttpNotifier::new(&settings.notify.url, &settings.notify.key)?;
    let alerts = ProcessAlertSink::new(config);

    let mut mailbox = ImapMailbox::connect(&account)
        .await
        .with_context(|| format!("connect to {}:{}", account.host, account.port))?;
    let report = run_receive(&store, settings, &account, &mut mailbox, &notifier, &alerts).await?;
    tracing::info!(
        from = "receiver",
        stored = report.stored,
        blacklisted = report.blacklisted,
        failed = report.failed,
        "receive pass finished"
    );
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingNotifier;
    use super::*;
    use crate::alert_mod::test_support::RecordingAlerts;
    use crate::roles_mod::test_support::{fresh_store, temp_path};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use ticketmail_core::{
        AUTOREPLY_FULL_DAY, Conditions, Customer, CustomerContact, Email, MEDIA_EMAIL, Record,
        Statement, Ticket, TicketHistory, TicketMedia,
    };
    use ticketmail_mail::MailboxCounts;

    #[derive(Default)]
    struct FakeMailbox {
        messages: Vec<(u32, Vec<u8>)>,
        seen: Vec<u32>,
        closed: bool,
        search_fails: bool,
    }

    impl FakeMailbox {
        fn with(messages: Vec<(u32, String)>) -> Self {
            Self {
                messages: messages
                    .into_iter()
                    .map(|(uid, raw)| (uid, raw.into_bytes()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Mailbox for FakeMailbox {
        async fn unseen_since(&mut self, _since: NaiveDate) -> Result<Vec<u32>> {
            if self.search_fails {
                anyhow::bail!("UID SEARCH rejected");
            }
            Ok(self
                .messages
                .iter()
                .map(|(uid, _)| *uid)
                .filter(|uid| !self.seen.contains(uid))
                .collect())
        }

        async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
            self.messages
                .iter()
                .find(|(id, _)| *id == uid)
                .map(|(_, raw)| raw.clone())
                .ok_or_else(|| anyhow::anyhow!("no message {}", uid))
        }

        async fn mark_seen(&mut self, uids: &[u32]) -> Result<()> {
            self.seen.extend_from_slice(uids);
            Ok(())
        }

        async fn counts(&mut self) -> Result<MailboxCounts> {
            Ok(MailboxCounts {
                total: self.messages.len() as u32,
                unread: (self.messages.len() - self.seen.len()) as u32,
            })
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn message(from: &str, subject: &str) -> String {
        format!(
            "From: {}\r\nTo: desk@example.com\r\nSubject: {}\r\n\
Date: Tue, 14 Jan 2025 09:30:00 +0000\r\n\r\nHello desk\r\n",
            from, subject
        )
    }

    fn message_with_attachment() -> String {
        "From: Alice <alice@example.com>\r\n\
To: desk@example.com\r\n\
Subject: Invoice\r\n\
Date: Tue, 14 Jan 2025 09:30:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached\r\n\
--b1\r\n\
Content-Type: text/plain; name=\"notes.txt\"\r\n\
Content-Disposition: attachment; filename=\"notes.txt\"\r\n\
\r\n\
line one\r\n\
--b1--\r\n"
            .to_string()
    }

    fn account(autoreply: bool) -> anyhow::Result<InboundAccount> {
        InboundAccount::from_json(&format!(
            r#"{{"host":"imap.example.com","username":"desk@example.com","autoreply":{}}}"#,
            autoreply
        ))
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.attachments.dir = temp_path("ticketmail-receive");
        settings
    }

    #[tokio::test]
    async fn pass_threads_stores_and_flags_messages() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        store
            .insert(
                "blacklist_contacts",
                &Record::new()
                    .set("media_id", MEDIA_EMAIL)
                    .set("contact", "spam@example.com")
                    .set("is_active", 1),
            )
            .await;
        store
            .insert(
                "media_autoreplies",
                &Record::new()
                    .set("media_id", MEDIA_EMAIL)
                    .set("autoreply_type_id", AUTOREPLY_FULL_DAY)
                    .set("content", "Thanks [CUSTOMER_FULLNAME]"),
            )
            .await;

        let settings = settings();
        let mut mailbox = FakeMailbox::with(vec![
            (1, message_with_attachment()),
            (2, message("Alice <alice@example.com>", "Re: Invoice")),
            (3, message("spam@example.com", "Buy now")),
            (4, "not a message".to_string()),
        ]);
        let notifier = RecordingNotifier::default();
        let alerts = RecordingAlerts::default();

        let report = run_receive(
            &store,
            &settings,
            &account(true)?,
            &mut mailbox,
            &notifier,
            &alerts,
        )
        .await?;
        assert_eq!(
            report,
            ReceiveReport {
                stored: 2,
                blacklisted: 1,
                failed: 1
            }
        );
        assert_eq!(mailbox.seen, vec![1, 2, 3]);
        assert!(mailbox.closed);
        assert_eq!(notifier.pings(), vec!["/email_notif", "/email_notif"]);
        assert!(alerts.taken().is_empty());

        let tickets: Vec<Ticket> = store.get("tickets", &Conditions::new()).await;
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].contact.as_deref(), Some("alice@example.com"));

        let customers: Vec<Customer> = store.get("customers", &Conditions::new()).await;
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].fullname, "Alice");
        let contacts: Vec<CustomerContact> =
            store.get("customer_contacts", &Conditions::new()).await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].contact, "alice@example.com");
        let histories: Vec<TicketHistory> =
            store.get("ticket_histories", &Conditions::new()).await;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].note.as_deref(), Some("Ticket Created by System"));
        let sources: Vec<TicketMedia> = store
            .get("ticket_medias", &Conditions::new().with("is_ticket_source", 1))
            .await;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].ticket_id, tickets[0].id);
        assert_eq!(sources[0].record_id, emails_first_id(&store).await?);

        let emails: Vec<Email> = store
            .get("emails", &Conditions::new().order_by("id"))
            .await;
        assert_eq!(emails.len(), 4);
        let autoreplies: Vec<&Email> = emails.iter().filter(|e| e.is_autoreply == 1).collect();
        assert_eq!(autoreplies.len(), 1);
        assert_eq!(autoreplies[0].content.as_deref(), Some("Thanks Alice"));
        let spam = emails
            .iter()
            .find(|e| e.email_from == "spam@example.com")
            .ok_or_else(|| anyhow::anyhow!("spam row missing"))?;
        assert_eq!(spam.customer_id, None);

        let first = &emails[0];
        assert_eq!(first.uid.as_deref(), Some("1"));
        assert_eq!(first.email_to.as_deref(), Some("desk@example.com"));
        let attachments = store.attachments_for_email(first.id).await;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].file_name, "notes.txt");

        let _ = std::fs::remove_dir_all(&settings.attachments.dir);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_limit_bounds_the_pass() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let mut settings = settings();
        settings.inbound.fetch_limit = 1;
        let mut mailbox = FakeMailbox::with(vec![
            (5, message("bob@example.com", "One")),
            (6, message("bob@example.com", "Two")),
        ]);
        let notifier = RecordingNotifier::default();
        let alerts = RecordingAlerts::default();

        let report = run_receive(
            &store,
            &settings,
            &account(false)?,
            &mut mailbox,
            &notifier,
            &alerts,
        )
        .await?;
        assert_eq!(report.stored, 1);
        assert_eq!(mailbox.seen, vec![5]);

        let emails: Vec<Email> = store.get("emails", &Conditions::new()).await;
        assert!(emails.iter().all(|e| e.is_autoreply == 0));
        Ok(())
    }

    async fn emails_first_id(store: &Store) -> anyhow::Result<i64> {
        let emails: Vec<Email> = store
            .get("emails", &Conditions::new().order_by("id").limit(1))
            .await;
        emails
            .first()
            .map(|e| e.id)
            .ok_or_else(|| anyhow::anyhow!("no email stored"))
    }

    #[tokio::test]
    async fn new_contact_pass_writes_one_row_of_each_kind() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let mut mailbox = FakeMailbox::with(vec![(3, message("Erin <erin@example.com>", "Login"))]);
        let notifier = RecordingNotifier::default();
        let alerts = RecordingAlerts::default();

        let report = run_receive(
            &store,
            &settings(),
            &account(false)?,
            &mut mailbox,
            &notifier,
            &alerts,
        )
        .await?;
        assert_eq!(report.stored, 1);
        assert_eq!(notifier.pings().len(), 1);

        let customers: Vec<Customer> = store.get("customers", &Conditions::new()).await;
        let contacts: Vec<CustomerContact> =
            store.get("customer_contacts", &Conditions::new()).await;
        let tickets: Vec<Ticket> = store.get("tickets", &Conditions::new()).await;
        let histories: Vec<TicketHistory> =
            store.get("ticket_histories", &Conditions::new()).await;
        let medias: Vec<TicketMedia> = store.get("ticket_medias", &Conditions::new()).await;
        assert_eq!(
            (customers.len(), contacts.len(), tickets.len(), histories.len(), medias.len()),
            (1, 1, 1, 1, 1)
        );
        assert_eq!(contacts[0].customer_id, customers[0].id);
        assert_eq!(tickets[0].customer_id, Some(customers[0].id));
        assert_eq!(medias[0].is_ticket_source, 1);
        assert_eq!(medias[0].record_id, emails_first_id(&store).await?);
        Ok(())
    }

    #[tokio::test]
    async fn unparsable_messages_do_not_use_up_the_fetch_limit() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let mut settings = settings();
        settings.inbound.fetch_limit = 1;
        let mut mailbox = FakeMailbox::with(vec![
            (1, "not a message".to_string()),
            (2, message("frank@example.com", "Still waiting")),
            (3, message("frank@example.com", "Next pass")),
        ]);
        let notifier = RecordingNotifier::default();
        let alerts = RecordingAlerts::default();

        let report = run_receive(
            &store,
            &settings,
            &account(false)?,
            &mut mailbox,
            &notifier,
            &alerts,
        )
        .await?;
        assert_eq!(
            report,
            ReceiveReport {
                stored: 1,
                blacklisted: 0,
                failed: 1
            }
        );
        assert_eq!(mailbox.seen, vec![2]);

        let emails: Vec<Email> = store.get("emails", &Conditions::new()).await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].subject.as_deref(), Some("Still waiting"));
        Ok(())
    }

    #[tokio::test]
    async fn failed_search_still_closes_the_mailbox() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let mut mailbox = FakeMailbox {
            search_fails: true,
            ..FakeMailbox::default()
        };
        let outcome = run_receive(
            &store,
            &settings(),
            &account(false)?,
            &mut mailbox,
            &RecordingNotifier::default(),
            &RecordingAlerts::default(),
        )
        .await;
        assert!(outcome.is_err());
        assert!(mailbox.closed);

        let mut settings = settings();
        settings.inbound.since = "not a date".to_string();
        let mut mailbox = FakeMailbox::default();
        let outcome = run_receive(
            &store,
            &settings,
            &account(false)?,
            &mut mailbox,
            &RecordingNotifier::default(),
            &RecordingAlerts::default(),
        )
        .await;
        assert!(outcome.is_err());
        assert!(mailbox.closed);
        Ok(())
    }

    #[tokio::test]
    async fn save_failure_leaves_message_unseen_and_alerts() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        store
            .execute(&Statement::new("DROP TABLE emails", Vec::new()))
            .await
            .ok_or_else(|| anyhow::anyhow!("drop failed"))?;
        let mut mailbox = FakeMailbox::with(vec![(9, message("carol@example.com", "Help"))]);
        let notifier = RecordingNotifier::default();
        let alerts = RecordingAlerts::default();

        let report = run_receive(
            &store,
            &settings(),
            &account(false)?,
            &mut mailbox,
            &notifier,
            &alerts,
        )
        .await?;
        assert_eq!(report.failed, 1);
        assert!(mailbox.seen.is_empty());
        assert!(notifier.pings().is_empty());
        assert_eq!(alerts.taken(), vec![Alert::new("receiver", None)]);
        Ok(())
    }
}
