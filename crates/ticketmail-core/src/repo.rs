use chrono::NaiveDate;

use crate::query::{Conditions, Record, Statement, Value};
use crate::store::Store;
use crate::{
    AUTOREPLY_FULL_DAY, AUTOREPLY_OFFICE_HOURS, AUTOREPLY_SPECIAL_DAY, CONTACT_TYPE_EMAIL,
    ConfigRow, CustomerContact, Direction, Email, EmailStatus, MEDIA_EMAIL, MediaAttachment,
    MediaAutoReply, OfficeHour, QueuedEmail, TICKET_STATUS_CLOSED, Ticket,
};

#[derive(Debug, Clone, Default)]
pub struct NewEmail {
    pub uid: Option<String>,
    pub email_date: String,
    pub email_from: String,
    pub email_to: String,
    pub email_cc: String,
    pub email_bcc: String,
    pub subject: String,
    pub content: String,
    pub content_html: String,
    pub email_status_id: i64,
    pub direction_id: i64,
    pub contact_name: String,
    pub customer_id: i64,
    pub user_id: i64,
    pub is_complete: bool,
    pub is_autoreply: bool,
}

impl NewEmail {
    fn record(&self) -> Record {
        Record::new()
            .set("uid", self.uid.clone())
            .set("email_date", &self.email_date)
            .set("email_from", &self.email_from)
            .set("email_to", &self.email_to)
            .set("email_cc", &self.email_cc)
            .set("email_bcc", &self.email_bcc)
            .set("subject", &self.subject)
            .set("content", &self.content)
            .set("content_html", &self.content_html)
            .set("email_status_id", self.email_status_id)
            .set("direction_id", self.direction_id)
            .set("contact_name", &self.contact_name)
            .set("customer_id", self.customer_id)
            .set("user_id", self.user_id)
            .set("is_complete", self.is_complete)
            .set("is_autoreply", self.is_autoreply)
    }
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub customer_id: i64,
    pub contact: String,
    pub new_date: String,
}

#[derive(Debug, Clone)]
pub struct NewTicketMedia {
    pub ticket_id: i64,
    pub direction: Direction,
    pub record_id: i64,
    pub is_ticket_source: bool,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub ref_id: i64,
    pub path: String,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
}

impl Store {
    pub async fn config_by_code(&self, code: &str) -> Option<ConfigRow> {
        self.first("configs", Conditions::new().with("code", code))
            .await
    }

    /// Active blacklisted addresses for the email channel.
    pub async fn blacklist_contacts(&self) -> Vec<String> {
        let rows: Vec<crate::BlacklistContact> = self
            .get(
                "blacklist_contacts",
                &Conditions::new()
                    .with("media_id", MEDIA_EMAIL)
                    .with("is_active", 1),
            )
            .await;
        rows.into_iter().map(|row| row.contact).collect()
    }

    pub async fn latest_customer_contact(&self, contact: &str) -> Option<CustomerContact> {
        self.first(
            "customer_contacts",
            Conditions::new()
                .with("contact", contact)
                .order_by("id")
                .sort("DESC"),
        )
        .await
    }

    pub async fn insert_customer(&self, fullname: &str, random_id: &str) -> i64 {
        self.insert(
            "customers",
            &Record::new()
                .set("fullname", fullname)
                .set("random_id", random_id),
        )
        .await
    }

    pub async fn insert_customer_contact(&self, customer_id: i64, contact: &str) -> i64 {
        self.insert(
            "customer_contacts",
            &Record::new()
                .set("customer_id", customer_id)
                .set("customer_contact_type_id", CONTACT_TYPE_EMAIL)
                .set("contact", contact),
        )
        .await
    }

    pub async fn insert_email(&self, email: &NewEmail) -> i64 {
        self.insert("emails", &email.record()).await
    }

    pub async fn email_by_id(&self, id: i64) -> Option<Email> {
        self.first("emails", Conditions::new().with("id", id)).await
    }

    pub async fn ticket_by_id(&self, id: i64) -> Option<Ticket> {
        self.first("tickets", Conditions::new().with("id", id)).await
    }

    /// Latest root ticket for the contact that is not closed.
    pub async fn open_root_ticket(&self, contact: &str) -> Option<Ticket> {
        self.first(
            "tickets",
            Conditions::new()
                .with("contact", contact)
                .with("parent_id", Value::Null)
                .raw_with(
                    "ticket_status_id != ?",
                    vec![Value::Int(TICKET_STATUS_CLOSED)],
                )
                .order_by("id")
                .sort("DESC"),
        )
        .await
    }

    pub async fn insert_ticket(&self, ticket: &NewTicket) -> i64 {
        self.insert(
            "tickets",
            &Record::new()
                .set("ticket_status_id", crate::TICKET_STATUS_NEW)
                .set("media_id", MEDIA_EMAIL)
                .set("new_date", &ticket.new_date)
                .set("subject", &ticket.subject)
                .set("customer_id", ticket.customer_id)
                .set("contact", &ticket.contact)
                .set("is_from_customer", 1)
                .set("is_active", 1),
        )
        .await
    }

    pub async fn mark_ticket_replied(&self, ticket_id: i64, subject: &str) -> u64 {
        self.update(
            "tickets",
            &Record::new()
                .set("is_reply_customer", 1)
                .set("subject", subject),
            &Conditions::new().with("id", ticket_id),
        )
        .await
    }

    pub async fn insert_ticket_history(&self, ticket_id: i64, status: i64, note: &str) -> i64 {
        self.insert(
            "ticket_histories",
            &Record::new()
                .set("ticket_id", ticket_id)
                .set("ticket_status_id", status)
                .set("note", note),
        )
        .await
    }

    pub async fn insert_ticket_media(&self, media: &NewTicketMedia) -> i64 {
        let mut record = Record::new()
            .set("ticket_id", media.ticket_id)
            .set("media_id", MEDIA_EMAIL)
            .set("direction_id", media.direction.code())
            .set("record_id", media.record_id);
        if media.is_ticket_source {
            record = record.set("is_ticket_source", 1);
        }
        self.insert("ticket_medias", &record).await
    }

    pub async fn insert_attachments(&self, attachments: &[NewAttachment]) -> Vec<i64> {
        let records: Vec<Record> = attachments
            .iter()
            .map(|item| {
                Record::new()
                    .set("media_id", MEDIA_EMAIL)
                    .set("ref_id", item.ref_id)
                    .set("path", &item.path)
                    .set("file_name", &item.file_name)
                    .set("file_size", item.file_size)
                    .set("mime_type", &item.mime_type)
            })
            .collect();
        self.insert_many("media_attachments", &records).await
    }

    pub async fn attachments_for_email(&self, email_id: i64) -> Vec<MediaAttachment> {
        self.get(
            "media_attachments",
            &Conditions::new()
                .with("media_id", MEDIA_EMAIL)
                .with("ref_id", email_id)
                .order_by("id"),
        )
        .await
    }

    /// `weekday` is ISO numbered, Monday = 1.
    pub async fn office_hour(&self, weekday: u32) -> Option<OfficeHour> {
        self.first("office_hours", Conditions::new().with("id", weekday))
            .await
    }

    /// Active email autoreplies. Special-day rows only qualify when `today`
    /// is one of the comma-separated dates in `event_date`.
    pub async fn autoreply_candidates(&self, today: NaiveDate) -> Vec<MediaAutoReply> {
        self.get(
            "media_autoreplies",
            &Conditions::new()
                .with("media_id", MEDIA_EMAIL)
                .with("is_active", 1)
                .with(
                    "autoreply_type_id",
                    vec![
                        AUTOREPLY_OFFICE_HOURS,
                        AUTOREPLY_FULL_DAY,
                        AUTOREPLY_SPECIAL_DAY,
                    ],
                )
                .raw_with(
                    "(autoreply_type_id != ? OR (',' || REPLACE(event_date, ' ', '') || ',') LIKE ?)",
                    vec![
                        Value::Int(AUTOREPLY_SPECIAL_DAY),
                        Value::Text(format!("%,{},%", today.format("%Y-%m-%d"))),
                    ],
                )
                .order_by("id")
                .sort("DESC"),
        )
        .await
    }

    /// Complete outbound rows of `sender` dated `today` in `status`, each
    /// with the ticket it is linked to.
    pub async fn queued_outbound(
        &self,
        sender: &str,
        status: EmailStatus,
        today: NaiveDate,
    ) -> Vec<QueuedEmail> {
        let statement = Statement::new(
            "SELECT emails.*, MIN(ticket_medias.ticket_id) AS ticket_id FROM emails \
             LEFT JOIN ticket_medias ON ticket_medias.record_id = emails.id \
             AND ticket_medias.media_id = ? \
             WHERE DATE(emails.email_date) = ? \
             AND emails.is_complete = 1 \
             AND emails.direction_id = ? \
             AND emails.email_status_id = ? \
             AND emails.email_from = ? \
             GROUP BY emails.id ORDER BY emails.id",
            vec![
                Value::Int(MEDIA_EMAIL),
                Value::Text(today.format("%Y-%m-%d").to_string()),
                Value::Int(Direction::Outbound.code()),
                Value::Int(status.code()),
                Value::Text(sender.to_string()),
            ],
        );
        self.fetch_statement(&statement).await
    }

    /// Moves the row to `process` only while it is still in `from`.
    /// Zero means someone else got there first.
    pub async fn claim_email(&self, id: i64, from: EmailStatus) -> u64 {
        self.update(
            "emails",
            &Record::new().set("email_status_id", EmailStatus::Process.code()),
            &Conditions::new()
                .with("id", id)
                .with("email_status_id", from.code()),
        )
        .await
    }

    pub async fn mark_email_sent(&self, id: i64, sent_at: &str) -> u64 {
        self.update(
            "emails",
            &Record::new()
                .set("email_status_id", EmailStatus::Sent.code())
                .set("email_sent_date", sent_at),
            &Conditions::new()
                .with("id", id)
                .with("email_status_id", EmailStatus::Process.code()),
        )
        .await
    }

    pub async fn mark_email_error(&self, id: i64, error_info: &str) -> u64 {
        let error_info = if error_info.trim().is_empty() {
            "unknown error"
        } else {
            error_info
        };
        self.update(
            "emails",
            &Record::new()
                .set("email_status_id", EmailStatus::Error.code())
                .set("error_info", error_info),
            &Conditions::new()
                .with("id", id)
                .with("email_status_id", EmailStatus::Process.code()),
        )
        .await
    }

    /// Customer and agent emails of a ticket, newest first.
    pub async fn thread_emails(&self, ticket_id: i64) -> Vec<Email> {
        let statement = Statement::new(
            "SELECT emails.* FROM emails \
             JOIN ticket_medias ON ticket_medias.record_id = emails.id \
             AND ticket_medias.media_id = ? \
             WHERE ticket_medias.ticket_id = ? \
             AND ((emails.direction_id = ? AND emails.customer_id IS NOT NULL) \
             OR (emails.direction_id = ? AND emails.user_id IS NOT NULL)) \
             ORDER BY emails.id DESC",
            vec![
                Value::Int(MEDIA_EMAIL),
                Value::Int(ticket_id),
                Value::Int(Direction::Inbound.code()),
                Value::Int(Direction::Outbound.code()),
            ],
        );
        self.fetch_statement(&statement).await
    }
}
