mod query;
mod repo;
mod store;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub use query::{ClauseKind, Conditions, InsertMany, Record, Statement, Value};
pub use repo::{NewAttachment, NewEmail, NewTicket, NewTicketMedia};
pub use store::{Store, synthetic_ids};

pub mod build {
    pub use crate::query::{delete, insert, insert_many, select, update};
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const MEDIA_EMAIL: i64 = 2;
pub const CONTACT_TYPE_EMAIL: i64 = 2;
pub const TICKET_STATUS_NEW: i64 = 1;
pub const TICKET_STATUS_CLOSED: i64 = 6;

pub const AUTOREPLY_OFFICE_HOURS: i64 = 2;
pub const AUTOREPLY_FULL_DAY: i64 = 3;
pub const AUTOREPLY_SPECIAL_DAY: i64 = 4;

/// Role codes of the rows in the `configs` table.
pub mod role {
    pub const APP: &str = "APP";
    pub const EMAIL_INBOUND: &str = "EMAIL_INBOUND";
    pub const EMAIL_OUTBOUND: &str = "EMAIL_OUTBOUND";
    pub const EMAIL_NOTIFICATION: &str = "EMAIL_NOTIFICATION";
}

pub fn now_timestamp() -> String {
    format_timestamp(Local::now().naive_local())
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Unread,
    Read,
    Queued,
    Process,
    Sent,
    Error,
    BroadcastQueued,
    BroadcastProcess,
    BroadcastSent,
    BroadcastError,
}

impl EmailStatus {
    pub const ALL: [EmailStatus; 10] = [
        EmailStatus::Unread,
        EmailStatus::Read,
        EmailStatus::Queued,
        EmailStatus::Process,
        EmailStatus::Sent,
        EmailStatus::Error,
        EmailStatus::BroadcastQueued,
        EmailStatus::BroadcastProcess,
        EmailStatus::BroadcastSent,
        EmailStatus::BroadcastError,
    ];

    pub const fn code(self) -> i64 {
        match self {
            EmailStatus::Unread => 1,
            EmailStatus::Read => 2,
            EmailStatus::Queued => 3,
            EmailStatus::Process => 4,
            EmailStatus::Sent => 5,
            EmailStatus::Error => 6,
            EmailStatus::BroadcastQueued => 35,
            EmailStatus::BroadcastProcess => 36,
            EmailStatus::BroadcastSent => 37,
            EmailStatus::BroadcastError => 38,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            EmailStatus::Unread => "unread",
            EmailStatus::Read => "read",
            EmailStatus::Queued => "queued",
            EmailStatus::Process => "process",
            EmailStatus::Sent => "sent",
            EmailStatus::Error => "error",
            EmailStatus::BroadcastQueued => "broadcast_queued",
            EmailStatus::BroadcastProcess => "broadcast_process",
            EmailStatus::BroadcastSent => "broadcast_sent",
            EmailStatus::BroadcastError => "broadcast_error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(name))
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub const fn code(self) -> i64 {
        match self {
            Direction::Inbound => 1,
            Direction::Outbound => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConfigRow {
    pub id: i64,
    pub code: String,
    pub attributes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Customer {
    pub id: i64,
    pub fullname: String,
    pub random_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomerContact {
    pub id: i64,
    pub customer_id: i64,
    pub customer_contact_type_id: i64,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlacklistContact {
    pub id: i64,
    pub media_id: i64,
    pub contact: String,
    pub is_active: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ticket {
    pub id: i64,
    pub ticket_no: Option<String>,
    pub parent_id: Option<i64>,
    pub ticket_status_id: i64,
    pub media_id: i64,
    pub new_date: Option<String>,
    pub subject: Option<String>,
    pub customer_id: Option<i64>,
    pub contact: Option<String>,
    pub is_from_customer: i64,
    pub is_reply_customer: i64,
    pub is_active: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketHistory {
    pub id: i64,
    pub ticket_id: i64,
    pub ticket_status_id: i64,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TicketMedia {
    pub id: i64,
    pub ticket_id: i64,
    pub media_id: i64,
    pub direction_id: i64,
    pub record_id: i64,
    pub is_ticket_source: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Email {
    pub id: i64,
    pub uid: Option<String>,
    pub email_date: Option<String>,
    pub email_from: String,
    pub email_to: Option<String>,
    pub email_cc: Option<String>,
    pub email_bcc: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub content_html: Option<String>,
    pub email_status_id: i64,
    pub direction_id: i64,
    pub contact_name: Option<String>,
    pub customer_id: Option<i64>,
    pub user_id: Option<i64>,
    pub is_complete: i64,
    pub is_autoreply: i64,
    pub error_info: Option<String>,
    pub email_sent_date: Option<String>,
}

/// An outbound row joined with the ticket it is linked to, if any.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedEmail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub email: Email,
    pub ticket_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAttachment {
    pub id: i64,
    pub media_id: i64,
    pub ref_id: i64,
    pub path: String,
    pub file_name: String,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

/// Contact-centre hours for one ISO weekday (1 = Monday).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OfficeHour {
    pub id: i64,
    pub cc_is_active: i64,
    pub cc_start_time: Option<String>,
    pub cc_end_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAutoReply {
    pub id: i64,
    pub media_id: i64,
    pub autoreply_type_id: i64,
    pub content: String,
    pub event_date: Option<String>,
    pub is_active: i64,
}
