use chrono::{Datelike, NaiveDateTime, NaiveTime};
use ticketmail_core::{
    AUTOREPLY_FULL_DAY, AUTOREPLY_OFFICE_HOURS, AUTOREPLY_SPECIAL_DAY, Direction, EmailStatus,
    MediaAutoReply, NewEmail, NewTicketMedia, OfficeHour, Store, Ticket, format_timestamp,
};

const CUSTOMER_FULLNAME: &str = "[CUSTOMER_FULLNAME]";
const TICKET_NO: &str = "[TICKET_NO]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OfficePhase {
    InHours,
    AfterHours,
}

fn parse_clock(value: Option<&str>) -> Option<NaiveTime> {
    let value = value?.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// Inactive days and unparsable windows count as after hours.
pub(crate) fn office_phase(hours: Option<&OfficeHour>, now: NaiveDateTime) -> OfficePhase {
    let Some(hours) = hours.filter(|h| h.cc_is_active == 1) else {
        return OfficePhase::AfterHours;
    };
    match (
        parse_clock(hours.cc_start_time.as_deref()),
        parse_clock(hours.cc_end_time.as_deref()),
    ) {
        (Some(start), Some(end)) if now.time() >= start && now.time() <= end => {
            OfficePhase::InHours
        }
        _ => OfficePhase::AfterHours,
    }
}

fn newest_of_kind(candidates: &[MediaAutoReply], kind: i64) -> Option<&MediaAutoReply> {
    candidates
        .iter()
        .filter(|c| c.autoreply_type_id == kind)
        .max_by_key(|c| c.id)
}

/// Special day beats full day beats the office-hours rule.
pub(crate) fn select_content(
    candidates: &[MediaAutoReply],
    hours: Option<&OfficeHour>,
    now: NaiveDateTime,
) -> Option<String> {
    if let Some(rule) = newest_of_kind(candidates, AUTOREPLY_SPECIAL_DAY)
        .or_else(|| newest_of_kind(candidates, AUTOREPLY_FULL_DAY))
    {
        return Some(rule.content.clone());
    }
    let office = newest_of_kind(candidates, AUTOREPLY_OFFICE_HOURS)?;
    // Both phases share one rule until after-hours content is configurable.
    match office_phase(hours, now) {
        OfficePhase::InHours | OfficePhase::AfterHours => Some(office.content.clone()),
    }
}

pub(crate) fn fill_placeholders(content: &str, customer_name: &str, ticket_no: &str) -> String {
    content
        .replace(CUSTOMER_FULLNAME, customer_name)
        .replace(TICKET_NO, ticket_no)
}

/// The inbound email that opened the ticket.
#[derive(Debug, Clone)]
pub(crate) struct AutoReplySource<'a> {
    pub(crate) uid: Option<String>,
    pub(crate) email_from: &'a str,
    pub(crate) contact_name: Option<&'a str>,
    pub(crate) subject: &'a str,
    pub(crate) customer_id: i64,
}

/// Queues the autoreply for a freshly created ticket and links it to the
/// ticket. Returns the new email id, or `None` when no rule applies or the
/// row could not be written.
pub(crate) async fn queue_autoreply(
    store: &Store,
    sender: &str,
    source: &AutoReplySource<'_>,
    ticket: &Ticket,
    now: NaiveDateTime,
) -> Option<i64> {
    let candidates = store.autoreply_candidates(now.date()).await;
    let hours = store.office_hour(now.weekday().number_from_monday()).await;
    let Some(content) = select_content(&candidates, hours.as_ref(), now) else {
        tracing::info!(from = "receiver", ticket_id = ticket.id, "content autoreply not found");
        return None;
    };

    let contact_name = source
        .contact_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(source.email_from);
    let content = fill_placeholders(
        &content,
        contact_name,
        ticket.ticket_no.as_deref().unwrap_or(""),
    );

    let email_id = store
        .insert_email(&NewEmail {
            uid: source.uid.clone(),
            email_date: format_timestamp(now),
            email_from: sender.to_string(),
            email_to: source.email_from.to_string(),
            subject: format!("Auto Reply: {}", source.subject),
            content_html: content.clone(),
            content,
            email_status_id: EmailStatus::Queued.code(),
            direction_id: Direction::Outbound.code(),
            contact_name: contact_name.to_string(),
            customer_id: source.customer_id,
            is_complete: true,
            is_autoreply: true,
            ..NewEmail::default()
        })
        .await;
    if email_id == 0 {
        tracing::error!(from = "receiver", ticket_id = ticket.id, "failed to queue autoreply");
        return None;
    }
    tracing::info!(from = "receiver", email_id, "email autoreply inserted");

    let media_id = store
        .insert_ticket_media(&NewTicketMedia {
            ticket_id: ticket.id,
            direction: Direction::Outbound,
            record_id: email_id,
            is_ticket_source: false,
        })
        .await;
    if media_id == 0 {
        tracing::error!(
            from = "receiver",
            email_id,
            ticket_id = ticket.id,
            "autoreply queued without ticket link"
        );
    }
    Some(email_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles_mod::test_support::fresh_store;
    use chrono::NaiveDate;
    use ticketmail_core::{Conditions, MEDIA_EMAIL, Record, TicketMedia};

    fn at(hour: u32, minute: u32) -> anyhow::Result<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2025, 1, 14)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .ok_or_else(|| anyhow::anyhow!("bad time"))
    }

    fn rule(id: i64, kind: i64, content: &str) -> MediaAutoReply {
        MediaAutoReply {
            id,
            media_id: MEDIA_EMAIL,
            autoreply_type_id: kind,
            content: content.to_string(),
            event_date: None,
            is_active: 1,
        }
    }

    fn hours(active: i64) -> OfficeHour {
        OfficeHour {
            id: 2,
            cc_is_active: active,
            cc_start_time: Some("08:00:00".to_string()),
            cc_end_time: Some("17:00".to_string()),
        }
    }

    #[test]
    fn phase_follows_the_window() -> anyhow::Result<()> {
        assert_eq!(office_phase(Some(&hours(1)), at(9, 0)?), OfficePhase::InHours);
        assert_eq!(office_phase(Some(&hours(1)), at(17, 0)?), OfficePhase::InHours);
        assert_eq!(office_phase(Some(&hours(1)), at(18, 30)?), OfficePhase::AfterHours);
        assert_eq!(office_phase(Some(&hours(0)), at(9, 0)?), OfficePhase::AfterHours);
        assert_eq!(office_phase(None, at(9, 0)?), OfficePhase::AfterHours);
        Ok(())
    }

    #[test]
    fn special_day_beats_full_day_beats_office() -> anyhow::Result<()> {
        let now = at(10, 0)?;
        let office = rule(1, AUTOREPLY_OFFICE_HOURS, "office");
        let full = rule(2, AUTOREPLY_FULL_DAY, "full");
        let special = rule(3, AUTOREPLY_SPECIAL_DAY, "special");

        let all = vec![office.clone(), full.clone(), special];
        assert_eq!(select_content(&all, None, now).as_deref(), Some("special"));
        let no_special = vec![office.clone(), full];
        assert_eq!(select_content(&no_special, None, now).as_deref(), Some("full"));
        assert_eq!(select_content(&[], None, now), None);
        Ok(())
    }

    #[test]
    fn office_rule_applies_in_and_after_hours() -> anyhow::Result<()> {
        let rules = vec![rule(1, AUTOREPLY_OFFICE_HOURS, "office")];
        let inside = select_content(&rules, Some(&hours(1)), at(9, 0)?);
        let outside = select_content(&rules, Some(&hours(1)), at(22, 0)?);
        assert_eq!(inside.as_deref(), Some("office"));
        assert_eq!(inside, outside);
        Ok(())
    }

    #[test]
    fn placeholders_are_replaced_everywhere() {
        let filled = fill_placeholders(
            "Hi [CUSTOMER_FULLNAME], ticket [TICKET_NO] ([TICKET_NO])",
            "Alice",
            "20250114000001",
        );
        assert_eq!(filled, "Hi Alice, ticket 20250114000001 (20250114000001)");
    }

    #[tokio::test]
    async fn autoreply_is_queued_and_linked() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        store
            .insert(
                "media_autoreplies",
                &Record::new()
                    .set("media_id", MEDIA_EMAIL)
                    .set("autoreply_type_id", AUTOREPLY_FULL_DAY)
                    .set("content", "Dear [CUSTOMER_FULLNAME], we got [TICKET_NO]."),
            )
            .await;
        let ticket = Ticket {
            id: 4,
            ticket_no: Some("20250114000004".to_string()),
            parent_id: None,
            ticket_status_id: 1,
            media_id: MEDIA_EMAIL,
            new_date: None,
            subject: Some("Printer".to_string()),
            customer_id: Some(3),
            contact: Some("alice@example.com".to_string()),
            is_from_customer: 1,
            is_reply_customer: 0,
            is_active: 1,
        };
        let source = AutoReplySource {
            uid: Some("77".to_string()),
            email_from: "alice@example.com",
            contact_name: None,
            subject: "Printer",
            customer_id: 3,
        };

        let email_id = queue_autoreply(&store, "desk@example.com", &source, &ticket, at(10, 0)?)
            .await
            .ok_or_else(|| anyhow::anyhow!("no autoreply"))?;
        let email = store
            .email_by_id(email_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("missing email"))?;
        assert_eq!(email.email_from, "desk@example.com");
        assert_eq!(email.email_to.as_deref(), Some("alice@example.com"));
        assert_eq!(email.subject.as_deref(), Some("Auto Reply: Printer"));
        assert_eq!(
            email.content_html.as_deref(),
            Some("Dear alice@example.com, we got 20250114000004.")
        );
        assert_eq!(email.email_status_id, EmailStatus::Queued.code());
        assert_eq!(email.direction_id, Direction::Outbound.code());
        assert_eq!(email.is_autoreply, 1);
        assert_eq!(email.email_date.as_deref(), Some("2025-01-14 10:00:00"));

        let medias: Vec<TicketMedia> = store
            .get("ticket_medias", &Conditions::new().with("record_id", email_id))
            .await;
        assert_eq!(medias.len(), 1);
        assert_eq!(medias[0].ticket_id, 4);
        assert_eq!(medias[0].direction_id, Direction::Outbound.code());
        Ok(())
    }
}
