use ticketmail_core::{
    Direction, NewTicket, NewTicketMedia, Store, TICKET_STATUS_NEW, Ticket, now_timestamp,
};

const CREATED_NOTE: &str = "Ticket Created by System";

/// The stored inbound email being attached to a ticket thread.
#[derive(Debug, Clone)]
pub(crate) struct InboundRef<'a> {
    pub(crate) email_id: i64,
    pub(crate) customer_id: i64,
    pub(crate) contact: &'a str,
    pub(crate) subject: &'a str,
}

#[derive(Debug, Clone)]
pub(crate) enum ThreadOutcome {
    /// Joined the contact's open ticket.
    Linked { ticket_id: i64 },
    /// Opened a new ticket. Only this case may trigger an autoreply.
    Created { ticket: Ticket },
}

impl ThreadOutcome {
    pub(crate) fn ticket_id(&self) -> i64 {
        match self {
            ThreadOutcome::Linked { ticket_id } => *ticket_id,
            ThreadOutcome::Created { ticket } => ticket.id,
        }
    }
}

/// Links the email to the contact's latest open root ticket, or opens one.
///
/// The ticket, history and media rows are separate writes. A failure after
/// the ticket row exists is logged and the partial thread is kept.
pub(crate) async fn thread_email(store: &Store, email: &InboundRef<'_>) -> Option<ThreadOutcome> {
    if let Some(open) = store.open_root_ticket(email.contact).await {
        if store.mark_ticket_replied(open.id, email.subject).await == 0 {
            tracing::error!(
                from = "receiver",
                ticket_id = open.id,
                "failed to flag ticket as replied by customer"
            );
        }
        let media_id = store
            .insert_ticket_media(&NewTicketMedia {
                ticket_id: open.id,
                direction: Direction::Inbound,
                record_id: email.email_id,
                is_ticket_source: false,
            })
            .await;
        if media_id > 0 {
            tracing::info!(
                from = "receiver",
                email_id = email.email_id,
                ticket_id = open.id,
                "email linked with existing ticket"
            );
        } else {
            tracing::error!(
                from = "receiver",
                email_id = email.email_id,
                ticket_id = open.id,
                "failed to link email with existing ticket"
            );
        }
        return Some(ThreadOutcome::Linked { ticket_id: open.id });
    }

    let ticket_id = store
        .insert_ticket(&NewTicket {
            subject: email.subject.to_string(),
            customer_id: email.customer_id,
            contact: email.contact.to_string(),
            new_date: now_timestamp(),
        })
        .await;
    if ticket_id == 0 {
        tracing::error!(
            from = "receiver",
            email_id = email.email_id,
            "failed to create ticket"
        );
        return None;
    }
    tracing::info!(from = "receiver", ticket_id, "new ticket inserted");

    let history_id = store
        .insert_ticket_history(ticket_id, TICKET_STATUS_NEW, CREATED_NOTE)
        .await;
    if history_id == 0 {
        tracing::error!(
            from = "receiver",
            ticket_id,
            email_id = email.email_id,
            "partial ticket thread: history row missing"
        );
    }
    let media_id = store
        .insert_ticket_media(&NewTicketMedia {
            ticket_id,
            direction: Direction::Inbound,
            record_id: email.email_id,
            is_ticket_source: true,
        })
        .await;
    if media_id == 0 {
        tracing::error!(
            from = "receiver",
            ticket_id,
            email_id = email.email_id,
            "partial ticket thread: source media row missing"
        );
    }

    let Some(ticket) = store.ticket_by_id(ticket_id).await else {
        tracing::error!(from = "receiver", ticket_id, "new ticket could not be read back");
        return Some(ThreadOutcome::Linked { ticket_id });
    };
    Some(ThreadOutcome::Created { ticket })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles_mod::test_support::fresh_store;
    use ticketmail_core::{Conditions, TicketHistory, TicketMedia};

    fn inbound(email_id: i64) -> InboundRef<'static> {
        InboundRef {
            email_id,
            customer_id: 1,
            contact: "alice@example.com",
            subject: "Printer on fire",
        }
    }

    #[tokio::test]
    async fn second_email_joins_the_ticket_created_by_the_first() -> anyhow::Result<()> {
        let store = fresh_store().await?;

        let created = thread_email(&store, &inbound(10))
            .await
            .ok_or_else(|| anyhow::anyhow!("no outcome"))?;
        let ticket = match created {
            ThreadOutcome::Created { ticket } => ticket,
            other => anyhow::bail!("expected a new ticket, got {:?}", other),
        };
        assert_eq!(ticket.ticket_status_id, TICKET_STATUS_NEW);
        assert_eq!(ticket.is_from_customer, 1);
        assert!(ticket.ticket_no.is_some());

        let mut reply = inbound(11);
        reply.subject = "Re: Printer on fire";
        let linked = thread_email(&store, &reply)
            .await
            .ok_or_else(|| anyhow::anyhow!("no outcome"))?;
        assert!(matches!(linked, ThreadOutcome::Linked { ticket_id } if ticket_id == ticket.id));

        let histories: Vec<TicketHistory> = store.get("ticket_histories", &Conditions::new()).await;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].note.as_deref(), Some(CREATED_NOTE));

        let medias: Vec<TicketMedia> = store
            .get("ticket_medias", &Conditions::new().order_by("id"))
            .await;
        assert_eq!(medias.len(), 2);
        assert_eq!(medias[0].is_ticket_source, 1);
        assert_eq!(medias[1].is_ticket_source, 0);
        assert!(medias.iter().all(|m| m.ticket_id == ticket.id));

        let refreshed = store
            .ticket_by_id(ticket.id)
            .await
            .ok_or_else(|| anyhow::anyhow!("ticket vanished"))?;
        assert_eq!(refreshed.is_reply_customer, 1);
        assert_eq!(refreshed.subject.as_deref(), Some("Re: Printer on fire"));
        Ok(())
    }

    #[tokio::test]
    async fn closed_ticket_starts_a_new_thread() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let first = thread_email(&store, &inbound(1))
            .await
            .ok_or_else(|| anyhow::anyhow!("no outcome"))?;
        close_ticket(&store, first.ticket_id()).await?;

        let second = thread_email(&store, &inbound(2))
            .await
            .ok_or_else(|| anyhow::anyhow!("no outcome"))?;
        assert!(matches!(second, ThreadOutcome::Created { .. }));
        assert_ne!(second.ticket_id(), first.ticket_id());
        Ok(())
    }

    async fn close_ticket(store: &Store, ticket_id: i64) -> anyhow::Result<()> {
        let closed = store
            .update(
                "tickets",
                &ticketmail_core::Record::new()
                    .set("ticket_status_id", ticketmail_core::TICKET_STATUS_CLOSED),
                &Conditions::new().with("id", ticket_id),
            )
            .await;
        anyhow::ensure!(closed == 1, "ticket not closed");
        Ok(())
    }
}
