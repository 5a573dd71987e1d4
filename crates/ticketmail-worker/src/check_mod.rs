use anyhow::Result;
use serde_json::{Value as JsonValue, json};
use ticketmail_core::role;
use ticketmail_mail::{ImapMailbox, MailTransport, Mailbox, OutboundAccount, SmtpMailer};

use crate::cli::CheckTarget;
use crate::roles_mod::{inbound_account, outbound_account};
use crate::settings_mod::Settings;

pub(crate) fn envelope(outcome: Result<JsonValue>) -> JsonValue {
    match outcome {
        Ok(data) => json!({ "success": true, "data": data }),
        Err(err) => json!({ "success": false, "message": format!("{:#}", err) }),
    }
}

pub(crate) async fn mailbox_status(mailbox: &mut dyn Mailbox) -> Result<JsonValue> {
    let counts = mailbox.counts().await?;
    if let Err(err) = mailbox.close().await {
        tracing::warn!(error = %format!("{:#}", err), "mailbox close failed");
    }
    Ok(json!({ "total": counts.total, "unread": counts.unread }))
}

pub(crate) async fn transport_status(
    transport: &dyn MailTransport,
    account: &OutboundAccount,
) -> Result<JsonValue> {
    transport.verify().await?;
    Ok(json!({
        "host": account.host,
        "port": account.port,
        "username": account.username,
    }))
}

async fn connection_status(settings: &Settings, target: CheckTarget) -> Result<JsonValue> {
    let store = crate::open_store(settings).await?;
    match target {
        CheckTarget::Inbound => {
            let account = inbound_account(&store).await?;
            let mut mailbox = ImapMailbox::connect(&account).await?;
            mailbox_status(&mut mailbox).await
        }
        CheckTarget::Outbound => {
            let account = outbound_account(&store, role::EMAIL_OUTBOUND).await?;
            let transport = SmtpMailer::new(&account)?;
            transport_status(&transport, &account).await
        }
    }
}

/// Entry of the `check` command. The outcome goes to stdout as one JSON
/// line; only a stdout failure is an error.
pub(crate) async fn check(settings: &Settings, target: CheckTarget) -> Result<()> {
    let output = envelope(connection_status(settings, target).await);
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch_mod::test_support::FakeTransport;

    fn account() -> anyhow::Result<OutboundAccount> {
        OutboundAccount::from_json(
            r#"{"host":"smtp.example.com","port":"465","username":"desk@example.com","password":"x"}"#,
        )
    }

    #[test]
    fn envelope_shapes() {
        assert_eq!(
            envelope(Ok(json!({ "total": 3 }))),
            json!({ "success": true, "data": { "total": 3 } })
        );
        assert_eq!(
            envelope(Err(anyhow::anyhow!("login failed"))),
            json!({ "success": false, "message": "login failed" })
        );
    }

    #[tokio::test]
    async fn outbound_check_reports_account() -> anyhow::Result<()> {
        let account = account()?;
        let data = transport_status(&FakeTransport::default(), &account).await?;
        assert_eq!(
            data,
            json!({ "host": "smtp.example.com", "port": 465, "username": "desk@example.com" })
        );

        let refused = FakeTransport {
            refuse_verify: true,
            ..FakeTransport::default()
        };
        let outcome = envelope(transport_status(&refused, &account).await);
        assert_eq!(outcome["success"], json!(false));
        assert_eq!(outcome["message"], json!("connection refused"));
        Ok(())
    }
}
