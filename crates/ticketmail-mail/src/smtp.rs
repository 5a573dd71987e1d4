use anyhow::{Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Attachment, Mailbox, Message, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};

use crate::OutboundAccount;

#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingMail {
    pub from: String,
    pub sender: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMail {
    pub fn recipients(&self) -> Vec<&str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
            .collect()
    }
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Handshake and authenticate without sending anything.
    async fn verify(&self) -> Result<()>;
    async fn send(&self, mail: &OutgoingMail) -> Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Port 465 gets implicit TLS, any other port opportunistic STARTTLS.
    /// Certificates are not validated so self-signed relays work.
    pub fn new(account: &OutboundAccount) -> Result<Self> {
        let tls_parameters = TlsParameters::builder(account.host.clone())
            .dangerous_accept_invalid_certs(true)
            .dangerous_accept_invalid_hostnames(true)
            .build()?;
        let tls = if account.port == 465 {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Opportunistic(tls_parameters)
        };
        let creds = Credentials::new(account.username.clone(), account.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&account.host)
            .port(account.port)
            .tls(tls)
            .credentials(creds)
            .build();
        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn verify(&self) -> Result<()> {
        let ok = self
            .transport
            .test_connection()
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        if !ok {
            return Err(anyhow!("SMTP server did not accept the connection"));
        }
        Ok(())
    }

    async fn send(&self, mail: &OutgoingMail) -> Result<()> {
        let email = build_message(mail)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| anyhow!(e.to_string()))?;
        Ok(())
    }
}

fn build_message(mail: &OutgoingMail) -> Result<Message> {
    if mail.to.is_empty() && mail.cc.is_empty() && mail.bcc.is_empty() {
        return Err(anyhow!("No recipients"));
    }
    let mut builder = Message::builder()
        .from(parse_mailbox(&mail.from)?)
        .subject(mail.subject.clone());
    if let Some(sender) = mail.sender.as_deref() {
        match parse_mailbox(sender) {
            Ok(sender) => builder = builder.sender(sender),
            Err(err) => tracing::debug!(error = %err, "sender header skipped"),
        }
    }
    for addr in &mail.to {
        builder = builder.to(parse_mailbox(addr)?);
    }
    for addr in &mail.cc {
        builder = builder.cc(parse_mailbox(addr)?);
    }
    for addr in &mail.bcc {
        builder = builder.bcc(parse_mailbox(addr)?);
    }

    let email = if mail.attachments.is_empty() {
        builder.singlepart(SinglePart::html(mail.html.clone()))?
    } else {
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(mail.html.clone()));
        for attachment in &mail.attachments {
            let content_type = ContentType::parse(&attachment.mime)
                .or_else(|_| ContentType::parse(mime::APPLICATION_OCTET_STREAM.essence_str()))?;
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), content_type),
            );
        }
        builder.multipart(multipart)?
    };
    Ok(email)
}

fn parse_mailbox(input: &str) -> Result<Mailbox> {
    input
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| anyhow!("invalid address {:?}: {}", input, e))
}
