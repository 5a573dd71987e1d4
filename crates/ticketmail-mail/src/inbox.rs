use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::NaiveDate;
use imap::{ClientBuilder, ConnectionMode};

use crate::{InboundAccount, imap_date};

type Session = imap::Session<imap::Connection>;

const INBOX: &str = "INBOX";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MailboxCounts {
    pub total: u32,
    pub unread: u32,
}

/// One selected inbox. Holding `&mut self` for the whole pass is what keeps
/// fetching and flagging serialized.
#[async_trait]
pub trait Mailbox: Send {
    /// Unseen UIDs received on or after `since`, oldest first.
    async fn unseen_since(&mut self, since: NaiveDate) -> Result<Vec<u32>>;
    /// Full RFC 822 source, without setting `\Seen`.
    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>>;
    async fn mark_seen(&mut self, uids: &[u32]) -> Result<()>;
    async fn counts(&mut self) -> Result<MailboxCounts>;
    async fn close(&mut self) -> Result<()>;
}

pub struct ImapMailbox {
    session: Option<Session>,
}

impl ImapMailbox {
    /// Connects, logs in and selects INBOX.
    pub async fn connect(account: &InboundAccount) -> Result<Self> {
        let account = account.clone();
        let session = tokio::task::spawn_blocking(move || -> Result<Session> {
            let mut session = imap_connect(&account)?;
            session.select(INBOX)?;
            Ok(session)
        })
        .await??;
        Ok(Self {
            session: Some(session),
        })
    }

    /// Runs `op` on the session off the async runtime, handing the session
    /// back afterwards.
    async fn with_session<T, F>(&mut self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
    {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| anyhow!("mailbox is closed"))?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session);
            (session, result)
        })
        .await?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn unseen_since(&mut self, since: NaiveDate) -> Result<Vec<u32>> {
        let query = format!("UNSEEN SINCE {}", imap_date(since));
        self.with_session(move |session| {
            tracing::debug!(query = %query, "imap uid search");
            let mut uids: Vec<u32> = session.uid_search(&query)?.into_iter().collect();
            uids.sort_unstable();
            Ok(uids)
        })
        .await
    }

    async fn fetch_raw(&mut self, uid: u32) -> Result<Vec<u8>> {
        self.with_session(move |session| {
            let fetches = session.uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")?;
            fetches
                .iter()
                .find_map(|f| f.body().map(|b| b.to_vec()))
                .ok_or_else(|| anyhow!("no body found for UID {}", uid))
        })
        .await
    }

    async fn mark_seen(&mut self, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let uid_set = uids
            .iter()
            .map(|uid| uid.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.with_session(move |session| {
            session.uid_store(&uid_set, "+FLAGS (\\Seen)")?;
            Ok(())
        })
        .await
    }

    async fn counts(&mut self) -> Result<MailboxCounts> {
        self.with_session(|session| {
            let status = session.status(INBOX, "(MESSAGES UNSEEN)")?;
            Ok(MailboxCounts {
                total: status.exists,
                unread: status.unseen.unwrap_or(0) as u32,
            })
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || session.logout()).await??;
        Ok(())
    }
}

fn imap_connect(account: &InboundAccount) -> Result<Session> {
    tracing::debug!(host = %account.host, port = account.port, "imap connect");
    let mode = if account.ssl {
        ConnectionMode::Tls
    } else {
        ConnectionMode::AutoTls
    };
    let client = ClientBuilder::new(account.host.as_str(), account.port)
        .tls_kind(imap::TlsKind::Native)
        .mode(mode)
        .danger_skip_tls_verify(account.skip_tls_verify)
        .connect()?;
    let session = client
        .login(&account.username, &account.password)
        .map_err(|e| e.0)?;
    tracing::debug!(username = %account.username, "imap login ok");
    Ok(session)
}
