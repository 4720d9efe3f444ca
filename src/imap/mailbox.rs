/// Mailbox session seam used by inbound watchers
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use futures::future::BoxFuture;
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::imap::conn::{self, ImapSession};
use crate::models::account::Account;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    All,
    Unseen,
}

impl SearchScope {
    fn query(self) -> &'static str {
        match self {
            SearchScope::All => "ALL",
            SearchScope::Unseen => "UNSEEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    /// The server pushed an update for the selected mailbox.
    Changed,
    /// Nothing happened before the timeout; the idle request should be re-issued.
    TimedOut,
    /// Shutdown was requested while idling. The session is still usable for logout.
    Cancelled,
}

/// Opens authenticated sessions with the mailbox already selected.
pub trait MailboxConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MailboxSession>>>;
}

pub trait MailboxSession: Send {
    /// Raw RFC 5322 bytes of every message matching `scope`, oldest first.
    fn fetch_raw(&mut self, scope: SearchScope) -> BoxFuture<'_, Result<Vec<Vec<u8>>>>;

    /// Block until the server reports a change, `timeout` elapses or `cancel` fires.
    fn idle<'a>(&'a mut self, timeout: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<IdleOutcome>>;

    /// Best-effort logout.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

/// IMAP-over-TLS connector for one account's mailbox.
#[derive(Clone)]
pub struct ImapConnector {
    host: String,
    port: u16,
    user: String,
    pass: String,
    mailbox: String,
    accept_invalid_certs: bool,
}

impl ImapConnector {
    pub fn for_account(account: &Account, mailbox: &str, accept_invalid_certs: bool) -> Self {
        Self {
            host: account.imap_host.clone(),
            port: account.imap_port,
            user: account.imap_user.clone(),
            pass: account.imap_pass.clone(),
            mailbox: mailbox.to_string(),
            accept_invalid_certs,
        }
    }
}

impl MailboxConnector for ImapConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MailboxSession>>> {
        Box::pin(async move {
            let mut session =
                conn::connect(&self.host, self.port, &self.user, &self.pass, self.accept_invalid_certs).await?;
            let mailbox = session
                .select(&self.mailbox)
                .await
                .map_err(|e| Error::Protocol(format!("select {}: {e}", self.mailbox)))?;
            tracing::debug!(user = %self.user, mailbox = %self.mailbox, exists = mailbox.exists, "mailbox selected");
            Ok(Box::new(ImapMailbox { session: Some(session) }) as Box<dyn MailboxSession>)
        })
    }
}

/// `IDLE` consumes the session and `DONE` hands it back, hence the `Option`.
pub struct ImapMailbox {
    session: Option<ImapSession>,
}

impl ImapMailbox {
    fn live(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Protocol("session lost during idle".into()))
    }
}

impl MailboxSession for ImapMailbox {
    fn fetch_raw(&mut self, scope: SearchScope) -> BoxFuture<'_, Result<Vec<Vec<u8>>>> {
        Box::pin(async move {
            let session = self.live()?;
            let mut seqs: Vec<u32> = session.search(scope.query()).await?.into_iter().collect();
            if seqs.is_empty() {
                return Ok(Vec::new());
            }
            seqs.sort_unstable();
            let set = seqs.iter().map(u32::to_string).collect::<Vec<_>>().join(",");

            let fetches: Vec<_> = session.fetch(&set, "RFC822").await?.try_collect().await?;
            Ok(fetches
                .iter()
                .filter_map(|f| f.body().map(<[u8]>::to_vec))
                .collect())
        })
    }

    fn idle<'a>(&'a mut self, timeout: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<IdleOutcome>> {
        Box::pin(async move {
            let session = self
                .session
                .take()
                .ok_or_else(|| Error::Protocol("session lost during idle".into()))?;
            let mut handle = session.idle();
            handle
                .init()
                .await
                .map_err(|e| Error::Protocol(format!("IDLE not acknowledged: {e}")))?;

            let outcome = {
                let (wait, _stop) = handle.wait();
                tokio::select! {
                    _ = cancel.cancelled() => IdleOutcome::Cancelled,
                    res = tokio::time::timeout(timeout, wait) => match res {
                        Ok(Ok(IdleResponse::NewData(_))) => IdleOutcome::Changed,
                        Ok(Ok(IdleResponse::Timeout | IdleResponse::ManualInterrupt)) | Err(_) => IdleOutcome::TimedOut,
                        Ok(Err(e)) => return Err(Error::Protocol(format!("idle wait: {e}"))),
                    },
                }
            };

            let session = handle
                .done()
                .await
                .map_err(|e| Error::Protocol(format!("DONE not acknowledged: {e}")))?;
            self.session = Some(session);
            Ok(outcome)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Some(mut session) = self.session {
                if let Err(e) = session.logout().await {
                    tracing::debug!(error = %e, "logout failed");
                }
            }
        })
    }
}
