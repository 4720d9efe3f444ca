/// Inbound watchers: one long-lived IDLE worker per account
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::imap::envelope::parse_envelope;
use crate::imap::mailbox::{IdleOutcome, ImapConnector, MailboxConnector, MailboxSession, SearchScope};
use crate::models::account::Account;
use crate::models::envelope::InboundEnvelope;
use crate::services::backoff::Backoff;
use crate::services::correlation_service::CorrelationIndex;

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub idle_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub excerpt_chars: usize,
    pub mailbox: String,
    pub accept_invalid_certs: bool,
    /// Pause after a change notification so bursts land in one fetch.
    pub settle: Duration,
}

impl From<&Config> for WatcherSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            idle_timeout: cfg.idle_timeout,
            backoff_initial: cfg.watch_backoff_initial,
            backoff_max: cfg.watch_backoff_max,
            excerpt_chars: cfg.body_excerpt_chars,
            mailbox: cfg.watch_mailbox.clone(),
            accept_invalid_certs: cfg.imap_accept_invalid_certs,
            settle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchEvent {
    pub account: String,
    pub event_type: WatchEventType,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventType {
    Connected,
    Synced { fetched: usize, added: usize, replies: usize },
    Changed,
    IdleTimeout,
    Backoff { delay_secs: u64 },
    Error { message: String },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Connecting,
    Syncing,
    Idling,
    Backoff,
    Stopped,
}

/// Read-only view published by a watcher after every state change or sync.
#[derive(Debug, Clone)]
pub struct WatcherSnapshot {
    pub state: WatcherState,
    /// Newest first.
    pub envelopes: Arc<Vec<InboundEnvelope>>,
    pub last_sync_at: Option<i64>,
}

impl Default for WatcherSnapshot {
    fn default() -> Self {
        Self {
            state: WatcherState::Connecting,
            envelopes: Arc::new(Vec::new()),
            last_sync_at: None,
        }
    }
}

/// Worker for a single mailbox. Owns its envelope cache exclusively.
pub struct AccountWatcher {
    account: String,
    connector: Arc<dyn MailboxConnector>,
    correlation: CorrelationIndex,
    settings: WatcherSettings,
    events: broadcast::Sender<WatchEvent>,
    snapshot: watch::Sender<WatcherSnapshot>,
    cache: Vec<InboundEnvelope>,
    seen: HashSet<String>,
    synced_once: bool,
}

impl AccountWatcher {
    pub fn new(
        account: impl Into<String>,
        connector: Arc<dyn MailboxConnector>,
        correlation: CorrelationIndex,
        settings: WatcherSettings,
        events: broadcast::Sender<WatchEvent>,
    ) -> (Self, watch::Receiver<WatcherSnapshot>) {
        let (snapshot, rx) = watch::channel(WatcherSnapshot::default());
        let watcher = Self {
            account: account.into(),
            connector,
            correlation,
            settings,
            events,
            snapshot,
            cache: Vec::new(),
            seen: HashSet::new(),
            synced_once: false,
        };
        (watcher, rx)
    }

    /// Connecting -> Syncing -> Idling, falling into Backoff on any failure,
    /// until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(account = %self.account, "watcher started");
        let mut backoff = Backoff::new(self.settings.backoff_initial, self.settings.backoff_max);

        loop {
            self.set_state(WatcherState::Connecting);
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                res = self.connector.connect() => res,
            };

            match connected {
                Ok(mut session) => {
                    self.emit(WatchEventType::Connected);
                    let result = self.serve(session.as_mut(), &mut backoff, &cancel).await;
                    session.close().await;
                    match result {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!(account = %self.account, error = %e, "mailbox session failed");
                            self.emit(WatchEventType::Error { message: e.to_string() });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(account = %self.account, error = %e, "mailbox connect failed");
                    self.emit(WatchEventType::Error { message: e.to_string() });
                }
            }

            let delay = backoff.next_delay();
            self.set_state(WatcherState::Backoff);
            self.emit(WatchEventType::Backoff { delay_secs: delay.as_secs() });
            tracing::info!(account = %self.account, delay_secs = delay.as_secs(), "watcher backing off");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(WatcherState::Stopped);
        self.emit(WatchEventType::Stopped);
        tracing::info!(account = %self.account, "watcher stopped");
    }

    /// One connected session. `Ok` means cancelled; any error sends the worker to backoff.
    async fn serve(
        &mut self,
        session: &mut dyn MailboxSession,
        backoff: &mut Backoff,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = if self.synced_once {
            SearchScope::Unseen
        } else {
            SearchScope::All
        };
        self.sync(session, scope).await?;
        backoff.reset();

        loop {
            self.set_state(WatcherState::Idling);
            match session.idle(self.settings.idle_timeout, cancel).await? {
                IdleOutcome::Cancelled => return Ok(()),
                IdleOutcome::TimedOut => {
                    tracing::debug!(account = %self.account, "idle timeout, re-issuing");
                    self.emit(WatchEventType::IdleTimeout);
                }
                IdleOutcome::Changed => {
                    self.emit(WatchEventType::Changed);
                    tokio::time::sleep(self.settings.settle).await;
                    self.sync(session, SearchScope::Unseen).await?;
                }
            }
        }
    }

    async fn sync(&mut self, session: &mut dyn MailboxSession, scope: SearchScope) -> Result<()> {
        self.set_state(WatcherState::Syncing);
        let raw = session.fetch_raw(scope).await?;
        let now = Utc::now().timestamp();

        let mut added = 0;
        let mut replies = 0;
        for bytes in &raw {
            let envelope = parse_envelope(bytes, self.settings.excerpt_chars);
            match self.correlation.record_reply(&envelope, now).await {
                Ok(Some(_)) => replies += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(account = %self.account, message_id = %envelope.message_id, error = %e, "reply correlation failed");
                }
            }
            if self.remember(envelope) {
                added += 1;
            }
        }

        self.synced_once = true;
        let envelopes = Arc::new(self.cache.clone());
        self.snapshot.send_modify(|s| {
            s.envelopes = envelopes;
            s.last_sync_at = Some(now);
        });
        tracing::debug!(account = %self.account, ?scope, fetched = raw.len(), added, replies, "mailbox synced");
        self.emit(WatchEventType::Synced {
            fetched: raw.len(),
            added,
            replies,
        });
        Ok(())
    }

    /// Insert at the front unless already cached.
    fn remember(&mut self, envelope: InboundEnvelope) -> bool {
        let key = if envelope.message_id.is_empty() {
            format!("{}\n{}\n{}", envelope.from, envelope.subject, envelope.body)
        } else {
            envelope.message_id.clone()
        };
        if !self.seen.insert(key) {
            return false;
        }
        self.cache.insert(0, envelope);
        true
    }

    fn set_state(&self, state: WatcherState) {
        self.snapshot.send_modify(|s| s.state = state);
    }

    fn emit(&self, event_type: WatchEventType) {
        // No subscribers is fine.
        let _ = self.events.send(WatchEvent {
            account: self.account.clone(),
            event_type,
            timestamp: Utc::now().timestamp(),
        });
    }
}

struct WatcherHandle {
    cancel: CancellationToken,
    snapshot: watch::Receiver<WatcherSnapshot>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStatus {
    pub account: String,
    pub state: WatcherState,
    pub cached: usize,
    pub last_sync_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    pub account: String,
    #[serde(flatten)]
    pub envelope: InboundEnvelope,
}

/// Owns every running watcher; all of them stop when the manager's token is cancelled.
pub struct WatcherManager {
    watchers: RwLock<HashMap<String, WatcherHandle>>,
    events: broadcast::Sender<WatchEvent>,
    correlation: CorrelationIndex,
    settings: WatcherSettings,
    cancel: CancellationToken,
}

impl WatcherManager {
    pub fn new(correlation: CorrelationIndex, settings: WatcherSettings, cancel: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            watchers: RwLock::new(HashMap::new()),
            events,
            correlation,
            settings,
            cancel,
        }
    }

    /// Watch the account's mailbox over IMAP.
    pub async fn start_account(&self, account: &Account) -> bool {
        let connector = ImapConnector::for_account(
            account,
            &self.settings.mailbox,
            self.settings.accept_invalid_certs,
        );
        self.start(account.email.clone(), Arc::new(connector)).await
    }

    /// Spawn a watcher unless one already runs for `account`.
    pub async fn start(&self, account: String, connector: Arc<dyn MailboxConnector>) -> bool {
        let mut watchers = self.watchers.write().await;
        if watchers.contains_key(&account) {
            return false;
        }
        let (watcher, snapshot) = AccountWatcher::new(
            account.clone(),
            connector,
            self.correlation.clone(),
            self.settings.clone(),
            self.events.clone(),
        );
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(watcher.run(cancel.clone()));
        watchers.insert(account, WatcherHandle { cancel, snapshot, task });
        true
    }

    /// Stop the account's watcher and wait for it to log out.
    pub async fn stop(&self, account: &str) -> bool {
        let handle = self.watchers.write().await.remove(account);
        match handle {
            Some(h) => {
                h.cancel.cancel();
                if let Err(e) = h.task.await {
                    tracing::error!(account = %account, error = %e, "watcher task panicked");
                }
                true
            }
            None => false,
        }
    }

    /// Fires once shutdown begins; long-lived readers such as event streams end on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    pub async fn active_count(&self) -> usize {
        self.watchers
            .read()
            .await
            .values()
            .filter(|h| !h.task.is_finished())
            .count()
    }

    pub async fn status(&self) -> Vec<WatcherStatus> {
        let watchers = self.watchers.read().await;
        let mut out: Vec<WatcherStatus> = watchers
            .iter()
            .map(|(account, h)| {
                let snap = h.snapshot.borrow();
                WatcherStatus {
                    account: account.clone(),
                    state: snap.state,
                    cached: snap.envelopes.len(),
                    last_sync_at: snap.last_sync_at,
                }
            })
            .collect();
        out.sort_by(|a, b| a.account.cmp(&b.account));
        out
    }

    /// Merged view of every watcher's cache, grouped by account.
    pub async fn inbox(&self) -> Vec<InboxItem> {
        let mut snapshots: Vec<(String, Arc<Vec<InboundEnvelope>>)> = {
            let watchers = self.watchers.read().await;
            watchers
                .iter()
                .map(|(account, h)| (account.clone(), h.snapshot.borrow().envelopes.clone()))
                .collect()
        };
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
            .into_iter()
            .flat_map(|(account, envelopes)| {
                envelopes
                    .iter()
                    .map(|e| InboxItem {
                        account: account.clone(),
                        envelope: e.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Cancel every watcher and wait for all of them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<(String, WatcherHandle)> = self.watchers.write().await.drain().collect();
        for (account, h) in handles {
            if let Err(e) = h.task.await {
                tracing::error!(account = %account, error = %e, "watcher task panicked");
            }
        }
    }
}
