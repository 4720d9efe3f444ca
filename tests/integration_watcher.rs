mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use common::*;
use mailora_outreach::error::Error;
use mailora_outreach::imap::mailbox::{IdleOutcome, SearchScope};
use mailora_outreach::services::correlation_service::CorrelationIndex;
use mailora_outreach::services::idle_watcher_service::{
    WatchEvent, WatchEventType, WatcherManager, WatcherSettings,
};
use mailora_outreach::services::message_store::MessageStore;

fn settings() -> WatcherSettings {
    WatcherSettings {
        idle_timeout: Duration::from_secs(28 * 60),
        backoff_initial: Duration::from_secs(10),
        backoff_max: Duration::from_secs(3600),
        excerpt_chars: 500,
        mailbox: "INBOX".into(),
        accept_invalid_certs: false,
        settle: Duration::from_millis(10),
    }
}

/// Correlation over a pool that never connects; for watchers whose sessions fetch nothing.
fn detached_correlation() -> CorrelationIndex {
    let pool = SqlitePool::connect_lazy("sqlite::memory:").unwrap();
    CorrelationIndex::new(MessageStore::new(pool))
}

async fn backoff_delays(rx: &mut broadcast::Receiver<WatchEvent>, n: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        if let WatchEventType::Backoff { delay_secs } = rx.recv().await.unwrap().event_type {
            out.push(delay_secs);
        }
    }
    out
}

async fn wait_for(rx: &mut broadcast::Receiver<WatchEvent>, pred: impl Fn(&WatchEventType) -> bool) -> WatchEvent {
    loop {
        let ev = rx.recv().await.unwrap();
        if pred(&ev.event_type) {
            return ev;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_doubles_up_to_the_cap() {
    let manager = WatcherManager::new(detached_correlation(), settings(), CancellationToken::new());
    let mut rx = manager.subscribe();
    let connector = Arc::new(ScriptedConnector::new(Vec::new()));
    assert!(manager.start("sales@sender.com".into(), connector.clone()).await);

    let delays = backoff_delays(&mut rx, 11).await;
    assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 640, 1280, 2560, 3600, 3600]);
    assert!(connector.connects.load(Ordering::SeqCst) >= 11);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn successful_sync_resets_backoff() {
    let manager = WatcherManager::new(detached_correlation(), settings(), CancellationToken::new());
    let mut rx = manager.subscribe();
    let connector = Arc::new(ScriptedConnector::new(vec![
        None,
        None,
        None,
        Some(ScriptedSession::new().idle(Err(Error::Protocol("connection reset during IDLE".into())))),
        None,
    ]));
    manager.start("sales@sender.com".into(), connector.clone()).await;

    let delays = backoff_delays(&mut rx, 5).await;
    assert_eq!(delays, vec![10, 20, 40, 10, 20]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_reissues_without_reconnecting() {
    let manager = WatcherManager::new(detached_correlation(), settings(), CancellationToken::new());
    let mut rx = manager.subscribe();
    let connector = Arc::new(ScriptedConnector::new(vec![Some(
        ScriptedSession::new()
            .idle(Ok(IdleOutcome::TimedOut))
            .idle(Ok(IdleOutcome::TimedOut)),
    )]));
    manager.start("sales@sender.com".into(), connector.clone()).await;

    wait_for(&mut rx, |e| *e == WatchEventType::IdleTimeout).await;
    wait_for(&mut rx, |e| *e == WatchEventType::IdleTimeout).await;
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    manager.shutdown().await;
    assert!(connector.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn sync_correlates_replies_and_caches_envelopes() {
    let (_pool, store, accounts) = stores().await;
    let account = add_account(&accounts, "sales@sender.com", 10).await;
    let t = Utc::now().timestamp() - 3600;
    sent_message(&store, &account, "u1", "lead@prospect.io", "<xyz@y>", t).await;

    let reply = raw_mail("lead@prospect.io", "<r1@prospect.io>", None, Some("<abc@x> <xyz@y>"));
    let other = raw_mail("news@letter.io", "<n1@letter.io>", None, None);
    let connector = Arc::new(ScriptedConnector::new(vec![Some(
        ScriptedSession::new()
            .fetch(vec![other.clone(), reply.clone(), reply.clone()])
            .idle(Ok(IdleOutcome::Changed))
            .fetch(vec![reply.clone()]),
    )]));

    let manager = WatcherManager::new(CorrelationIndex::new(store.clone()), settings(), CancellationToken::new());
    let mut rx = manager.subscribe();
    manager.start("sales@sender.com".into(), connector.clone()).await;

    let first = wait_for(&mut rx, |e| matches!(e, WatchEventType::Synced { .. })).await;
    assert_eq!(
        first.event_type,
        WatchEventType::Synced {
            fetched: 3,
            added: 2,
            replies: 1
        }
    );
    let second = wait_for(&mut rx, |e| matches!(e, WatchEventType::Synced { .. })).await;
    assert_eq!(
        second.event_type,
        WatchEventType::Synced {
            fetched: 1,
            added: 0,
            replies: 0
        }
    );

    let msg = store.get("u1").await.unwrap().unwrap();
    assert!(msg.replied);

    let inbox = manager.inbox().await;
    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].envelope.message_id, "<r1@prospect.io>");
    assert_eq!(inbox[0].envelope.from, "lead@prospect.io");
    assert_eq!(inbox[1].envelope.message_id, "<n1@letter.io>");
    assert!(inbox.iter().all(|i| i.account == "sales@sender.com"));

    assert_eq!(
        *connector.scopes.lock().unwrap(),
        vec![SearchScope::All, SearchScope::Unseen]
    );

    manager.shutdown().await;
    assert!(connector.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn manager_tracks_and_stops_watchers() {
    let manager = WatcherManager::new(detached_correlation(), settings(), CancellationToken::new());
    let mut rx = manager.subscribe();
    let connector = Arc::new(ScriptedConnector::new(vec![Some(ScriptedSession::new())]));

    assert!(manager.start("sales@sender.com".into(), connector.clone()).await);
    assert!(!manager.start("sales@sender.com".into(), connector.clone()).await);
    wait_for(&mut rx, |e| matches!(e, WatchEventType::Synced { .. })).await;

    assert_eq!(manager.active_count().await, 1);
    let status = manager.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].account, "sales@sender.com");
    assert!(status[0].last_sync_at.is_some());

    assert!(manager.stop("sales@sender.com").await);
    wait_for(&mut rx, |e| *e == WatchEventType::Stopped).await;
    assert!(!manager.stop("sales@sender.com").await);
    assert_eq!(manager.active_count().await, 0);
    assert!(connector.closed.load(Ordering::SeqCst));
    assert!(manager.status().await.is_empty());
}
