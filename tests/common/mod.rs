#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use lettre::Message;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use mailora_outreach::db;
use mailora_outreach::error::{Error, Result};
use mailora_outreach::imap::mailbox::{IdleOutcome, MailboxConnector, MailboxSession, SearchScope};
use mailora_outreach::models::{Account, NewAccount, OutboundMessage, SentRecord};
use mailora_outreach::services::account_service::AccountPool;
use mailora_outreach::services::message_store::{MessageStore, NewOutbound};
use mailora_outreach::smtp::Mailer;

pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub async fn stores() -> (SqlitePool, MessageStore, AccountPool) {
    let pool = db::connect_in_memory().await.unwrap();
    (pool.clone(), MessageStore::new(pool.clone()), AccountPool::new(pool))
}

pub fn new_account(email: &str, daily_limit: i64) -> NewAccount {
    let domain = email.rsplit('@').next().unwrap_or("example.com");
    NewAccount {
        email: email.into(),
        smtp_host: format!("smtp.{domain}"),
        smtp_port: 465,
        smtp_user: email.into(),
        smtp_pass: "secret".into(),
        imap_host: format!("imap.{domain}"),
        imap_port: 993,
        imap_user: email.into(),
        imap_pass: "secret".into(),
        daily_limit,
    }
}

pub async fn add_account(accounts: &AccountPool, email: &str, daily_limit: i64) -> Account {
    accounts.upsert_account(&new_account(email, daily_limit)).await.unwrap()
}

pub async fn set_usage(pool: &SqlitePool, email: &str, sent_today: i64, date: &str) {
    sqlx::query("UPDATE accounts SET sent_today = ?, last_reset_date = ? WHERE email = ?")
        .bind(sent_today)
        .bind(date)
        .bind(email)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn queue(store: &MessageStore, uid: &str, to: &str, scheduled_at: i64) -> OutboundMessage {
    store
        .insert(&NewOutbound {
            uid: uid.into(),
            email: to.into(),
            subject: Some("Quick question".into()),
            message: format!("<p>Hi {to}</p>"),
            campaign_id: None,
            scheduled_at,
        })
        .await
        .unwrap()
}

/// Queue a message and mark it sent under `message_id`.
pub async fn sent_message(
    store: &MessageStore,
    account: &Account,
    uid: &str,
    to: &str,
    message_id: &str,
    sent_at: i64,
) -> OutboundMessage {
    queue(store, uid, to, sent_at - 60).await;
    let record = SentRecord {
        account_email: account.email.clone(),
        message_id: message_id.into(),
        sent_at,
    };
    assert!(store.mark_sent(uid, &record).await.unwrap());
    store.get(uid).await.unwrap().unwrap()
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub account: String,
    pub to: String,
    pub raw: String,
}

/// Records deliveries instead of talking SMTP. Accounts in `failing` get a network
/// error; recipients in `rejecting` get a permanent refusal.
#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<Delivery>>,
    pub failing: Mutex<HashSet<String>>,
    pub rejecting: Mutex<HashSet<String>>,
}

impl FakeMailer {
    pub fn fail_for(&self, account: &str) {
        self.failing.lock().unwrap().insert(account.to_string());
    }

    pub fn reject_recipient(&self, to: &str) {
        self.rejecting.lock().unwrap().insert(to.to_string());
    }

    pub fn recover(&self, account: &str) {
        self.failing.lock().unwrap().remove(account);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for FakeMailer {
    fn send<'a>(&'a self, account: &'a Account, message: Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failing.lock().unwrap().contains(&account.email) {
                return Err(Error::Network(format!("connection refused by {}", account.smtp_host)));
            }
            let to = message
                .envelope()
                .to()
                .first()
                .map(|a| a.to_string())
                .unwrap_or_default();
            if self.rejecting.lock().unwrap().contains(&to) {
                return Err(Error::Rejected(format!("550 5.1.1 <{to}>: user unknown")));
            }
            self.sent.lock().unwrap().push(Delivery {
                account: account.email.clone(),
                to,
                raw: String::from_utf8_lossy(&message.formatted()).into_owned(),
            });
            Ok(())
        })
    }
}

/// One scripted mailbox session.
#[derive(Default)]
pub struct ScriptedSession {
    pub fetches: VecDeque<Result<Vec<Vec<u8>>>>,
    /// Once exhausted, idle blocks until cancelled.
    pub idles: VecDeque<Result<IdleOutcome>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch(mut self, messages: Vec<Vec<u8>>) -> Self {
        self.fetches.push_back(Ok(messages));
        self
    }

    pub fn idle(mut self, outcome: Result<IdleOutcome>) -> Self {
        self.idles.push_back(outcome);
        self
    }
}

/// `None` entries fail to connect; an exhausted script keeps failing.
#[derive(Default)]
pub struct ScriptedConnector {
    pub script: Mutex<VecDeque<Option<ScriptedSession>>>,
    pub connects: AtomicUsize,
    pub scopes: Arc<Mutex<Vec<SearchScope>>>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedConnector {
    pub fn new(script: Vec<Option<ScriptedSession>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }
}

impl MailboxConnector for ScriptedConnector {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn MailboxSession>>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().flatten();
            match next {
                Some(script) => Ok(Box::new(FakeSession {
                    script,
                    scopes: self.scopes.clone(),
                    closed: self.closed.clone(),
                }) as Box<dyn MailboxSession>),
                None => Err(Error::Network("connection refused".into())),
            }
        })
    }
}

struct FakeSession {
    script: ScriptedSession,
    scopes: Arc<Mutex<Vec<SearchScope>>>,
    closed: Arc<AtomicBool>,
}

impl MailboxSession for FakeSession {
    fn fetch_raw(&mut self, scope: SearchScope) -> BoxFuture<'_, Result<Vec<Vec<u8>>>> {
        Box::pin(async move {
            self.scopes.lock().unwrap().push(scope);
            self.script.fetches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        })
    }

    fn idle<'a>(&'a mut self, _timeout: Duration, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<IdleOutcome>> {
        Box::pin(async move {
            match self.script.idles.pop_front() {
                Some(outcome) => outcome,
                None => {
                    cancel.cancelled().await;
                    Ok(IdleOutcome::Cancelled)
                }
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}

pub fn raw_mail(from: &str, message_id: &str, in_reply_to: Option<&str>, references: Option<&str>) -> Vec<u8> {
    let mut out = format!("From: Lead <{from}>\r\nTo: sales@sender.com\r\nSubject: Re: Quick question\r\nMessage-ID: {message_id}\r\n");
    if let Some(irt) = in_reply_to {
        out.push_str(&format!("In-Reply-To: {irt}\r\n"));
    }
    if let Some(refs) = references {
        out.push_str(&format!("References: {refs}\r\n"));
    }
    out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\nSounds interesting, tell me more.\r\n");
    out.into_bytes()
}
