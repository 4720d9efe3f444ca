use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::account::Account;
use crate::models::outbound::{OutboundMessage, SentRecord};
use crate::services::account_service::AccountPool;
use crate::services::backoff::Backoff;
use crate::services::message_store::MessageStore;
use crate::smtp::{self, Mailer};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub fallback_subject: String,
    pub send_backoff_initial: Duration,
    pub send_backoff_max: Duration,
}

impl From<&Config> for SchedulerSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            tick: cfg.send_tick,
            fallback_subject: cfg.fallback_subject.clone(),
            send_backoff_initial: cfg.send_backoff_initial,
            send_backoff_max: cfg.send_backoff_max,
        }
    }
}

/// What one tick did. A tick with no eligible account or an empty queue is a no-op, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub eligible: usize,
    pub sent: usize,
    pub failed: usize,
    /// Eligible accounts skipped because a recent send failure put them in backoff.
    pub cooling_down: usize,
}

struct Cooldown {
    backoff: Backoff,
    until: i64,
}

enum DispatchError {
    /// Nothing left the building; the claim can be released.
    NotSent(Error),
    /// Delivered but not recorded. The claim stays so the message is not sent twice.
    Unrecorded(Error, SentRecord),
}

/// Periodic outbound dispatcher: one delivered message per eligible account per tick.
pub struct Scheduler {
    store: MessageStore,
    accounts: AccountPool,
    mailer: Arc<dyn Mailer>,
    settings: SchedulerSettings,
    cooldowns: HashMap<i64, Cooldown>,
    /// Delivered messages whose `mark_sent` failed, retried at the start of every tick.
    unrecorded: Vec<(String, SentRecord)>,
}

impl Scheduler {
    pub fn new(
        store: MessageStore,
        accounts: AccountPool,
        mailer: Arc<dyn Mailer>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            accounts,
            mailer,
            settings,
            cooldowns: HashMap::new(),
            unrecorded: Vec::new(),
        }
    }

    /// Spawn the tick loop. Cancellation is only observed between ticks, so an
    /// in-flight send always runs to completion.
    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(tick_secs = self.settings.tick.as_secs(), "outbound scheduler started");
            loop {
                let tick_start = Instant::now();
                match self.tick(Utc::now()).await {
                    Ok(report) if report.sent > 0 || report.failed > 0 => {
                        info!(
                            eligible = report.eligible,
                            sent = report.sent,
                            failed = report.failed,
                            cooling_down = report.cooling_down,
                            "scheduler tick"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "scheduler tick failed"),
                }
                let sleep = self
                    .settings
                    .tick
                    .saturating_sub(tick_start.elapsed())
                    .max(Duration::from_millis(1));
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(sleep) => {}
                }
            }
            info!("outbound scheduler stopped");
        })
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let now_ts = now.timestamp();
        self.record_pending().await;

        let eligible = self.accounts.eligible_accounts(now).await?;
        let mut report = TickReport {
            eligible: eligible.len(),
            ..Default::default()
        };
        if eligible.is_empty() {
            debug!("no accounts with remaining quota");
            return Ok(report);
        }

        // Failed messages keep their claim until the tick is over, so no other
        // account retries them before the next tick.
        let mut failed_uids = Vec::new();
        let outcome = self.dispatch_round(&eligible, now_ts, &mut report, &mut failed_uids).await;
        for uid in &failed_uids {
            self.release_claim(uid).await;
        }
        outcome.map(|()| report)
    }

    async fn dispatch_round(
        &mut self,
        eligible: &[Account],
        now_ts: i64,
        report: &mut TickReport,
        failed_uids: &mut Vec<String>,
    ) -> Result<()> {
        'accounts: for account in eligible {
            if self.cooldowns.get(&account.id).is_some_and(|c| c.until > now_ts) {
                report.cooling_down += 1;
                continue;
            }

            let mut rejections = 0;
            loop {
                let Some(msg) = self.store.claim_next_ready(now_ts).await? else {
                    debug!("no ready messages");
                    return Ok(());
                };

                match self.accounts.record_send(account.id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(account = %account.email, "quota used up since the tick started");
                        self.release_claim(&msg.uid).await;
                        continue 'accounts;
                    }
                    Err(e) => {
                        self.release_claim(&msg.uid).await;
                        return Err(e);
                    }
                }

                match self.dispatch(account, &msg, now_ts).await {
                    Ok(message_id) => {
                        report.sent += 1;
                        self.cooldowns.remove(&account.id);
                        info!(uid = %msg.uid, to = %msg.email, account = %account.email, message_id = %message_id, "sent");
                        continue 'accounts;
                    }
                    Err(DispatchError::NotSent(e)) => {
                        report.failed += 1;
                        warn!(uid = %msg.uid, to = %msg.email, account = %account.email, error = %e, "send failed");
                        self.release_quota(account).await;
                        failed_uids.push(msg.uid.clone());

                        if e.is_transient() {
                            self.cool_down(account, now_ts);
                            continue 'accounts;
                        }
                        // A refused message is usually the recipient's problem, but
                        // refusals in a row point at the account itself.
                        if matches!(e, Error::Rejected(_)) {
                            rejections += 1;
                            if rejections >= 2 {
                                self.cool_down(account, now_ts);
                                continue 'accounts;
                            }
                        }
                    }
                    Err(DispatchError::Unrecorded(e, record)) => {
                        report.sent += 1;
                        error!(uid = %msg.uid, account = %account.email, error = %e, "sent but not recorded; claim kept");
                        self.unrecorded.push((msg.uid.clone(), record));
                        continue 'accounts;
                    }
                }
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        account: &Account,
        msg: &OutboundMessage,
        now_ts: i64,
    ) -> std::result::Result<String, DispatchError> {
        let message_id = smtp::generate_message_id(account.domain());
        let email = smtp::build_outbound(account, msg, &self.settings.fallback_subject, &message_id)
            .map_err(DispatchError::NotSent)?;
        self.store
            .begin_delivery(&msg.uid, &message_id)
            .await
            .map_err(DispatchError::NotSent)?;

        debug!(uid = %msg.uid, to = %msg.email, account = %account.email, host = %account.smtp_host, "sending");
        self.mailer
            .send(account, email)
            .await
            .map_err(DispatchError::NotSent)?;

        let record = SentRecord {
            account_email: account.email.clone(),
            message_id: message_id.clone(),
            sent_at: now_ts,
        };
        match self.store.mark_sent(&msg.uid, &record).await {
            Ok(true) => Ok(message_id),
            Ok(false) => {
                warn!(uid = %msg.uid, "message was already marked sent");
                Ok(message_id)
            }
            Err(e) => Err(DispatchError::Unrecorded(e, record)),
        }
    }

    /// Retry `mark_sent` for deliveries that could not be recorded earlier.
    async fn record_pending(&mut self) {
        for (uid, record) in std::mem::take(&mut self.unrecorded) {
            match self.store.mark_sent(&uid, &record).await {
                Ok(_) => info!(uid = %uid, message_id = %record.message_id, "delivery recorded late"),
                Err(e) => {
                    warn!(uid = %uid, error = %e, "delivery still not recorded");
                    self.unrecorded.push((uid, record));
                }
            }
        }
    }

    async fn release_claim(&self, uid: &str) {
        if let Err(e) = self.store.clear_sending(uid).await {
            error!(uid = %uid, error = %e, "could not release claim");
        }
    }

    async fn release_quota(&self, account: &Account) {
        if let Err(e) = self.accounts.release_send(account.id).await {
            error!(account = %account.email, error = %e, "could not give back quota");
        }
    }

    fn cool_down(&mut self, account: &Account, now_ts: i64) {
        let initial = self.settings.send_backoff_initial;
        let max = self.settings.send_backoff_max;
        let entry = self.cooldowns.entry(account.id).or_insert_with(|| Cooldown {
            backoff: Backoff::new(initial, max),
            until: now_ts,
        });
        let delay = entry.backoff.next_delay();
        entry.until = now_ts + delay.as_secs() as i64;
        warn!(account = %account.email, delay_secs = delay.as_secs(), "account in send backoff");
    }
}
