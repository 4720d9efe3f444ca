/// Ingestion boundary: campaigns, queued rows and sending accounts enter here
use chrono::{DateTime, Utc};
use lettre::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::account::{Account, NewAccount};
use crate::models::campaign::Campaign;
use crate::services::account_service::AccountPool;
use crate::services::message_store::{MessageStore, NewOutbound};

/// One uploaded row.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadRow {
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub track_opens: bool,
    pub tracking_base_url: String,
    pub send_interval_minutes: i64,
}

impl From<&Config> for EnqueueOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            track_opens: true,
            tracking_base_url: cfg.tracking_base_url.clone(),
            send_interval_minutes: cfg.send_interval_minutes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnqueueReport {
    pub campaign_id: i64,
    pub queued: usize,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Clone)]
pub struct IngestService {
    store: MessageStore,
    accounts: AccountPool,
}

impl IngestService {
    pub fn new(store: MessageStore, accounts: AccountPool) -> Self {
        Self { store, accounts }
    }

    /// Blank names become `Campaign YYYY-MM-DD HH:MM`.
    pub async fn create_campaign(&self, name: Option<&str>, now: DateTime<Utc>) -> Result<Campaign> {
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n.to_string(),
            None => format!("Campaign {}", now.format("%Y-%m-%d %H:%M")),
        };
        let campaign = self.store.create_campaign(&name, now.timestamp()).await?;
        tracing::info!(campaign_id = campaign.id, name = %campaign.name, "campaign created");
        Ok(campaign)
    }

    /// Validate and queue a batch. Rows are staggered so each batch of
    /// `account_count` rows lands one send interval after the previous one.
    pub async fn enqueue_batch(
        &self,
        campaign_id: i64,
        rows: &[LeadRow],
        opts: &EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Result<EnqueueReport> {
        let account_count = self.accounts.count().await?.max(1);
        let mut report = EnqueueReport {
            campaign_id,
            ..Default::default()
        };

        for (i, row) in rows.iter().enumerate() {
            let (email, body) = match validate_row(row) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(index = i, error = %e, "row rejected");
                    report.rejected.push(RejectedRow {
                        index: i,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let uid = Uuid::new_v4().to_string();
            let message = if opts.track_opens {
                format!("{body}{}", tracking_pixel(&opts.tracking_base_url, &uid))
            } else {
                body
            };
            let offset_minutes = (i as i64 / account_count) * opts.send_interval_minutes;
            let new = NewOutbound {
                uid,
                email,
                subject: row.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from),
                message,
                campaign_id: Some(campaign_id),
                scheduled_at: now.timestamp() + offset_minutes * 60,
            };
            self.store.insert(&new).await?;
            report.queued += 1;
        }

        tracing::info!(
            campaign_id,
            queued = report.queued,
            rejected = report.rejected.len(),
            "batch enqueued"
        );
        Ok(report)
    }

    pub async fn upsert_account(&self, new: &NewAccount) -> Result<Account> {
        validate_account(new)?;
        let account = self.accounts.upsert_account(new).await?;
        tracing::info!(account = %account.email, daily_limit = account.daily_limit, "account saved");
        Ok(account)
    }
}

fn validate_row(row: &LeadRow) -> Result<(String, String)> {
    let email = row.email.trim();
    if email.is_empty() {
        return Err(Error::Data("recipient is empty".into()));
    }
    if row.message.trim().is_empty() {
        return Err(Error::Data(format!("body is empty for {email}")));
    }
    let addr: Address = email
        .parse()
        .map_err(|e| Error::Data(format!("invalid recipient {email}: {e}")))?;
    Ok((addr.to_string(), row.message.clone()))
}

fn validate_account(new: &NewAccount) -> Result<()> {
    new.email
        .trim()
        .parse::<Address>()
        .map_err(|e| Error::Data(format!("invalid account address {}: {e}", new.email)))?;
    if new.smtp_host.trim().is_empty() || new.imap_host.trim().is_empty() {
        return Err(Error::Data(format!("missing host for {}", new.email)));
    }
    if new.daily_limit < 0 {
        return Err(Error::Data(format!("negative daily limit for {}", new.email)));
    }
    Ok(())
}

pub fn tracking_pixel(base_url: &str, uid: &str) -> String {
    format!(
        r#"<img src="{}/pixel.gif?uid={uid}" width="1" height="1">"#,
        base_url.trim_end_matches('/')
    )
}
