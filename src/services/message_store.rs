/// Durable outbound queue and its lifecycle transitions
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::models::campaign::{Campaign, CampaignStats, OverallStats};
use crate::models::outbound::{OutboundMessage, SentRecord};

const EMAIL_COLUMNS: &str = r#"
    id, uid, email, subject, message, campaign_id, scheduled_at, sent_at,
    is_sending, account_email, message_id, opened, opened_at, replied, replied_at
"#;

/// Row inserted by the ingestion boundary.
#[derive(Debug, Clone)]
pub struct NewOutbound {
    pub uid: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
    pub campaign_id: Option<i64>,
    pub scheduled_at: i64,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Peek at the next message due for dispatch without claiming it.
    pub async fn next_ready(&self, now: i64) -> Result<Option<OutboundMessage>> {
        let row = sqlx::query_as::<_, OutboundMessage>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails \
             WHERE sent_at IS NULL AND is_sending = 0 AND scheduled_at <= ? \
             ORDER BY scheduled_at ASC, id ASC LIMIT 1"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Select and claim the next due message in one statement, so two callers
    /// can never walk away with the same row.
    pub async fn claim_next_ready(&self, now: i64) -> Result<Option<OutboundMessage>> {
        let row = sqlx::query_as::<_, OutboundMessage>(&format!(
            "UPDATE emails SET is_sending = 1 \
             WHERE id = ( \
                 SELECT id FROM emails \
                 WHERE sent_at IS NULL AND is_sending = 0 AND scheduled_at <= ? \
                 ORDER BY scheduled_at ASC, id ASC LIMIT 1 \
             ) AND is_sending = 0 \
             RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Claim a specific message. Returns false when it is already claimed or sent.
    pub async fn mark_sending(&self, uid: &str) -> Result<bool> {
        let n = sqlx::query(
            "UPDATE emails SET is_sending = 1 WHERE uid = ? AND is_sending = 0 AND sent_at IS NULL",
        )
        .bind(uid)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n == 1)
    }

    /// Drop the claim of a message that was not delivered.
    pub async fn clear_sending(&self, uid: &str) -> Result<()> {
        sqlx::query("UPDATE emails SET is_sending = 0, attempt_message_id = NULL WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Stamp a claimed message with the identifier it is about to go out under.
    /// Written before any network I/O, so a claim that carries an identifier
    /// may already have reached the recipient.
    pub async fn begin_delivery(&self, uid: &str, message_id: &str) -> Result<()> {
        let n = sqlx::query(
            "UPDATE emails SET attempt_message_id = ? \
             WHERE uid = ? AND is_sending = 1 AND sent_at IS NULL",
        )
        .bind(message_id)
        .bind(uid)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if n == 0 {
            return Err(Error::Data(format!("message {uid} is not claimed")));
        }
        Ok(())
    }

    /// Release claims left behind by a process that died mid-dispatch.
    /// Claims whose delivery had already started are kept, see `unconfirmed_deliveries`.
    /// Only safe before the scheduler starts.
    pub async fn release_stale_claims(&self) -> Result<u64> {
        let n = sqlx::query(
            "UPDATE emails SET is_sending = 0 \
             WHERE is_sending = 1 AND sent_at IS NULL AND attempt_message_id IS NULL",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }

    /// Claimed messages whose delivery started but was never recorded as sent.
    pub async fn unconfirmed_deliveries(&self) -> Result<Vec<String>> {
        let uids = sqlx::query_scalar::<_, String>(
            "SELECT uid FROM emails \
             WHERE is_sending = 1 AND sent_at IS NULL AND attempt_message_id IS NOT NULL \
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(uids)
    }

    /// Finalize a dispatch: send metadata and claim release commit together.
    /// Returns false if the message was already sent.
    pub async fn mark_sent(&self, uid: &str, sent: &SentRecord) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let n = sqlx::query(
            "UPDATE emails SET sent_at = ?, account_email = ?, message_id = ?, \
                 is_sending = 0, attempt_message_id = NULL \
             WHERE uid = ? AND sent_at IS NULL",
        )
        .bind(sent.sent_at)
        .bind(&sent.account_email)
        .bind(&sent.message_id)
        .bind(uid)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if n == 0 {
            sqlx::query("UPDATE emails SET is_sending = 0, attempt_message_id = NULL WHERE uid = ?")
                .bind(uid)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(n == 1)
    }

    /// Set the replied flag once. No-op for unsent or already replied messages.
    pub async fn mark_replied(&self, uid: &str, at: i64) -> Result<bool> {
        let n = sqlx::query(
            "UPDATE emails SET replied = 1, replied_at = ? \
             WHERE uid = ? AND replied = 0 AND sent_at IS NOT NULL",
        )
        .bind(at)
        .bind(uid)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n == 1)
    }

    /// Set the opened flag once. No-op for unsent or already opened messages.
    pub async fn mark_opened(&self, uid: &str, at: i64) -> Result<bool> {
        let n = sqlx::query(
            "UPDATE emails SET opened = 1, opened_at = ? \
             WHERE uid = ? AND opened = 0 AND sent_at IS NOT NULL",
        )
        .bind(at)
        .bind(uid)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n == 1)
    }

    /// Mark the sent, unreplied message carrying `message_id` as replied.
    /// Returns the tracking uid of the message that flipped.
    pub async fn mark_replied_by_message_id(&self, message_id: &str, at: i64) -> Result<Option<String>> {
        let uid = sqlx::query_scalar::<_, String>(
            "UPDATE emails SET replied = 1, replied_at = ? \
             WHERE id = ( \
                 SELECT id FROM emails \
                 WHERE message_id = ? AND sent_at IS NOT NULL AND replied = 0 \
                 ORDER BY id ASC LIMIT 1 \
             ) AND replied = 0 \
             RETURNING uid",
        )
        .bind(at)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(uid)
    }

    /// Address-based fallback: the most recently sent, unreplied message to `recipient`.
    pub async fn mark_replied_by_recipient(&self, recipient: &str, at: i64) -> Result<Option<String>> {
        let uid = sqlx::query_scalar::<_, String>(
            "UPDATE emails SET replied = 1, replied_at = ? \
             WHERE id = ( \
                 SELECT id FROM emails \
                 WHERE email = ? COLLATE NOCASE AND sent_at IS NOT NULL AND replied = 0 \
                 ORDER BY sent_at DESC, id DESC LIMIT 1 \
             ) AND replied = 0 \
             RETURNING uid",
        )
        .bind(at)
        .bind(recipient)
        .fetch_optional(&self.pool)
        .await?;
        Ok(uid)
    }

    pub async fn get(&self, uid: &str) -> Result<Option<OutboundMessage>> {
        let row = sqlx::query_as::<_, OutboundMessage>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE uid = ?"
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert(&self, new: &NewOutbound) -> Result<OutboundMessage> {
        let row = sqlx::query_as::<_, OutboundMessage>(&format!(
            "INSERT INTO emails (uid, email, subject, message, campaign_id, scheduled_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(&new.uid)
        .bind(&new.email)
        .bind(&new.subject)
        .bind(&new.message)
        .bind(new.campaign_id)
        .bind(new.scheduled_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn create_campaign(&self, name: &str, created_at: i64) -> Result<Campaign> {
        let row = sqlx::query_as::<_, Campaign>(
            "INSERT INTO campaigns (name, created_at) VALUES (?, ?) RETURNING id, name, created_at",
        )
        .bind(name)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Per-campaign counters, newest campaign first.
    pub async fn campaign_stats(&self) -> Result<Vec<CampaignStats>> {
        let rows = sqlx::query_as::<_, CampaignStats>(
            r#"
            SELECT
                c.id, c.name, c.created_at,
                COUNT(e.id) AS total,
                COALESCE(SUM(CASE WHEN e.sent_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(e.opened), 0) AS opened,
                COALESCE(SUM(e.replied), 0) AS replied
            FROM campaigns c
            LEFT JOIN emails e ON c.id = e.campaign_id
            GROUP BY c.id
            ORDER BY c.created_at DESC, c.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn overall_stats(&self) -> Result<OverallStats> {
        let row = sqlx::query_as::<_, OverallStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN sent_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS sent,
                COALESCE(SUM(opened), 0) AS opened,
                COALESCE(SUM(replied), 0) AS replied
            FROM emails
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}
