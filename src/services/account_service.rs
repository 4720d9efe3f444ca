/// Account pool: quota-aware selection of sending accounts
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::models::account::{Account, NewAccount};

const ACCOUNT_COLUMNS: &str = r#"
    id, email, smtp_host, smtp_port, smtp_user, smtp_pass,
    imap_host, imap_port, imap_user, imap_pass,
    daily_limit, sent_today, last_reset_date
"#;

#[derive(Clone)]
pub struct AccountPool {
    pool: SqlitePool,
}

impl AccountPool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Accounts with remaining quota, least used first.
    ///
    /// Counters belonging to an earlier UTC day are zeroed as part of the read,
    /// in the same transaction as the selection.
    pub async fn eligible_accounts(&self, now: DateTime<Utc>) -> Result<Vec<Account>> {
        let today = now.date_naive().to_string();
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE accounts SET sent_today = 0, last_reset_date = ? \
             WHERE last_reset_date IS NULL OR last_reset_date <> ?",
        )
        .bind(&today)
        .bind(&today)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if reset > 0 {
            tracing::debug!(accounts = reset, date = %today, "daily usage counters reset");
        }

        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE sent_today < daily_limit \
             ORDER BY sent_today ASC, id ASC"
        ))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(accounts)
    }

    /// Count one delivery against the account's daily quota, before it goes out.
    ///
    /// The check and the increment are one statement, so concurrent senders can
    /// never push `sent_today` past `daily_limit`. False when the quota is used up.
    pub async fn record_send(&self, account_id: i64) -> Result<bool> {
        let n = sqlx::query(
            "UPDATE accounts SET sent_today = sent_today + 1 \
             WHERE id = ? AND sent_today < daily_limit",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n == 1)
    }

    /// Give back a unit taken by `record_send` for a delivery that did not happen.
    pub async fn release_send(&self, account_id: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET sent_today = sent_today - 1 WHERE id = ? AND sent_today > 0")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn count(&self) -> Result<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Insert or update an account keyed by address. Usage counters survive an update.
    pub async fn upsert_account(&self, new: &NewAccount) -> Result<Account> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                email, smtp_host, smtp_port, smtp_user, smtp_pass,
                imap_host, imap_port, imap_user, imap_pass, daily_limit
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(email) DO UPDATE SET
                smtp_host = excluded.smtp_host,
                smtp_port = excluded.smtp_port,
                smtp_user = excluded.smtp_user,
                smtp_pass = excluded.smtp_pass,
                imap_host = excluded.imap_host,
                imap_port = excluded.imap_port,
                imap_user = excluded.imap_user,
                imap_pass = excluded.imap_pass,
                daily_limit = excluded.daily_limit
            "#,
        )
        .bind(&new.email)
        .bind(&new.smtp_host)
        .bind(new.smtp_port as i64)
        .bind(&new.smtp_user)
        .bind(&new.smtp_pass)
        .bind(&new.imap_host)
        .bind(new.imap_port as i64)
        .bind(&new.imap_user)
        .bind(&new.imap_pass)
        .bind(new.daily_limit)
        .execute(&self.pool)
        .await?;

        self.get_by_email(&new.email)
            .await?
            .ok_or_else(|| crate::error::Error::Data(format!("account {} vanished after upsert", new.email)))
    }
}
