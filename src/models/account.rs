/// Sending account: SMTP submission + IMAP mailbox credentials with a daily quota
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub smtp_host: String,
    #[sqlx(try_from = "i64")]
    pub smtp_port: u16,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub smtp_pass: String,
    pub imap_host: String,
    #[sqlx(try_from = "i64")]
    pub imap_port: u16,
    pub imap_user: String,
    #[serde(skip_serializing)]
    pub imap_pass: String,
    pub daily_limit: i64,
    pub sent_today: i64,
    /// UTC calendar date (`YYYY-MM-DD`) the usage counter belongs to.
    pub last_reset_date: Option<String>,
}

impl Account {
    /// Domain part of the address, used to mint message identifiers.
    pub fn domain(&self) -> &str {
        self.email
            .rsplit_once('@')
            .map(|(_, d)| d)
            .filter(|d| !d.is_empty())
            .unwrap_or("localhost")
    }

    pub fn has_quota(&self) -> bool {
        self.sent_today < self.daily_limit
    }
}

/// Account row as supplied by the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub email: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    pub imap_pass: String,
    pub daily_limit: i64,
}
