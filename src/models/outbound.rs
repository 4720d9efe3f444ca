use serde::{Deserialize, Serialize};

/// A queued campaign message and its delivery/engagement lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OutboundMessage {
    pub id: i64,
    /// Tracking id embedded in the pixel URL.
    pub uid: String,
    pub email: String,
    pub subject: Option<String>,
    pub message: String,
    pub campaign_id: Option<i64>,
    pub scheduled_at: i64,
    pub sent_at: Option<i64>,
    pub is_sending: bool,
    pub account_email: Option<String>,
    /// Canonical `<token@domain>` identifier, set together with `sent_at`.
    pub message_id: Option<String>,
    pub opened: bool,
    pub opened_at: Option<i64>,
    pub replied: bool,
    pub replied_at: Option<i64>,
}

/// Outcome of finalizing a successful dispatch.
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub account_email: String,
    pub message_id: String,
    pub sent_at: i64,
}
