/// Correlation index: threading identifiers and tracking ids back to stored messages
use tracing::{debug, info};

use crate::error::Result;
use crate::models::envelope::InboundEnvelope;
use crate::services::message_store::MessageStore;

#[derive(Clone)]
pub struct CorrelationIndex {
    store: MessageStore,
}

impl CorrelationIndex {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    /// Mark the first sent, unreplied message the envelope threads onto.
    ///
    /// Candidates are scanned most recent first; the scan stops at the first
    /// match. Returns the tracking uid that flipped, `None` when the envelope
    /// answers nothing we sent (or was already counted).
    pub async fn record_reply(&self, envelope: &InboundEnvelope, at: i64) -> Result<Option<String>> {
        for candidate in envelope.thread_candidates() {
            if let Some(uid) = self.store.mark_replied_by_message_id(candidate, at).await? {
                info!(
                    uid = %uid,
                    reference = %candidate,
                    from = %envelope.from,
                    "reply detected"
                );
                return Ok(Some(uid));
            }
            debug!(reference = %candidate, "no unreplied tracked message for reference");
        }
        Ok(None)
    }

    /// Pixel fetch for `tracking_id`. True only on the first open of a sent message.
    pub async fn record_open(&self, tracking_id: &str, at: i64) -> Result<bool> {
        let tracking_id = tracking_id.trim();
        if tracking_id.is_empty() {
            return Ok(false);
        }
        let flipped = self.store.mark_opened(tracking_id, at).await?;
        if flipped {
            info!(uid = %tracking_id, "open detected");
        } else {
            debug!(uid = %tracking_id, "open ignored (unknown, unsent or already opened)");
        }
        Ok(flipped)
    }
}
