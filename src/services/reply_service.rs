/// Manual replies to inbound mail, threaded onto the original conversation
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::imap::envelope::{extract_address, normalize_message_id, parse_references};
use crate::models::envelope::InboundEnvelope;
use crate::services::account_service::AccountPool;
use crate::services::correlation_service::CorrelationIndex;
use crate::services::message_store::MessageStore;
use crate::smtp::{self, Mailer, ReplyDraft};

/// Reply form as submitted from the inbox view.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplyRequest {
    pub to: String,
    pub body: String,
    /// Subject of the message being answered.
    #[serde(default)]
    pub subject: String,
    /// Identifier of the message being answered.
    #[serde(default)]
    pub message_id: String,
    /// Raw `References` header of the message being answered.
    #[serde(default)]
    pub references: String,
    #[serde(default)]
    pub original_body: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplySent {
    pub account: String,
    pub message_id: String,
    /// Tracking uid of the campaign message now marked replied, if any.
    pub marked_replied: Option<String>,
}

#[derive(Clone)]
pub struct ReplyService {
    store: MessageStore,
    accounts: AccountPool,
    correlation: CorrelationIndex,
    mailer: Arc<dyn Mailer>,
}

impl ReplyService {
    pub fn new(
        store: MessageStore,
        accounts: AccountPool,
        correlation: CorrelationIndex,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            accounts,
            correlation,
            mailer,
        }
    }

    /// Send a threaded reply through the least-used eligible account.
    /// `Ok(None)` when every account is out of quota.
    pub async fn send_reply(&self, req: &ReplyRequest, now: DateTime<Utc>) -> Result<Option<ReplySent>> {
        let to = extract_address(&req.to);
        if to.is_empty() {
            return Err(Error::Data("reply recipient is missing".into()));
        }
        if req.body.trim().is_empty() {
            return Err(Error::Data("reply body is empty".into()));
        }

        let mut chosen = None;
        for account in self.accounts.eligible_accounts(now).await? {
            if self.accounts.record_send(account.id).await? {
                chosen = Some(account);
                break;
            }
        }
        let Some(account) = chosen else {
            tracing::warn!(to = %to, "no eligible account for reply");
            return Ok(None);
        };

        let in_reply_to = if req.message_id.trim().is_empty() {
            String::new()
        } else {
            normalize_message_id(&req.message_id)
        };
        let references = smtp::thread_references(&parse_references(&req.references), &in_reply_to);
        let draft = ReplyDraft {
            to: to.clone(),
            subject: smtp::reply_subject(&req.subject),
            body: compose_body(&req.body, req.original_body.as_deref(), &to, now),
            in_reply_to: in_reply_to.clone(),
            references: references.clone(),
        };

        let message_id = smtp::generate_message_id(account.domain());
        let sent = match smtp::build_reply(&account, &draft, &message_id) {
            Ok(message) => self.mailer.send(&account, message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            if let Err(release_err) = self.accounts.release_send(account.id).await {
                tracing::error!(account = %account.email, error = %release_err, "could not give back quota");
            }
            return Err(e);
        }
        tracing::info!(to = %to, account = %account.email, message_id = %message_id, "reply sent");

        let at = now.timestamp();
        let thread = InboundEnvelope {
            from: to.clone(),
            in_reply_to,
            references,
            ..Default::default()
        };
        let marked_replied = match self.correlation.record_reply(&thread, at).await? {
            Some(uid) => Some(uid),
            None => self.store.mark_replied_by_recipient(&to, at).await?,
        };

        Ok(Some(ReplySent {
            account: account.email,
            message_id,
            marked_replied,
        }))
    }
}

/// Reply text, followed by the quoted original when there is one.
pub fn compose_body(body: &str, original: Option<&str>, recipient: &str, now: DateTime<Utc>) -> String {
    let body = body.trim_end();
    let Some(original) = original.map(str::trim).filter(|o| !o.is_empty()) else {
        return body.to_string();
    };
    let quoted = original
        .lines()
        .map(|l| format!("> {l}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{body}\n\nOn {}, {recipient} wrote:\n{quoted}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
