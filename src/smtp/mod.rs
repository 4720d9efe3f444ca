/// Outbound SMTP: message construction and TLS submission through lettre
use std::time::Duration;

use futures::future::BoxFuture;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::account::Account;
use crate::models::outbound::OutboundMessage;

/// Delivery seam; the scheduler and the reply path never talk to lettre directly.
pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, account: &'a Account, message: Message) -> BoxFuture<'a, Result<()>>;
}

/// Submits through the account's own SMTP endpoint. Port 465 uses implicit
/// TLS, anything else requires STARTTLS.
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Mailer for SmtpMailer {
    fn send<'a>(&'a self, account: &'a Account, message: Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let creds = Credentials::new(account.smtp_user.clone(), account.smtp_pass.clone());
            let params = TlsParameters::new(account.smtp_host.clone())?;
            let tls = if account.smtp_port == 465 {
                Tls::Wrapper(params)
            } else {
                Tls::Required(params)
            };

            let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&account.smtp_host)?
                .port(account.smtp_port)
                .tls(tls)
                .credentials(creds)
                .timeout(Some(self.timeout))
                .build();

            transport.send(message).await.map_err(|e| {
                if e.is_permanent() {
                    Error::Rejected(e.to_string())
                } else {
                    Error::Smtp(e)
                }
            })?;
            Ok(())
        })
    }
}

/// Fresh `<uuid@domain>` identifier, usable as a thread root by receiving MTAs.
pub fn generate_message_id(domain: &str) -> String {
    format!("<{}@{}>", Uuid::new_v4(), domain)
}

/// HTML campaign message. The tracking pixel is already part of the body.
pub fn build_outbound(
    account: &Account,
    msg: &OutboundMessage,
    fallback_subject: &str,
    message_id: &str,
) -> Result<Message> {
    let subject = msg
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_subject);

    let message = Message::builder()
        .from(account.email.parse::<Mailbox>()?)
        .to(msg.email.parse::<Mailbox>()?)
        .subject(subject)
        .message_id(Some(message_id.to_string()))
        .header(ContentType::TEXT_HTML)
        .body(msg.message.clone())?;
    Ok(message)
}

/// Threading data for a reply to an inbound message.
#[derive(Debug, Clone, Default)]
pub struct ReplyDraft {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Canonical identifier of the message being answered, empty if unknown.
    pub in_reply_to: String,
    pub references: Vec<String>,
}

/// `Re: ` prefixed subject, first line only.
pub fn reply_subject(original: &str) -> String {
    let first = original.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return "Re: Follow-up".to_string();
    }
    if first.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        first.to_string()
    } else {
        format!("Re: {first}")
    }
}

/// Original ancestry plus the answered identifier, appended once at the end.
pub fn thread_references(original: &[String], in_reply_to: &str) -> Vec<String> {
    let mut refs: Vec<String> = original.to_vec();
    if !in_reply_to.is_empty() && !refs.iter().any(|r| r == in_reply_to) {
        refs.push(in_reply_to.to_string());
    }
    refs
}

pub fn build_reply(account: &Account, draft: &ReplyDraft, message_id: &str) -> Result<Message> {
    let mut builder = Message::builder()
        .from(account.email.parse::<Mailbox>()?)
        .to(draft.to.parse::<Mailbox>()?)
        .subject(draft.subject.clone())
        .message_id(Some(message_id.to_string()));
    if !draft.in_reply_to.is_empty() {
        builder = builder.in_reply_to(draft.in_reply_to.clone());
    }
    if !draft.references.is_empty() {
        builder = builder.references(draft.references.join(" "));
    }
    let message = builder.header(ContentType::TEXT_PLAIN).body(draft.body.clone())?;
    Ok(message)
}
