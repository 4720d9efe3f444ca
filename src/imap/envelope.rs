//! Envelope extraction from raw RFC 5322 messages.
//!
//! Normalization rules:
//! - identifiers are trimmed and wrapped in `<...>`, repairing a missing
//!   leading or trailing bracket;
//! - the `References` header is split on whitespace, commas and `><`
//!   boundaries, each token normalized;
//! - the sender is reduced to its bare address.

use mailparse::{addrparse, parse_headers, parse_mail, MailAddr, MailHeaderMap, ParsedMail};

use crate::models::envelope::InboundEnvelope;

/// Canonical bracketed identifier. Empty input stays empty.
pub fn normalize_message_id(raw: &str) -> String {
    let id: String = raw.split_whitespace().collect();
    if id.is_empty() || id == "<>" {
        return String::new();
    }
    let mut out = String::with_capacity(id.len() + 2);
    if !id.starts_with('<') {
        out.push('<');
    }
    out.push_str(&id);
    if !id.ends_with('>') {
        out.push('>');
    }
    out
}

/// Split a threading header into canonical identifiers, header order preserved.
pub fn parse_references(raw: &str) -> Vec<String> {
    let spaced = raw.replace('>', "> ").replace(',', " ");
    let mut out: Vec<String> = Vec::new();
    for token in spaced.split_whitespace() {
        let id = normalize_message_id(token);
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Bare address from a `From`-style header, display name stripped.
pub fn extract_address(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Ok(list) = addrparse(raw) {
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) if !info.addr.is_empty() => return info.addr.clone(),
                MailAddr::Group(group) => {
                    if let Some(first) = group.addrs.iter().find(|a| !a.addr.is_empty()) {
                        return first.addr.clone();
                    }
                }
                _ => {}
            }
        }
    }
    if let (Some(start), Some(end)) = (raw.rfind('<'), raw.rfind('>')) {
        if start < end {
            return raw[start + 1..end].trim().to_string();
        }
    }
    raw.to_string()
}

/// Parse a fetched message. Missing headers become empty fields; a message
/// mailparse rejects falls back to header-only parsing.
pub fn parse_envelope(raw: &[u8], excerpt_chars: usize) -> InboundEnvelope {
    match parse_mail(raw) {
        Ok(mail) => {
            let header = |name: &str| mail.headers.get_first_value(name).unwrap_or_default();
            InboundEnvelope {
                from: extract_address(&header("From")),
                subject: header("Subject").trim().to_string(),
                message_id: normalize_message_id(&header("Message-ID")),
                in_reply_to: parse_references(&header("In-Reply-To")).pop().unwrap_or_default(),
                references: parse_references(&header("References")),
                body: excerpt(&text_body(&mail), excerpt_chars),
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "full parse failed, falling back to headers");
            match parse_headers(raw) {
                Ok((headers, _)) => {
                    let header = |name: &str| headers.get_first_value(name).unwrap_or_default();
                    InboundEnvelope {
                        from: extract_address(&header("From")),
                        subject: header("Subject").trim().to_string(),
                        message_id: normalize_message_id(&header("Message-ID")),
                        in_reply_to: parse_references(&header("In-Reply-To")).pop().unwrap_or_default(),
                        references: parse_references(&header("References")),
                        body: String::new(),
                    }
                }
                Err(_) => InboundEnvelope::default(),
            }
        }
    }
}

/// First `text/plain` part, else the first part with any text at all.
fn text_body(mail: &ParsedMail) -> String {
    if mail.subparts.is_empty() {
        return mail.get_body().unwrap_or_default();
    }
    if let Some(plain) = find_part(mail, "text/plain") {
        return plain;
    }
    find_part(mail, "text/html").unwrap_or_default()
}

fn find_part(mail: &ParsedMail, mimetype: &str) -> Option<String> {
    if mail.ctype.mimetype == mimetype && mail.subparts.is_empty() {
        return mail.get_body().ok();
    }
    mail.subparts.iter().find_map(|p| find_part(p, mimetype))
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_missing_brackets() {
        assert_eq!(normalize_message_id("abc@x"), "<abc@x>");
        assert_eq!(normalize_message_id("<abc@x"), "<abc@x>");
        assert_eq!(normalize_message_id("abc@x>"), "<abc@x>");
        assert_eq!(normalize_message_id("  <abc@x>  "), "<abc@x>");
        assert_eq!(normalize_message_id(""), "");
    }

    #[test]
    fn splits_reference_lists() {
        assert_eq!(parse_references("<abc@x> <xyz@y>"), vec!["<abc@x>", "<xyz@y>"]);
        assert_eq!(parse_references("<abc@x><xyz@y>"), vec!["<abc@x>", "<xyz@y>"]);
        assert_eq!(parse_references("<abc@x>,\r\n\t<xyz@y>"), vec!["<abc@x>", "<xyz@y>"]);
        assert_eq!(parse_references("abc@x"), vec!["<abc@x>"]);
        assert!(parse_references("").is_empty());
    }

    #[test]
    fn strips_display_names() {
        assert_eq!(extract_address("Jane Doe <jane@acme.io>"), "jane@acme.io");
        assert_eq!(extract_address("\"Doe, Jane\" <jane@acme.io>"), "jane@acme.io");
        assert_eq!(extract_address("jane@acme.io"), "jane@acme.io");
        assert_eq!(extract_address(""), "");
    }

    #[test]
    fn parses_reply_headers_and_body() {
        let raw = b"From: Jane Doe <jane@acme.io>\r\n\
Subject: Re: Quick question\r\n\
Message-ID: <reply-1@acme.io>\r\n\
In-Reply-To: <orig-1@sender.com>\r\n\
References: <root@sender.com>\r\n <orig-1@sender.com>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Sounds good, let's talk.\r\n";
        let env = parse_envelope(raw, 500);
        assert_eq!(env.from, "jane@acme.io");
        assert_eq!(env.subject, "Re: Quick question");
        assert_eq!(env.message_id, "<reply-1@acme.io>");
        assert_eq!(env.in_reply_to, "<orig-1@sender.com>");
        assert_eq!(env.references, vec!["<root@sender.com>", "<orig-1@sender.com>"]);
        assert_eq!(env.body, "Sounds good, let's talk.");
    }

    #[test]
    fn missing_headers_default_to_empty() {
        let env = parse_envelope(b"Content-Type: text/plain\r\n\r\nhello\r\n", 500);
        assert_eq!(env.from, "");
        assert_eq!(env.subject, "");
        assert_eq!(env.message_id, "");
        assert!(env.references.is_empty());
        assert_eq!(env.body, "hello");
    }

    #[test]
    fn prefers_plain_part_in_multipart() {
        let raw = b"From: a@b.c\r\n\
Message-ID: m1@b.c\r\n\
Content-Type: multipart/alternative; boundary=\"XX\"\r\n\
\r\n\
--XX\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html</p>\r\n\
--XX\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain text\r\n\
--XX--\r\n";
        let env = parse_envelope(raw, 500);
        assert_eq!(env.message_id, "<m1@b.c>");
        assert_eq!(env.body, "plain text");
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo wörld", 4), "héll");
        assert_eq!(excerpt("  short  ", 100), "short");
    }
}
