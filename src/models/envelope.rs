use serde::Serialize;

/// Parsed header summary of one inbound message. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboundEnvelope {
    /// Bare sender address, display name stripped.
    pub from: String,
    pub subject: String,
    /// Canonical `<...>` form, empty when the header is missing.
    pub message_id: String,
    /// `In-Reply-To`, canonical form.
    pub in_reply_to: String,
    /// `References` ancestry in header order (oldest first), canonical form.
    pub references: Vec<String>,
    pub body: String,
}

impl InboundEnvelope {
    /// Candidate parent identifiers, most recent first, without duplicates.
    pub fn thread_candidates(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.references.len() + 1);
        if !self.in_reply_to.is_empty() {
            out.push(&self.in_reply_to);
        }
        for r in self.references.iter().rev() {
            if !out.contains(&r.as_str()) {
                out.push(r);
            }
        }
        out
    }
}
