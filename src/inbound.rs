//! Messaging webhook intake: unpack a delivery and drop messages already seen.

use serde::{Deserialize, Serialize};

use crate::dedup::DedupGate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider message id, the dedup key.
    pub id: String,
    /// Business number the message was sent to.
    pub phone_number_id: Option<String>,
    /// Sender's number.
    pub from: String,
    pub kind: String,
    pub text: Option<String>,
}

#[derive(Debug)]
pub enum InboundError {
    Malformed(serde_json::Error),
}

impl std::fmt::Display for InboundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundError::Malformed(e) => write!(f, "malformed webhook payload: {e}"),
        }
    }
}

impl std::error::Error for InboundError {}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
struct Change {
    #[serde(default)]
    value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct ChangeValue {
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    phone_number_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    id: Option<String>,
    from: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<Text>,
}

#[derive(Debug, Default, Deserialize)]
struct Text {
    body: Option<String>,
}

/// Every message in a webhook delivery, in payload order. Messages missing
/// an id or sender are skipped.
pub fn parse_messages(payload: &serde_json::Value) -> Result<Vec<InboundMessage>, InboundError> {
    let payload = Payload::deserialize(payload).map_err(InboundError::Malformed)?;
    let mut out = Vec::new();
    for change in payload.entry.into_iter().flat_map(|e| e.changes) {
        let phone_number_id = change.value.metadata.and_then(|m| m.phone_number_id);
        for raw in change.value.messages {
            let (Some(id), Some(from)) = (raw.id, raw.from) else {
                tracing::debug!("skipping webhook message without id or sender");
                continue;
            };
            out.push(InboundMessage {
                id,
                phone_number_id: phone_number_id.clone(),
                from,
                kind: raw.kind.unwrap_or_else(|| "unknown".to_string()),
                text: raw.text.and_then(|t| t.body),
            });
        }
    }
    Ok(out)
}

/// Messages in `payload` not delivered before. Call once per delivery, before
/// any side-effecting work.
pub fn admit(gate: &DedupGate, payload: &serde_json::Value) -> Result<Vec<InboundMessage>, InboundError> {
    let messages = parse_messages(payload)?;
    let total = messages.len();
    let fresh: Vec<_> = messages.into_iter().filter(|m| !gate.seen(&m.id)).collect();
    if fresh.len() < total {
        tracing::info!(total, fresh = fresh.len(), "webhook delivery contained repeats");
    }
    Ok(fresh)
}
