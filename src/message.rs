//! Canonical thread-message model and inbound normalization.
//!
//! Servers have shipped at least two payload encodings for chat messages:
//! the message object nested under `payload.message`, and message fields
//! flat on `payload`. Decoding is an ordered chain of parser strategies
//! tried in turn, first match wins; events no strategy can parse are logged
//! and dropped so the fan-out never crashes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::protocol::Event;

/// Kind of a canonical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Direct,
    Channel,
    Reply,
}

/// A file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Reply/quote linkage to an earlier message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_text: Option<String>,
}

/// Normalized view of a chat message, regardless of the wire shape it
/// arrived in. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub sender_id: String,
    pub timestamp_ms: u64,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyRef>,
    #[serde(default)]
    pub thread_depth: u32,
    /// Reaction type to count. Always non-negative integers.
    #[serde(default)]
    pub reactions: HashMap<String, u32>,
}

/// Normalize a reaction map. The server sends either an array of reactor
/// ids or a raw integer per reaction type; both become counts, clamped to
/// non-negative.
pub fn normalize_reactions(raw: Option<&Value>) -> HashMap<String, u32> {
    let mut reactions = HashMap::new();
    let Some(Value::Object(map)) = raw else {
        return reactions;
    };
    for (reaction, value) in map {
        let count = match value {
            Value::Array(reactors) => reactors.len() as u32,
            Value::Number(n) => n
                .as_i64()
                .map(|n| n.max(0) as u32)
                .or_else(|| n.as_u64().map(|n| n.min(u32::MAX as u64) as u32))
                .unwrap_or(0),
            _ => continue,
        };
        reactions.insert(reaction.clone(), count);
    }
    reactions
}

/// Fallback values taken from the enclosing event envelope.
struct EnvelopeContext<'a> {
    event_id: &'a str,
    source_id: &'a str,
    timestamp_secs: Option<u64>,
    target_agent_id: Option<&'a str>,
    channel_hint: Option<&'a str>,
}

/// Decode an inbound event into a canonical message, or `None` if no
/// strategy recognizes it.
pub fn normalize_event(event: &Event) -> Option<ThreadMessage> {
    let context = EnvelopeContext {
        event_id: &event.event_id,
        source_id: &event.source_id,
        timestamp_secs: event.timestamp,
        target_agent_id: event.target_agent_id.as_deref(),
        channel_hint: event.payload.get("channel").and_then(Value::as_str),
    };

    // Strategy 1: message object nested under payload.message.
    if let Some(nested) = event.payload.get("message").and_then(Value::as_object) {
        if let Some(message) = parse_message_object(nested, &context) {
            return Some(message);
        }
    }

    // Strategy 2: message fields flat on the payload.
    if let Some(flat) = event.payload.as_object() {
        if let Some(message) = parse_message_object(flat, &context) {
            return Some(message);
        }
    }

    tracing::warn!(
        event_name = %event.event_name,
        event_id = %event.event_id,
        "Dropping unparseable inbound message event"
    );
    None
}

/// Decode a bare message object (as returned by the history retrieval
/// operations, outside any event envelope).
pub fn normalize_stored_message(value: &Value) -> Option<ThreadMessage> {
    let object = value.as_object()?;
    let context = EnvelopeContext {
        event_id: "",
        source_id: "",
        timestamp_secs: None,
        target_agent_id: None,
        channel_hint: None,
    };
    parse_message_object(object, &context)
}

fn parse_message_object(
    object: &serde_json::Map<String, Value>,
    context: &EnvelopeContext<'_>,
) -> Option<ThreadMessage> {
    // Text is the one required field; its absence sends us to the next
    // strategy in the chain.
    let text = object
        .get("text")
        .or_else(|| object.get("content"))
        .and_then(Value::as_str)?
        .to_string();

    let id = object
        .get("message_id")
        .or_else(|| object.get("id"))
        .and_then(Value::as_str)
        .unwrap_or(context.event_id)
        .to_string();
    if id.is_empty() {
        return None;
    }

    let sender_id = object
        .get("sender_id")
        .or_else(|| object.get("from"))
        .and_then(Value::as_str)
        .unwrap_or(context.source_id)
        .to_string();
    if sender_id.is_empty() {
        return None;
    }

    // Wire timestamps are Unix seconds; the canonical model is milliseconds.
    let timestamp_secs = object
        .get("timestamp")
        .and_then(Value::as_u64)
        .or(context.timestamp_secs)
        .unwrap_or(0);
    let timestamp_ms = timestamp_secs.saturating_mul(1000);

    let channel = object
        .get("channel")
        .and_then(Value::as_str)
        .or(context.channel_hint)
        .map(str::to_string);

    let target_agent_id = object
        .get("target_agent_id")
        .and_then(Value::as_str)
        .or(context.target_agent_id)
        .map(str::to_string);

    let reply_to = parse_reply_ref(object);
    let kind = if reply_to.is_some() {
        MessageKind::Reply
    } else if channel.is_some() {
        MessageKind::Channel
    } else {
        MessageKind::Direct
    };

    let thread_depth = object
        .get("thread_depth")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;

    Some(ThreadMessage {
        id,
        sender_id,
        timestamp_ms,
        text,
        attachments: parse_attachments(object),
        kind,
        channel,
        target_agent_id,
        reply_to,
        thread_depth,
        reactions: normalize_reactions(object.get("reactions")),
    })
}

fn parse_reply_ref(object: &serde_json::Map<String, Value>) -> Option<ReplyRef> {
    let message_id = object
        .get("quoted_message_id")
        .or_else(|| object.get("reply_to"))
        .and_then(Value::as_str)?
        .to_string();
    Some(ReplyRef {
        message_id,
        quoted_text: object
            .get("quoted_text")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_attachments(object: &serde_json::Map<String, Value>) -> Vec<Attachment> {
    let files = object
        .get("files")
        .or_else(|| object.get("attachments"))
        .and_then(Value::as_array);
    let Some(files) = files else {
        return Vec::new();
    };
    files
        .iter()
        .filter_map(|file| {
            let name = file.get("name").and_then(Value::as_str)?.to_string();
            Some(Attachment {
                name,
                url: file.get("url").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(payload: Value) -> Event {
        let mut event = Event::new("thread.channel_message.post", payload);
        event.source_id = "bob".to_string();
        event.timestamp = Some(1700000000);
        event
    }

    #[test]
    fn test_reaction_array_normalizes_to_count() {
        let reactions = normalize_reactions(Some(&json!({"like": ["a", "b", "c"]})));
        assert_eq!(reactions["like"], 3);
    }

    #[test]
    fn test_reaction_integer_passes_through() {
        let reactions = normalize_reactions(Some(&json!({"like": 5})));
        assert_eq!(reactions["like"], 5);
    }

    #[test]
    fn test_reaction_negative_clamps_to_zero() {
        let reactions = normalize_reactions(Some(&json!({"like": -2})));
        assert_eq!(reactions["like"], 0);
    }

    #[test]
    fn test_nested_payload_shape() {
        let event = inbound(json!({
            "channel": "general",
            "message": {
                "message_id": "m1",
                "sender_id": "carol",
                "text": "hello",
                "timestamp": 1700000100,
                "reactions": {"wave": ["bob"]}
            }
        }));
        let message = normalize_event(&event).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.sender_id, "carol");
        assert_eq!(message.text, "hello");
        assert_eq!(message.timestamp_ms, 1700000100000);
        assert_eq!(message.channel.as_deref(), Some("general"));
        assert_eq!(message.kind, MessageKind::Channel);
        assert_eq!(message.reactions["wave"], 1);
    }

    #[test]
    fn test_flat_payload_shape_falls_back_to_envelope() {
        let event = inbound(json!({"text": "hi there"}));
        let message = normalize_event(&event).unwrap();
        assert_eq!(message.id, event.event_id);
        assert_eq!(message.sender_id, "bob");
        // Envelope seconds converted to milliseconds.
        assert_eq!(message.timestamp_ms, 1700000000000);
        assert_eq!(message.kind, MessageKind::Direct);
    }

    #[test]
    fn test_reply_linkage_sets_reply_kind() {
        let event = inbound(json!({
            "channel": "general",
            "text": "agreed",
            "quoted_message_id": "m7",
            "quoted_text": "ship it",
            "thread_depth": 2
        }));
        let message = normalize_event(&event).unwrap();
        assert_eq!(message.kind, MessageKind::Reply);
        let reply = message.reply_to.unwrap();
        assert_eq!(reply.message_id, "m7");
        assert_eq!(reply.quoted_text.as_deref(), Some("ship it"));
        assert_eq!(message.thread_depth, 2);
    }

    #[test]
    fn test_unparseable_event_is_dropped() {
        let event = inbound(json!({"status": "typing"}));
        assert!(normalize_event(&event).is_none());

        let not_an_object = inbound(json!("just a string"));
        assert!(normalize_event(&not_an_object).is_none());
    }

    #[test]
    fn test_attachments_parsed_leniently() {
        let event = inbound(json!({
            "text": "see attached",
            "files": [
                {"name": "report.pdf", "url": "http://n/report.pdf"},
                {"url": "http://n/unnamed"},
                {"name": "notes.txt"}
            ]
        }));
        let message = normalize_event(&event).unwrap();
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].name, "report.pdf");
        assert!(message.attachments[1].url.is_none());
    }

    #[test]
    fn test_stored_message_requires_own_identity() {
        let message = normalize_stored_message(&json!({
            "message_id": "m9",
            "sender_id": "dave",
            "text": "from history",
            "timestamp": 1700000200
        }))
        .unwrap();
        assert_eq!(message.id, "m9");
        assert_eq!(message.timestamp_ms, 1700000200000);

        // Without an id of its own there is no envelope to fall back on.
        assert!(normalize_stored_message(&json!({"text": "orphan"})).is_none());
    }
}
