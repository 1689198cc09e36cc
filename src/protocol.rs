//! Wire types for the fixed node HTTP contract.
//!
//! All five endpoints (`/api/health`, `/api/register`, `/api/unregister`,
//! `/api/send_event`, `/api/poll`) exchange JSON. Event timestamps are Unix
//! seconds on the wire; the canonical message model converts to milliseconds
//! at the normalization boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Visibility scope of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Network,
    Channel,
    Direct,
}

/// The uniform outbound/inbound event envelope.
///
/// The connector stamps any missing `event_id`, `timestamp`, `source_id`,
/// and `secret` before transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub event_id: String,
    pub event_name: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub visibility: Visibility,
    /// Unix seconds. `None` until stamped by the connector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Event {
    /// Create an event with a freshly generated id and the given payload.
    pub fn new(event_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_name: event_name.into(),
            source_id: String::new(),
            target_agent_id: None,
            payload,
            metadata: serde_json::json!({}),
            visibility: Visibility::Network,
            timestamp: None,
            secret: None,
        }
    }

    pub fn with_target(mut self, target_agent_id: impl Into<String>) -> Self {
        self.target_agent_id = Some(target_agent_id.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Synchronous result of `/api/send_event`. Never retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Echo of the originating event name, when the server provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
}

impl EventResponse {
    /// A synthetic local failure (no network call was made).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            event_name: None,
        }
    }

    /// The transport-level `success` flag is necessary but not sufficient:
    /// servers may accept the HTTP call and still reject the domain
    /// operation via an inner `data.success` field.
    pub fn domain_success(&self) -> bool {
        if !self.success {
            return false;
        }
        !matches!(
            self.data
                .as_ref()
                .and_then(|data| data.get("success"))
                .and_then(serde_json::Value::as_bool),
            Some(false)
        )
    }
}

/// `/api/health` body. Liveness is the 2xx status; the body advertises
/// server capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mods: Vec<String>,
}

/// `/api/register` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// `/api/register` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RegisterResponse {
    /// Whether the rejection message indicates an agent-id conflict, the one
    /// protocol error with built-in automatic remediation.
    pub fn is_identity_conflict(&self) -> bool {
        match &self.error_message {
            Some(message) => {
                let message = message.to_lowercase();
                message.contains("already registered") || message.contains("conflict")
            }
            None => false,
        }
    }
}

/// `/api/unregister` request body. Teardown is best-effort; the secret may
/// be absent on servers that never issued one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisterRequest {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// `/api/poll` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PollResponse {
    /// Whether the server no longer knows this agent. Distinct from a
    /// transport error: it takes the forced-logout path, not reconnection.
    pub fn is_not_registered(&self) -> bool {
        !self.success
            && self
                .error_message
                .as_ref()
                .map(|message| message.to_lowercase().contains("not registered"))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_new_generates_id_and_defaults() {
        let event = Event::new("thread.channel_message.post", json!({"text": "hi"}));
        assert!(!event.event_id.is_empty());
        assert_eq!(event.visibility, Visibility::Network);
        assert!(event.timestamp.is_none());
        assert!(event.secret.is_none());
    }

    #[test]
    fn test_event_serializes_without_unset_optionals() {
        let event = Event::new("x", json!({}));
        let frame = serde_json::to_value(&event).unwrap();
        assert!(frame.get("timestamp").is_none());
        assert!(frame.get("secret").is_none());
        assert!(frame.get("target_agent_id").is_none());
        assert_eq!(frame["visibility"], "network");
    }

    #[test]
    fn test_domain_success_requires_inner_flag() {
        let mut response = EventResponse {
            success: true,
            message: String::new(),
            data: Some(json!({"success": false, "error": "no such message"})),
            event_name: None,
        };
        assert!(!response.domain_success());

        response.data = Some(json!({"success": true}));
        assert!(response.domain_success());

        // No inner flag at all: outer success is enough.
        response.data = Some(json!({"count": 3}));
        assert!(response.domain_success());

        response.success = false;
        assert!(!response.domain_success());
    }

    #[test]
    fn test_identity_conflict_detection() {
        let conflict = RegisterResponse {
            success: false,
            secret: None,
            error_message: Some("Agent ID already registered".to_string()),
        };
        assert!(conflict.is_identity_conflict());

        let other = RegisterResponse {
            success: false,
            secret: None,
            error_message: Some("Invalid password".to_string()),
        };
        assert!(!other.is_identity_conflict());
    }

    #[test]
    fn test_poll_not_registered_detection() {
        let invalidated: PollResponse = serde_json::from_value(json!({
            "success": false,
            "error_message": "Agent not registered"
        }))
        .unwrap();
        assert!(invalidated.is_not_registered());
        assert!(invalidated.messages.is_empty());

        let transportish: PollResponse = serde_json::from_value(json!({
            "success": false,
            "error_message": "internal error"
        }))
        .unwrap();
        assert!(!transportish.is_not_registered());
    }
}
