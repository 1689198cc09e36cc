//! Connection configuration: endpoint, agent identity, and connector tunables.
//!
//! An `Endpoint` and the requested agent id are supplied at construction and
//! are read-only for the lifetime of a connector, with one exception: the
//! effective agent id may be reassigned exactly once by identity-conflict
//! resolution during registration.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// A network node endpoint. Immutable for the lifetime of a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    /// Optional network identifier, used for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls: false,
            network_id: None,
        }
    }

    pub fn with_tls(mut self) -> Self {
        self.use_tls = true;
        self
    }

    pub fn with_network_id(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    /// Base URL for API requests, e.g. `http://localhost:8570`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// The agent identity used on the wire.
///
/// `requested_id` is the user-chosen name and never changes. `effective_id`
/// starts equal to it and may be reassigned once, to
/// `"{requested_id}_{epoch_millis}"`, when the server reports a name
/// conflict. All protocol frames carry the effective id.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    requested_id: String,
    effective_id: String,
    reassigned: bool,
}

impl AgentIdentity {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let requested_id = agent_id.into();
        let effective_id = requested_id.clone();
        Self {
            requested_id,
            effective_id,
            reassigned: false,
        }
    }

    pub fn requested_id(&self) -> &str {
        &self.requested_id
    }

    pub fn effective_id(&self) -> &str {
        &self.effective_id
    }

    /// Reassign the effective id with an epoch-millis disambiguator.
    ///
    /// Returns `false` without changing anything if a reassignment has
    /// already happened; conflict resolution is a one-shot remedy.
    pub(crate) fn reassign(&mut self, epoch_millis: u64) -> bool {
        if self.reassigned {
            return false;
        }
        self.effective_id = format!("{}_{}", self.requested_id, epoch_millis);
        self.reassigned = true;
        true
    }
}

/// Registration options sent alongside the agent id.
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Human-readable name shown to other agents.
    pub display_name: Option<String>,
    /// Free-form metadata object merged into the registration frame.
    pub metadata: serde_json::Value,
    /// Optional network password. Hashed before it reaches the wire.
    pub password: Option<String>,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            display_name: None,
            metadata: serde_json::json!({}),
            password: None,
        }
    }
}

impl RegisterOptions {
    /// SHA-256 hex digest of the password, if one is set.
    pub fn password_hash(&self) -> Option<String> {
        self.password.as_ref().map(|password| {
            let mut hasher = Sha256::new();
            hasher.update(password.as_bytes());
            hex::encode(hasher.finalize())
        })
    }
}

/// Connector timing and retry tunables.
///
/// Defaults match the protocol contract: a 2-second poll interval and a
/// 5-attempt reconnection budget with exponential backoff capped at 30
/// seconds. Tests shrink the delays to milliseconds.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_schemes() {
        let plain = Endpoint::new("localhost", 8570);
        assert_eq!(plain.base_url(), "http://localhost:8570");

        let tls = Endpoint::new("node.example.com", 443).with_tls();
        assert_eq!(tls.base_url(), "https://node.example.com:443");
    }

    #[test]
    fn test_identity_reassigns_exactly_once() {
        let mut identity = AgentIdentity::new("alice");
        assert_eq!(identity.effective_id(), "alice");

        assert!(identity.reassign(1700000000000));
        assert_eq!(identity.effective_id(), "alice_1700000000000");
        assert_eq!(identity.requested_id(), "alice");

        // Second reassignment is refused and the id is unchanged.
        assert!(!identity.reassign(1700000000999));
        assert_eq!(identity.effective_id(), "alice_1700000000000");
    }

    #[test]
    fn test_password_hash_is_sha256_hex() {
        let options = RegisterOptions {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let hash = options.password_hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        let no_password = RegisterOptions::default();
        assert!(no_password.password_hash().is_none());
    }
}
