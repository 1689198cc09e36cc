//! # OpenAgents Client
//!
//! Event-transport client for OpenAgents multi-agent networks.
//!
//! This library provides:
//! - A transport connector that maintains a logical session with a network
//!   node over plain HTTP (health check, registration, event submission,
//!   2-second poll loop) with bounded-backoff reconnection and one-shot
//!   agent-id conflict resolution
//! - A session façade exposing a typed chat vocabulary (direct and channel
//!   messages, reactions, history and roster retrieval) and canonical
//!   message normalization
//! - An injectable, capacity-bounded audit log of every event and raw HTTP
//!   exchange, persisted with graceful degradation
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │          NetworkSession          │
//!        │  (typed events, normalization)   │
//!        └────────────────┬─────────────────┘
//!                         │
//!                         ▼
//!        ┌──────────────────────────────────┐      ┌────────────┐
//!        │            Connector             │─────▶│  AuditLog  │
//!        │  (register / send / poll loop)   │      └────────────┘
//!        └────────────────┬─────────────────┘
//!                         │
//!                         ▼
//!                ┌─────────────────┐
//!                │  Network node   │
//!                │   (HTTP API)    │
//!                └─────────────────┘
//! ```
//!
//! ## Modules
//! - `connector`: transport session lifecycle and reconnection
//! - `session`: typed façade consumed by page-level collaborators
//! - `audit`: event log / audit sink
//! - `bus`: typed notification bus with prefix-wildcard topics

pub mod audit;
pub mod bus;
pub mod config;
pub mod connector;
pub mod error;
pub mod message;
pub mod node;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditLog, FileLogStore, LogEntry, LogRecord, LogStore};
pub use bus::{EventBus, Notification, TopicFilter};
pub use config::{AgentIdentity, ConnectorConfig, Endpoint, RegisterOptions};
pub use connector::Connector;
pub use error::{ClientError, ClientResult};
pub use message::{MessageKind, ReplyRef, ThreadMessage};
pub use node::{HttpNodeApi, NodeApi};
pub use protocol::{Event, EventResponse, Visibility};
pub use session::{AgentInfo, ChannelInfo, NetworkSession};
