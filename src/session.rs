//! Session façade: typed event vocabulary over a transport connector.
//!
//! Translates domain calls (direct/channel messages, reactions, history and
//! roster retrieval) into the generic event envelope, and normalizes raw
//! inbound events into [`ThreadMessage`]s re-emitted on the shared bus.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::audit::AuditLog;
use crate::bus::{matches_pattern, FilteredSubscription, Notification, TopicFilter};
use crate::config::{ConnectorConfig, Endpoint, RegisterOptions};
use crate::connector::Connector;
use crate::error::ClientResult;
use crate::message::{normalize_event, normalize_stored_message, ReplyRef, ThreadMessage};
use crate::node::{HttpNodeApi, NodeApi};
use crate::protocol::{Event, EventResponse, Visibility};

/// Event vocabulary used on the wire.
pub mod events {
    pub const DIRECT_MESSAGE_POST: &str = "thread.direct_message.post";
    pub const CHANNEL_MESSAGE_POST: &str = "thread.channel_message.post";
    pub const REACTION_ADD: &str = "thread.reaction.add";
    pub const REACTION_REMOVE: &str = "thread.reaction.remove";
    pub const CHANNELS_LIST: &str = "thread.channels.list";
    pub const CHANNEL_MESSAGES_GET: &str = "thread.channel_messages.get";
    pub const DIRECT_MESSAGES_GET: &str = "thread.direct_messages.get";
    pub const AGENTS_LIST: &str = "network.agents.list";
}

/// Channels presented when the server returns none, so a fresh network
/// never shows an empty UI.
pub const DEFAULT_CHANNELS: [&str; 3] = ["general", "development", "support"];

/// A channel known to the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A peer agent on the network roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

/// Chat session with one network node.
///
/// All operations are non-throwing: failures come back as failure
/// [`EventResponse`]s or empty result sets, never panics or `Err`s.
pub struct NetworkSession {
    connector: Connector,
    fanout: JoinHandle<()>,
}

impl NetworkSession {
    /// Build a session over HTTP with the given audit sink injected.
    pub fn new(
        endpoint: Endpoint,
        agent_id: impl Into<String>,
        options: RegisterOptions,
        config: ConnectorConfig,
        audit: Arc<AuditLog>,
    ) -> ClientResult<Self> {
        let api = HttpNodeApi::new(endpoint, config.request_timeout, audit.clone())?;
        Ok(Self::with_api(Arc::new(api), agent_id, options, config, audit))
    }

    /// Build a session over an arbitrary [`NodeApi`] implementation.
    pub fn with_api(
        api: Arc<dyn NodeApi>,
        agent_id: impl Into<String>,
        options: RegisterOptions,
        config: ConnectorConfig,
        audit: Arc<AuditLog>,
    ) -> Self {
        let connector = Connector::new(api, agent_id, options, config, audit);
        let fanout = Self::spawn_fanout(&connector);
        Self { connector, fanout }
    }

    /// Normalization fan-out: raw message-bearing events become canonical
    /// [`ThreadMessage`]s on the same bus. Unparseable events are logged
    /// and dropped inside the normalizer.
    fn spawn_fanout(connector: &Connector) -> JoinHandle<()> {
        let bus = connector.bus().clone();
        let mut rx = bus.subscribe_filtered(TopicFilter::RawEvents);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let Notification::Event(event) = notification else {
                    continue;
                };
                if !is_message_event(&event.event_name) {
                    continue;
                }
                if let Some(message) = normalize_event(&event) {
                    bus.emit(Notification::Message(message));
                }
            }
        })
    }

    pub async fn connect(&self) -> bool {
        self.connector.connect().await
    }

    pub async fn disconnect(&self) {
        self.connector.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    pub async fn agent_id(&self) -> String {
        self.connector.agent_id().await
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.connector.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: TopicFilter) -> FilteredSubscription {
        self.connector.subscribe_filtered(filter)
    }

    /// Generic escape hatch for events outside the typed vocabulary.
    pub async fn send_event(&self, event: Event) -> EventResponse {
        self.connector.send_event(event).await
    }

    pub async fn send_direct_message(&self, target_agent_id: &str, text: &str) -> EventResponse {
        let event = Event::new(events::DIRECT_MESSAGE_POST, json!({ "text": text }))
            .with_target(target_agent_id)
            .with_visibility(Visibility::Direct);
        self.connector.send_event(event).await
    }

    /// Post to a channel, optionally as a threaded reply quoting an earlier
    /// message.
    pub async fn send_channel_message(
        &self,
        channel: &str,
        text: &str,
        reply_to: Option<&ReplyRef>,
    ) -> EventResponse {
        let mut payload = json!({ "channel": channel, "text": text });
        if let Some(reply) = reply_to {
            payload["quoted_message_id"] = json!(reply.message_id);
            if let Some(quoted_text) = &reply.quoted_text {
                payload["quoted_text"] = json!(quoted_text);
            }
        }
        let event = Event::new(events::CHANNEL_MESSAGE_POST, payload)
            .with_visibility(Visibility::Channel);
        self.connector.send_event(event).await
    }

    pub async fn add_reaction(&self, message_id: &str, reaction: &str) -> EventResponse {
        self.send_reaction(events::REACTION_ADD, message_id, reaction)
            .await
    }

    pub async fn remove_reaction(&self, message_id: &str, reaction: &str) -> EventResponse {
        self.send_reaction(events::REACTION_REMOVE, message_id, reaction)
            .await
    }

    /// Servers may accept the HTTP call yet reject the reaction in the
    /// response data, so the inner `success` flag is checked too.
    async fn send_reaction(&self, name: &str, message_id: &str, reaction: &str) -> EventResponse {
        let event = Event::new(
            name,
            json!({ "message_id": message_id, "reaction": reaction }),
        );
        let response = self.connector.send_event(event).await;
        if response.success && !response.domain_success() {
            let message = response
                .data
                .as_ref()
                .and_then(|data| data.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("Reaction rejected by server")
                .to_string();
            return EventResponse {
                success: false,
                message,
                data: response.data,
                event_name: response.event_name,
            };
        }
        response
    }

    /// List channels, falling back to [`DEFAULT_CHANNELS`] when the server
    /// has none configured.
    pub async fn get_channels(&self) -> Vec<ChannelInfo> {
        let event = Event::new(events::CHANNELS_LIST, json!({}));
        let response = self.connector.send_event(event).await;
        let channels = parse_list::<ChannelInfo>(&response, "channels");
        if channels.is_empty() {
            return DEFAULT_CHANNELS
                .iter()
                .map(|name| ChannelInfo {
                    name: name.to_string(),
                    description: None,
                })
                .collect();
        }
        channels
    }

    pub async fn get_channel_messages(&self, channel: &str) -> Vec<ThreadMessage> {
        let event = Event::new(events::CHANNEL_MESSAGES_GET, json!({ "channel": channel }));
        let response = self.connector.send_event(event).await;
        parse_messages(&response)
    }

    pub async fn get_direct_messages(&self, with_agent_id: &str) -> Vec<ThreadMessage> {
        let event = Event::new(
            events::DIRECT_MESSAGES_GET,
            json!({ "agent_id": with_agent_id }),
        );
        let response = self.connector.send_event(event).await;
        parse_messages(&response)
    }

    pub async fn get_connected_agents(&self) -> Vec<AgentInfo> {
        let event = Event::new(events::AGENTS_LIST, json!({}));
        let response = self.connector.send_event(event).await;
        parse_list::<AgentInfo>(&response, "agents")
    }
}

impl Drop for NetworkSession {
    fn drop(&mut self) {
        self.fanout.abort();
    }
}

fn is_message_event(name: &str) -> bool {
    matches_pattern("thread.direct_message.*", name)
        || matches_pattern("thread.channel_message.*", name)
}

fn parse_list<T: serde::de::DeserializeOwned>(response: &EventResponse, key: &str) -> Vec<T> {
    if !response.success {
        tracing::warn!(key, "Retrieval failed: {}", response.message);
        return Vec::new();
    }
    response
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_messages(response: &EventResponse) -> Vec<ThreadMessage> {
    if !response.success {
        tracing::warn!("Message retrieval failed: {}", response.message);
        return Vec::new();
    }
    response
        .data
        .as_ref()
        .and_then(|data| data.get("messages"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(normalize_stored_message).collect())
        .unwrap_or_default()
}
