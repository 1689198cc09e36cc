//! Typed notification bus for connector and session subscribers.
//!
//! Replaces string-keyed callback registration with a tagged union carried
//! over a broadcast channel. Prefix-wildcard subscription by event name is
//! preserved through [`TopicFilter::EventName`] and a small pattern matcher.

use tokio::sync::broadcast;

use crate::message::ThreadMessage;
use crate::protocol::Event;

/// Everything the core publishes to subscribers.
#[derive(Debug, Clone)]
pub enum Notification {
    Connected { agent_id: String },
    Disconnected,
    ConnectionError { message: String },
    Reconnecting { attempt: u32, delay_ms: u64 },
    Reconnected { agent_id: String },
    /// Terminal: the retry budget is exhausted. A fresh manual `connect()`
    /// is required.
    ConnectionLost,
    /// The server no longer knows this agent. The page layer must wipe
    /// session state and return to network selection.
    SessionInvalidated { message: String },
    /// Raw inbound event from the poll loop.
    Event(Event),
    /// Normalized chat message, emitted by the session façade.
    Message(ThreadMessage),
}

impl Notification {
    fn is_lifecycle(&self) -> bool {
        !matches!(self, Notification::Event(_) | Notification::Message(_))
    }
}

/// Subscription topics.
#[derive(Debug, Clone)]
pub enum TopicFilter {
    /// Every notification.
    All,
    /// Connection lifecycle only.
    Lifecycle,
    /// Raw inbound events only.
    RawEvents,
    /// Normalized messages only.
    Messages,
    /// Raw inbound events whose name matches the pattern (exact name,
    /// `"*"`, or a trailing-wildcard prefix like `"thread.*"`).
    EventName(String),
}

impl TopicFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            TopicFilter::All => true,
            TopicFilter::Lifecycle => notification.is_lifecycle(),
            TopicFilter::RawEvents => matches!(notification, Notification::Event(_)),
            TopicFilter::Messages => matches!(notification, Notification::Message(_)),
            TopicFilter::EventName(pattern) => match notification {
                Notification::Event(event) => matches_pattern(pattern, &event.event_name),
                _ => false,
            },
        }
    }
}

/// Match an event name against a subscription pattern. A trailing `*`
/// matches any suffix, so `"*"` matches everything and `"thread.*"`
/// matches every name under the `thread.` prefix.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

/// Broadcast bus shared by the connector and the session façade.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. Lagging or absent subscribers
    /// are not an error.
    pub fn emit(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: TopicFilter) -> FilteredSubscription {
        FilteredSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

/// A broadcast receiver that skips notifications outside its topic.
pub struct FilteredSubscription {
    rx: broadcast::Receiver<Notification>,
    filter: TopicFilter,
}

impl FilteredSubscription {
    /// Receive the next matching notification. Lagged skips are tolerated;
    /// `None` means the bus is closed.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if self.filter.matches(&notification) => {
                    return Some(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
