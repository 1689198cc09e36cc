//! Append-only audit log of sent/received events and raw HTTP traffic.
//!
//! The log is a newest-first ring buffer capped at [`MAX_LOG_ENTRIES`],
//! persisted as a single JSON blob through a [`LogStore`]. Persistence
//! degrades gracefully: a failed save halves the retained entries and
//! retries once, then disables persistence for the rest of the session.
//! In-memory logging always continues.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::protocol::{Event, EventResponse};

/// Maximum retained entries; the oldest are evicted first.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Direction of a logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

/// The two audit record variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// A domain event that passed through the connector.
    Event {
        direction: Direction,
        event: Event,
        /// Present for sent events: the synchronous response.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<EventResponse>,
    },
    /// A raw HTTP exchange with the node.
    HttpTrace {
        method: String,
        url: String,
        host: String,
        port: u16,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// A single audit entry. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: u64,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// Durable blob store for the serialized log.
pub trait LogStore: Send + Sync {
    fn save(&self, blob: &str) -> io::Result<()>;
    fn load(&self) -> io::Result<Option<String>>;
    fn clear(&self) -> io::Result<()>;
}

/// File-backed [`LogStore`], one JSON document per log.
pub struct FileLogStore {
    path: PathBuf,
}

impl FileLogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LogStore for FileLogStore {
    fn save(&self, blob: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, blob)
    }

    fn load(&self) -> io::Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&self.path).map(Some)
    }

    fn clear(&self) -> io::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

struct AuditState {
    entries: VecDeque<LogEntry>,
    store: Box<dyn LogStore>,
    persist_enabled: bool,
    max_entries: usize,
}

/// Capacity-bounded audit sink with durable persistence and snapshot
/// subscriptions. Constructed once at the composition root and injected
/// into the connector and HTTP layer.
pub struct AuditLog {
    state: Mutex<AuditState>,
    snapshot: watch::Sender<Vec<LogEntry>>,
}

impl AuditLog {
    /// Create a log over the given store, loading any persisted entries.
    pub fn new(store: Box<dyn LogStore>) -> Self {
        Self::with_capacity(store, MAX_LOG_ENTRIES)
    }

    pub fn with_capacity(store: Box<dyn LogStore>, max_entries: usize) -> Self {
        let entries = Self::load_validated(store.as_ref(), max_entries);
        let (snapshot, _) = watch::channel(entries.iter().cloned().collect());
        Self {
            state: Mutex::new(AuditState {
                entries,
                store,
                persist_enabled: true,
                max_entries,
            }),
            snapshot,
        }
    }

    /// Load persisted entries, discarding the entire blob if any entry
    /// fails validation. Corrupt or foreign data is never partially trusted.
    fn load_validated(store: &dyn LogStore, max_entries: usize) -> VecDeque<LogEntry> {
        let blob = match store.load() {
            Ok(Some(blob)) => blob,
            Ok(None) => return VecDeque::new(),
            Err(e) => {
                tracing::warn!("Failed to load persisted audit log: {}", e);
                return VecDeque::new();
            }
        };

        let parsed: Vec<LogEntry> = match serde_json::from_str(&blob) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Discarding corrupt persisted audit log: {}", e);
                return VecDeque::new();
            }
        };

        if parsed
            .iter()
            .any(|entry| entry.id.is_empty() || entry.timestamp == 0)
        {
            tracing::warn!("Discarding persisted audit log with invalid entries");
            return VecDeque::new();
        }

        parsed.into_iter().take(max_entries).collect()
    }

    /// Append a record. Evicts the oldest entry past capacity, persists,
    /// and publishes a fresh snapshot to subscribers.
    pub fn add(&self, record: LogRecord) {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            record,
        };

        let snapshot = {
            let mut state = self.state.lock().expect("audit log lock poisoned");
            state.entries.push_front(entry);
            while state.entries.len() > state.max_entries {
                state.entries.pop_back();
            }
            Self::persist(&mut state);
            state.entries.iter().cloned().collect::<Vec<_>>()
        };
        let _ = self.snapshot.send(snapshot);
    }

    /// Persist the current entries, halving and retrying once on failure
    /// before disabling persistence for the remainder of the session.
    fn persist(state: &mut AuditState) {
        if !state.persist_enabled {
            return;
        }
        if Self::save_entries(state).is_ok() {
            return;
        }

        let keep = state.entries.len() / 2;
        state.entries.truncate(keep);
        tracing::warn!(
            retained = keep,
            "Audit log persistence failed, halved retained entries"
        );

        if let Err(e) = Self::save_entries(state) {
            state.persist_enabled = false;
            tracing::warn!(
                "Audit log persistence disabled for this session: {}",
                e
            );
        }
    }

    fn save_entries(state: &AuditState) -> io::Result<()> {
        let entries: Vec<&LogEntry> = state.entries.iter().collect();
        let blob = serde_json::to_string(&entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        state.store.save(&blob)
    }

    /// Record an outbound event and its synchronous response.
    pub fn record_sent(&self, event: &Event, response: &EventResponse) {
        self.add(LogRecord::Event {
            direction: Direction::Sent,
            event: event.clone(),
            response: Some(response.clone()),
        });
    }

    /// Record an inbound event delivered by the poll loop.
    pub fn record_received(&self, event: &Event) {
        self.add(LogRecord::Event {
            direction: Direction::Received,
            event: event.clone(),
            response: None,
        });
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.state.lock().expect("audit log lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page-based retrieval, newest first. Pages are zero-indexed.
    pub fn get_page(&self, page: usize, page_size: usize) -> Vec<LogEntry> {
        let state = self.state.lock().expect("audit log lock poisoned");
        state
            .entries
            .iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect()
    }

    /// Empty both memory and the durable store.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock().expect("audit log lock poisoned");
            state.entries.clear();
            if let Err(e) = state.store.clear() {
                tracing::warn!("Failed to clear persisted audit log: {}", e);
            }
        }
        let _ = self.snapshot.send(Vec::new());
    }

    /// Subscribe to full-snapshot updates. The receiver holds the current
    /// log contents and is notified on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<LogEntry>> {
        self.snapshot.subscribe()
    }
}
