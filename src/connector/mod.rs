//! Transport connector: owns the raw HTTP session with one network node.
//!
//! Lifecycle: `connect()` performs health check -> register -> poll loop.
//! Registration conflicts are remediated once with a regenerated agent id.
//! Connection failures feed a single reconnection scheduler task with
//! exponential backoff and a 5-attempt budget; `disconnect()` wins over any
//! pending reconnection via an abort flag checked at the top of every
//! scheduler step and poll tick.

mod backoff;

pub use backoff::ReconnectSchedule;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::bus::{EventBus, FilteredSubscription, Notification, TopicFilter};
use crate::config::{AgentIdentity, ConnectorConfig, RegisterOptions};
use crate::node::NodeApi;
use crate::protocol::{Event, EventResponse, RegisterRequest, UnregisterRequest};

struct SessionState {
    identity: AgentIdentity,
    /// Opaque token issued on registration; absent before registration,
    /// cleared on disconnect.
    secret: Option<String>,
}

struct ConnectorInner {
    api: Arc<dyn NodeApi>,
    audit: Arc<AuditLog>,
    bus: EventBus,
    config: ConnectorConfig,
    options: RegisterOptions,
    state: RwLock<SessionState>,
    connected: AtomicBool,
    connecting: AtomicBool,
    aborted: AtomicBool,
    poll_task: StdMutex<Option<JoinHandle<()>>>,
    reconnect_task: StdMutex<Option<JoinHandle<()>>>,
}

/// Handle to a single-node transport session. Cheap to clone.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    pub fn new(
        api: Arc<dyn NodeApi>,
        agent_id: impl Into<String>,
        options: RegisterOptions,
        config: ConnectorConfig,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectorInner {
                api,
                audit,
                bus: EventBus::new(256),
                config,
                options,
                state: RwLock::new(SessionState {
                    identity: AgentIdentity::new(agent_id),
                    secret: None,
                }),
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                aborted: AtomicBool::new(false),
                poll_task: StdMutex::new(None),
                reconnect_task: StdMutex::new(None),
            }),
        }
    }

    /// Establish the session: health check, registration (with one-shot
    /// identity-conflict remediation), then the poll loop.
    ///
    /// A concurrent call while already connecting is a no-op returning
    /// `false`, not queued. On failure the reconnection scheduler is
    /// started and `false` is returned.
    pub async fn connect(&self) -> bool {
        let inner = &self.inner;
        if inner
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("connect() ignored: already connecting");
            return false;
        }
        inner.aborted.store(false, Ordering::SeqCst);
        inner.stop_poll_task();

        let ok = inner.try_connect(true).await;
        inner.connecting.store(false, Ordering::SeqCst);

        if !ok && !inner.aborted.load(Ordering::SeqCst) {
            inner.clone().spawn_reconnect();
        }
        ok
    }

    /// Tear the session down. Idempotent: repeated calls emit
    /// `Disconnected` at most once. Suppresses any pending reconnection.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.aborted.store(true, Ordering::SeqCst);
        if let Some(handle) = inner.reconnect_task.lock().expect("task lock").take() {
            handle.abort();
        }
        inner.stop_poll_task();

        let was_connected = inner.connected.swap(false, Ordering::SeqCst);
        let (agent_id, secret) = {
            let mut state = inner.state.write().await;
            (state.identity.effective_id().to_string(), state.secret.take())
        };

        if was_connected {
            // Unregistration during teardown is best-effort, never an error.
            let request = UnregisterRequest { agent_id, secret };
            if let Err(e) = inner.api.unregister(&request).await {
                tracing::debug!("Unregister during teardown failed: {}", e);
            }
            inner.bus.emit(Notification::Disconnected);
        }
    }

    /// Send a domain event and return the node's synchronous response.
    ///
    /// Never fails with an `Err`: when disconnected a synthetic failure is
    /// returned without any network call, and transport failures are
    /// converted into failure responses. The (event, response) pair is
    /// always recorded in the audit log when a send was attempted.
    pub async fn send_event(&self, mut event: Event) -> EventResponse {
        let inner = &self.inner;
        if !self.is_connected() {
            return EventResponse::failure("Not connected to a network node");
        }

        {
            let state = inner.state.read().await;
            if event.event_id.is_empty() {
                event.event_id = Uuid::new_v4().to_string();
            }
            if event.timestamp.is_none() {
                event.timestamp = Some(chrono::Utc::now().timestamp() as u64);
            }
            event.source_id = state.identity.effective_id().to_string();
            event.secret = state.secret.clone();
        }

        let response = match inner.api.send_event(&event).await {
            Ok(response) => response,
            Err(e) => EventResponse::failure(e.to_string()),
        };
        inner.audit.record_sent(&event, &response);
        response
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// The identity used on all protocol frames (post conflict resolution).
    pub async fn agent_id(&self) -> String {
        self.inner.state.read().await.identity.effective_id().to_string()
    }

    /// The user-chosen identity, retained for display and retry comparison.
    pub async fn requested_id(&self) -> String {
        self.inner.state.read().await.identity.requested_id().to_string()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notification> {
        self.inner.bus.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: TopicFilter) -> FilteredSubscription {
        self.inner.bus.subscribe_filtered(filter)
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.inner.audit
    }
}

impl ConnectorInner {
    /// One full connection attempt: health check, then registration with at
    /// most one identity-conflict retry. Emits `Connected` on success and
    /// `ConnectionError` on any failure; never schedules reconnection
    /// itself.
    async fn try_connect(self: &Arc<Self>, retry_with_unique_id: bool) -> bool {
        if let Err(e) = self.api.health().await {
            tracing::warn!("Health check failed: {}", e);
            self.bus.emit(Notification::ConnectionError {
                message: e.to_string(),
            });
            return false;
        }

        let mut allow_conflict_retry = retry_with_unique_id;
        loop {
            let request = self.build_register_request().await;
            match self.api.register(&request).await {
                Err(e) => {
                    tracing::warn!("Registration failed: {}", e);
                    self.bus.emit(Notification::ConnectionError {
                        message: e.to_string(),
                    });
                    return false;
                }
                Ok(response) if response.success => {
                    if response.secret.is_none() {
                        tracing::warn!(
                            "Registration succeeded without a session secret (server-dependent)"
                        );
                    }
                    let agent_id = {
                        let mut state = self.state.write().await;
                        state.secret = response.secret;
                        state.identity.effective_id().to_string()
                    };
                    self.connected.store(true, Ordering::SeqCst);
                    self.start_poll_task();
                    tracing::info!(agent_id = %agent_id, "Connected to network node");
                    self.bus.emit(Notification::Connected { agent_id });
                    return true;
                }
                Ok(response) => {
                    if allow_conflict_retry && response.is_identity_conflict() {
                        allow_conflict_retry = false;
                        let millis = chrono::Utc::now().timestamp_millis() as u64;
                        let mut state = self.state.write().await;
                        if state.identity.reassign(millis) {
                            tracing::info!(
                                effective_id = %state.identity.effective_id(),
                                "Agent id conflict, retrying registration with disambiguated id"
                            );
                            continue;
                        }
                    }
                    let message = response
                        .error_message
                        .unwrap_or_else(|| "Registration rejected".to_string());
                    tracing::warn!("Registration rejected: {}", message);
                    self.bus
                        .emit(Notification::ConnectionError { message });
                    return false;
                }
            }
        }
    }

    async fn build_register_request(&self) -> RegisterRequest {
        let state = self.state.read().await;
        let mut metadata = self.options.metadata.clone();
        if !metadata.is_object() {
            metadata = serde_json::json!({});
        }
        if let Some(display_name) = &self.options.display_name {
            metadata["display_name"] = serde_json::Value::String(display_name.clone());
        }
        RegisterRequest {
            agent_id: state.identity.effective_id().to_string(),
            metadata,
            password_hash: self.options.password_hash(),
        }
    }

    fn start_poll_task(self: &Arc<Self>) {
        let inner = self.clone();
        let mut guard = self.poll_task.lock().expect("task lock");
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        *guard = Some(tokio::spawn(async move { inner.poll_loop().await }));
    }

    fn stop_poll_task(&self) {
        if let Some(handle) = self.poll_task.lock().expect("task lock").take() {
            handle.abort();
        }
    }

    /// Fixed-interval poll for asynchronously delivered events.
    ///
    /// A response saying the agent is no longer registered takes the
    /// forced-logout path (one `SessionInvalidated` emission, no
    /// reconnection); any transport failure hands over to the reconnection
    /// scheduler.
    async fn poll_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.aborted.load(Ordering::SeqCst) || !self.connected.load(Ordering::SeqCst) {
                continue;
            }

            let (agent_id, secret) = {
                let state = self.state.read().await;
                (
                    state.identity.effective_id().to_string(),
                    state.secret.clone(),
                )
            };

            match self.api.poll(&agent_id, secret.as_deref()).await {
                Ok(response) if response.is_not_registered() => {
                    tracing::warn!("Session invalidated: agent no longer registered on server");
                    self.state.write().await.secret = None;
                    self.connected.store(false, Ordering::SeqCst);
                    self.bus.emit(Notification::SessionInvalidated {
                        message: response
                            .error_message
                            .unwrap_or_else(|| "Agent not registered".to_string()),
                    });
                    return;
                }
                Ok(response) => {
                    if !response.success {
                        tracing::warn!(
                            "Poll rejected: {}",
                            response.error_message.as_deref().unwrap_or("unknown")
                        );
                        continue;
                    }
                    for event in response.messages {
                        self.audit.record_received(&event);
                        self.bus.emit(Notification::Event(event));
                    }
                }
                Err(e) => {
                    tracing::warn!("Poll failed: {}", e);
                    self.connected.store(false, Ordering::SeqCst);
                    self.bus.emit(Notification::ConnectionError {
                        message: e.to_string(),
                    });
                    if !self.aborted.load(Ordering::SeqCst) {
                        self.clone().spawn_reconnect();
                    }
                    return;
                }
            }
        }
    }

    fn spawn_reconnect(self: Arc<Self>) {
        let mut guard = self.reconnect_task.lock().expect("task lock");
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        let inner = self.clone();
        *guard = Some(tokio::spawn(async move { inner.reconnect_loop().await }));
    }

    /// Single scheduler loop driving all reconnection attempts. The abort
    /// check at the top of each step gives disconnect-wins semantics.
    async fn reconnect_loop(self: Arc<Self>) {
        let mut schedule = ReconnectSchedule::new(
            self.config.max_reconnect_attempts,
            self.config.reconnect_base_delay,
            self.config.reconnect_max_delay,
        );
        loop {
            let Some(delay) = schedule.next_delay() else {
                tracing::warn!("Reconnection budget exhausted, giving up");
                self.bus.emit(Notification::ConnectionLost);
                return;
            };
            self.bus.emit(Notification::Reconnecting {
                attempt: schedule.attempt(),
                delay_ms: delay.as_millis() as u64,
            });
            tokio::time::sleep(delay).await;

            if self.aborted.load(Ordering::SeqCst) || self.connected.load(Ordering::SeqCst) {
                return;
            }
            if self
                .connecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }
            let ok = self.try_connect(true).await;
            self.connecting.store(false, Ordering::SeqCst);
            if ok {
                let agent_id = self.state.read().await.identity.effective_id().to_string();
                self.bus.emit(Notification::Reconnected { agent_id });
                return;
            }
        }
    }
}
