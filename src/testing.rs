//! Shared test doubles: a scripted `NodeApi` and a throwaway audit log.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audit::{AuditLog, LogStore};
use crate::error::{ClientError, ClientResult};
use crate::node::NodeApi;
use crate::protocol::{
    Event, EventResponse, HealthResponse, PollResponse, RegisterRequest, RegisterResponse,
    UnregisterRequest,
};

/// In-memory-only audit log for connector and session tests.
pub(crate) fn null_audit() -> Arc<AuditLog> {
    struct NullStore;
    impl LogStore for NullStore {
        fn save(&self, _blob: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn load(&self) -> std::io::Result<Option<String>> {
            Ok(None)
        }
        fn clear(&self) -> std::io::Result<()> {
            Ok(())
        }
    }
    Arc::new(AuditLog::new(Box::new(NullStore)))
}

/// Scripted node. Queued results are consumed in order; an empty queue
/// yields a benign success (healthy node, registration with a secret,
/// empty poll, accepted event).
pub(crate) struct MockNodeApi {
    health_results: Mutex<VecDeque<ClientResult<HealthResponse>>>,
    register_results: Mutex<VecDeque<ClientResult<RegisterResponse>>>,
    poll_results: Mutex<VecDeque<ClientResult<PollResponse>>>,
    send_results: Mutex<VecDeque<ClientResult<EventResponse>>>,
    pub health_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub register_calls: Mutex<Vec<RegisterRequest>>,
    pub send_calls: Mutex<Vec<Event>>,
    pub unregister_calls: Mutex<Vec<UnregisterRequest>>,
    /// When set, `health()` sleeps before answering (for re-entrancy tests).
    pub health_delay: Mutex<Option<Duration>>,
}

impl MockNodeApi {
    pub fn new() -> Self {
        Self {
            health_results: Mutex::new(VecDeque::new()),
            register_results: Mutex::new(VecDeque::new()),
            poll_results: Mutex::new(VecDeque::new()),
            send_results: Mutex::new(VecDeque::new()),
            health_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            register_calls: Mutex::new(Vec::new()),
            send_calls: Mutex::new(Vec::new()),
            unregister_calls: Mutex::new(Vec::new()),
            health_delay: Mutex::new(None),
        }
    }

    pub fn push_health(&self, result: ClientResult<HealthResponse>) {
        self.health_results.lock().unwrap().push_back(result);
    }

    pub fn push_register(&self, result: ClientResult<RegisterResponse>) {
        self.register_results.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: ClientResult<PollResponse>) {
        self.poll_results.lock().unwrap().push_back(result);
    }

    pub fn push_send(&self, result: ClientResult<EventResponse>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub fn transport_error() -> ClientError {
        ClientError::Transport("connection refused".to_string())
    }

    pub fn conflict_response() -> RegisterResponse {
        RegisterResponse {
            success: false,
            secret: None,
            error_message: Some("Agent ID already registered".to_string()),
        }
    }

    pub fn not_registered_poll() -> PollResponse {
        PollResponse {
            success: false,
            messages: Vec::new(),
            error_message: Some("Agent not registered".to_string()),
        }
    }
}

#[async_trait]
impl NodeApi for MockNodeApi {
    async fn health(&self) -> ClientResult<HealthResponse> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.health_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.health_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(HealthResponse::default()))
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse> {
        self.register_calls.lock().unwrap().push(request.clone());
        let scripted = self.register_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(RegisterResponse {
                success: true,
                secret: Some("s3cret".to_string()),
                error_message: None,
            })
        })
    }

    async fn unregister(&self, request: &UnregisterRequest) -> ClientResult<()> {
        self.unregister_calls.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn send_event(&self, event: &Event) -> ClientResult<EventResponse> {
        self.send_calls.lock().unwrap().push(event.clone());
        let scripted = self.send_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(EventResponse {
                success: true,
                message: "ok".to_string(),
                data: None,
                event_name: Some(event.event_name.clone()),
            })
        })
    }

    async fn poll(&self, _agent_id: &str, _secret: Option<&str>) -> ClientResult<PollResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.poll_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(PollResponse {
                success: true,
                messages: Vec::new(),
                error_message: None,
            })
        })
    }
}
