//! HTTP surface of a network node.
//!
//! All five fixed endpoints go through the [`NodeApi`] trait so the
//! connector can be tested against a scripted implementation. The
//! [`HttpNodeApi`] implementation records every exchange, success or
//! failure, as an HTTP trace in the audit log.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audit::{AuditLog, LogRecord};
use crate::config::Endpoint;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    Event, EventResponse, HealthResponse, PollResponse, RegisterRequest, RegisterResponse,
    UnregisterRequest,
};

/// The node's request surface. Paths are fixed contracts, not configurable.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn health(&self) -> ClientResult<HealthResponse>;
    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse>;
    async fn unregister(&self, request: &UnregisterRequest) -> ClientResult<()>;
    async fn send_event(&self, event: &Event) -> ClientResult<EventResponse>;
    async fn poll(&self, agent_id: &str, secret: Option<&str>) -> ClientResult<PollResponse>;
}

/// `reqwest`-backed [`NodeApi`] with a per-request timeout.
pub struct HttpNodeApi {
    client: reqwest::Client,
    endpoint: Endpoint,
    audit: Arc<AuditLog>,
}

impl HttpNodeApi {
    pub fn new(
        endpoint: Endpoint,
        request_timeout: Duration,
        audit: Arc<AuditLog>,
    ) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            audit,
        })
    }

    fn trace(
        &self,
        method: &str,
        path: &str,
        url: &str,
        request_body: Option<String>,
        response_body: Option<String>,
        status: Option<u16>,
        started: Instant,
        error: Option<String>,
    ) {
        self.audit.add(LogRecord::HttpTrace {
            method: method.to_string(),
            url: url.to_string(),
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            path: path.to_string(),
            request_body,
            response_body,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        });
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.endpoint.base_url(), path);
        let started = Instant::now();

        let response = match self.client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                let error: ClientError = e.into();
                self.trace(
                    "GET",
                    path,
                    &url,
                    None,
                    None,
                    None,
                    started,
                    Some(error.to_string()),
                );
                return Err(error);
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        self.trace(
            "GET",
            path,
            &url,
            None,
            Some(text.clone()),
            Some(status.as_u16()),
            started,
            None,
        );

        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "GET {} failed: {} - {}",
                path, status, text
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            ClientError::Protocol(format!("Failed to parse {} response: {}", path, e))
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.endpoint.base_url(), path);
        let request_body = serde_json::to_string(body).ok();
        let started = Instant::now();

        let response = match self.client.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                let error: ClientError = e.into();
                self.trace(
                    "POST",
                    path,
                    &url,
                    request_body,
                    None,
                    None,
                    started,
                    Some(error.to_string()),
                );
                return Err(error);
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        self.trace(
            "POST",
            path,
            &url,
            request_body,
            Some(text.clone()),
            Some(status.as_u16()),
            started,
            None,
        );

        if !status.is_success() {
            return Err(ClientError::Transport(format!(
                "POST {} failed: {} - {}",
                path, status, text
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            ClientError::Protocol(format!("Failed to parse {} response: {}", path, e))
        })
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn health(&self) -> ClientResult<HealthResponse> {
        self.get_json("/api/health", &[]).await
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<RegisterResponse> {
        self.post_json("/api/register", request).await
    }

    async fn unregister(&self, request: &UnregisterRequest) -> ClientResult<()> {
        let _: serde_json::Value = self.post_json("/api/unregister", request).await?;
        Ok(())
    }

    async fn send_event(&self, event: &Event) -> ClientResult<EventResponse> {
        self.post_json("/api/send_event", event).await
    }

    async fn poll(&self, agent_id: &str, secret: Option<&str>) -> ClientResult<PollResponse> {
        let mut query: Vec<(&str, &str)> = vec![("agent_id", agent_id)];
        if let Some(secret) = secret {
            query.push(("secret", secret));
        }
        self.get_json("/api/poll", &query).await
    }
}
