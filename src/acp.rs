//! Calling side of the agent protocol, plus its transports.
//!
//! A [`Caller`] stamps each request with a correlation ID, refuses to reuse
//! an ID that is still in flight, waits for the response under a fixed
//! timeout, and checks that the response answers the request it sent.
//!
//! Transports only move envelopes:
//!
//! | Transport | Carries envelopes over |
//! |-----------|------------------------|
//! | [`InProcessTransport`] | a Tokio mpsc queue serviced by a responder task |
//! | [`HttpTransport`] | `POST {base}/acp` with a JSON body |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use docent_core::protocol::{AgentEnvelope, InFlight, Responder};
use docent_core::{Error, Result};

/// Code used when the transport itself fails.
const TRANSPORT_ERROR: i64 = -32603;

fn transport_error(message: impl Into<String>) -> Error {
    Error::Remote {
        code: TRANSPORT_ERROR,
        message: message.into(),
    }
}

/// Delivers a pending envelope and returns the resolved one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: AgentEnvelope) -> Result<AgentEnvelope>;
}

// ============ In-process ============

type Delivery = (AgentEnvelope, oneshot::Sender<AgentEnvelope>);

/// Queue transport to a responder running in the same process.
#[derive(Clone)]
pub struct InProcessTransport {
    queue: mpsc::Sender<Delivery>,
}

impl InProcessTransport {
    /// Spawn a task that serves `responder` from a queue of `capacity`.
    /// Each envelope is handled on its own task, so slow methods do not
    /// hold up the queue.
    pub fn spawn(responder: Responder, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(capacity.max(1));
        tokio::spawn(async move {
            while let Some((envelope, reply)) = rx.recv().await {
                let responder = responder.clone();
                tokio::spawn(async move {
                    let resolved = responder.respond(envelope).await;
                    // The caller may have timed out and gone away.
                    let _ = reply.send(resolved);
                });
            }
        });
        Self { queue: tx }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, envelope: AgentEnvelope) -> Result<AgentEnvelope> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue
            .send((envelope, reply_tx))
            .await
            .map_err(|_| transport_error("responder queue is closed"))?;
        reply_rx
            .await
            .map_err(|_| transport_error("responder dropped the call"))
    }
}

// ============ HTTP ============

/// Posts envelopes to a remote `/acp` endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:7331`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/acp", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: AgentEnvelope) -> Result<AgentEnvelope> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| transport_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(transport_error(format!("HTTP {}: {}", status, body)));
        }
        response
            .json::<AgentEnvelope>()
            .await
            .map_err(|e| transport_error(format!("invalid envelope: {}", e)))
    }
}

// ============ Caller ============

/// Issues envelopes and awaits their resolution.
#[derive(Clone)]
pub struct Caller {
    transport: Arc<dyn Transport>,
    in_flight: InFlight,
    timeout: Duration,
    protocol_version: String,
}

impl Caller {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            in_flight: InFlight::new(),
            timeout,
            protocol_version: docent_core::protocol::PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Call `method` with a fresh correlation ID.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.send(AgentEnvelope::request(method, params)).await
    }

    /// Send a caller-built envelope. Fails with
    /// [`Error::DuplicateCorrelation`] if its correlation ID is in flight.
    pub async fn send(&self, mut envelope: AgentEnvelope) -> Result<Value> {
        if envelope.is_resolved() {
            return Err(Error::InvalidInput(format!(
                "envelope {} is already resolved",
                envelope.correlation_id
            )));
        }
        envelope.protocol_version = self.protocol_version.clone();
        let _guard = self.in_flight.begin(&envelope.correlation_id)?;
        let correlation_id = envelope.correlation_id.clone();
        let method = envelope.method.clone();
        tracing::debug!(%correlation_id, %method, "acp call");

        let response = tokio::time::timeout(self.timeout, self.transport.send(envelope))
            .await
            .map_err(|_| {
                tracing::warn!(%correlation_id, %method, "acp call timed out");
                Error::Timeout {
                    operation: format!("acp call {}", method),
                    after_ms: self.timeout.as_millis() as u64,
                }
            })??;

        if response.correlation_id != correlation_id {
            return Err(Error::InvalidInput(format!(
                "response correlation id {} does not match request {}",
                response.correlation_id, correlation_id
            )));
        }
        response.into_outcome()
    }

    /// Number of calls still awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
