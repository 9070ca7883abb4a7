//! Envelope dispatch.
//!
//! [`Responder::respond`] resolves one incoming envelope:
//!
//! 1. Reject envelopes that are already resolved or structurally invalid.
//! 2. Reject incompatible protocol versions.
//! 3. Look up the method; unknown methods resolve to `MethodNotFound`
//!    without touching any handler.
//! 4. Validate params against the handler's schema (`InvalidParams`).
//! 5. Invoke the handler and resolve with its result or error.

use std::sync::Arc;

use tracing::Instrument;

use crate::error::Error;

use super::envelope::{AgentEnvelope, PROTOCOL_VERSION};
use super::registry::{validate_params, MethodRegistry};

#[derive(Clone)]
pub struct Responder {
    registry: Arc<MethodRegistry>,
}

impl Responder {
    pub fn new(registry: MethodRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Resolve `envelope` exactly once and return it.
    pub async fn respond(&self, envelope: AgentEnvelope) -> AgentEnvelope {
        let span = tracing::info_span!(
            "acp.respond",
            correlation_id = %envelope.correlation_id,
            method = %envelope.method
        );
        self.dispatch(envelope).instrument(span).await
    }

    async fn dispatch(&self, mut envelope: AgentEnvelope) -> AgentEnvelope {
        if envelope.is_resolved() {
            tracing::warn!("received an already-resolved envelope");
            return rejected(&envelope, Error::DoubleResolution(envelope.correlation_id.clone()));
        }
        if let Err(err) = envelope.validate() {
            return rejected(&envelope, err);
        }
        if !envelope.is_compatible() {
            let err = Error::InvalidInput(format!(
                "unsupported protocol version {} (expected {})",
                envelope.protocol_version, PROTOCOL_VERSION
            ));
            return rejected(&envelope, err);
        }

        let Some(handler) = self.registry.get(&envelope.method) else {
            tracing::debug!("method not found");
            return rejected(&envelope, Error::MethodNotFound(envelope.method.clone()));
        };

        let outcome = match validate_params(&handler.input_schema(), &envelope.params) {
            Ok(params) => handler.invoke(params).await,
            Err(err) => Err(err),
        };

        let resolved = match outcome {
            Ok(value) => envelope.resolve_ok(value),
            Err(err) => {
                tracing::debug!(code = err.code(), error = %err, "method failed");
                envelope.resolve_err(&err)
            }
        };
        if let Err(err) = resolved {
            tracing::error!(error = %err, "envelope resolution failed");
        }
        envelope
    }
}

/// A fresh resolved copy of `envelope` carrying `err`.
fn rejected(envelope: &AgentEnvelope, err: Error) -> AgentEnvelope {
    let mut out = AgentEnvelope::with_correlation(
        envelope.correlation_id.clone(),
        envelope.method.clone(),
        envelope.params.clone(),
    );
    out.protocol_version = envelope.protocol_version.clone();
    // A fresh envelope is pending, so this cannot fail.
    let _ = out.resolve_err(&err);
    out
}
