//! The agent call envelope.
//!
//! Wire shape (camelCase JSON):
//!
//! ```json
//! { "protocolVersion": "1.0", "correlationId": "…", "method": "read_file",
//!   "params": { … }, "result": { … } }
//! ```
//!
//! `result` and `error` are both absent while the envelope is pending and
//! exactly one is present once it is resolved. Resolution happens once;
//! a second attempt fails with [`Error::DoubleResolution`] and leaves the
//! first outcome in place.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Protocol version spoken by this implementation.
pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub code: i64,
    pub message: String,
}

impl From<&Error> for EnvelopeError {
    fn from(err: &Error) -> Self {
        let message = match err {
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self {
            code: err.code(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEnvelope {
    pub protocol_version: String,
    pub correlation_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
}

impl AgentEnvelope {
    /// A pending request with a fresh correlation ID.
    pub fn request(method: impl Into<String>, params: Value) -> Self {
        Self::with_correlation(uuid::Uuid::new_v4().to_string(), method, params)
    }

    pub fn with_correlation(
        correlation_id: impl Into<String>,
        method: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            correlation_id: correlation_id.into(),
            method: method.into(),
            params,
            result: None,
            error: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }

    /// Resolve with a successful result.
    pub fn resolve_ok(&mut self, result: Value) -> Result<()> {
        self.ensure_pending()?;
        self.result = Some(result);
        Ok(())
    }

    /// Resolve with an error.
    pub fn resolve_err(&mut self, err: &Error) -> Result<()> {
        self.ensure_pending()?;
        self.error = Some(EnvelopeError::from(err));
        Ok(())
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.is_resolved() {
            return Err(Error::DoubleResolution(self.correlation_id.clone()));
        }
        Ok(())
    }

    /// Check the structural invariant: never both `result` and `error`.
    pub fn validate(&self) -> Result<()> {
        if self.result.is_some() && self.error.is_some() {
            return Err(Error::InvalidInput(format!(
                "envelope {} carries both result and error",
                self.correlation_id
            )));
        }
        if self.method.is_empty() {
            return Err(Error::InvalidInput("envelope method is empty".into()));
        }
        Ok(())
    }

    /// Whether this envelope's protocol major version matches ours.
    pub fn is_compatible(&self) -> bool {
        major(&self.protocol_version) == major(PROTOCOL_VERSION)
    }

    /// Consume a resolved envelope into the call outcome.
    ///
    /// Well-known error codes map back to their typed variants; anything
    /// else becomes [`Error::Remote`].
    pub fn into_outcome(self) -> Result<Value> {
        self.validate()?;
        match (self.result, self.error) {
            (Some(value), None) => Ok(value),
            (None, Some(err)) => Err(error_from_wire(err)),
            _ => Err(Error::InvalidInput(format!(
                "envelope {} is not resolved",
                self.correlation_id
            ))),
        }
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

fn error_from_wire(err: EnvelopeError) -> Error {
    match err.code {
        -32601 => Error::MethodNotFound(err.message),
        -32602 => Error::InvalidParams(err.message),
        -32004 => Error::DuplicateCorrelation(err.message),
        -32005 => Error::DoubleResolution(err.message),
        code => Error::Remote {
            code,
            message: err.message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_pending() {
        let env = AgentEnvelope::with_correlation("c-1", "read_file", json!({"file_path": "a"}));
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(
            wire,
            json!({
                "protocolVersion": "1.0",
                "correlationId": "c-1",
                "method": "read_file",
                "params": {"file_path": "a"}
            })
        );
    }

    #[test]
    fn test_wire_shape_resolved_error() {
        let mut env = AgentEnvelope::with_correlation("c-2", "nope", json!({}));
        env.resolve_err(&Error::MethodNotFound("nope".into())).unwrap();
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["error"], json!({"code": -32601, "message": "method not found: nope"}));
        assert!(wire.get("result").is_none());
    }

    #[test]
    fn test_double_resolution_rejected() {
        let mut env = AgentEnvelope::request("m", json!({}));
        env.resolve_ok(json!(1)).unwrap();
        let err = env.resolve_ok(json!(2)).unwrap_err();
        assert!(matches!(err, Error::DoubleResolution(_)));
        assert!(env.resolve_err(&Error::Cancelled).is_err());
        // First outcome stands.
        assert_eq!(env.result, Some(json!(1)));
        assert!(env.error.is_none());
    }

    #[test]
    fn test_outcome_maps_codes() {
        let mut env = AgentEnvelope::request("m", json!({}));
        env.resolve_err(&Error::InvalidParams("missing repo_url".into())).unwrap();
        assert!(matches!(env.into_outcome(), Err(Error::InvalidParams(_))));

        let mut env = AgentEnvelope::request("m", json!({}));
        env.resolve_err(&Error::Storage("disk".into())).unwrap();
        assert!(matches!(
            env.into_outcome(),
            Err(Error::Remote { code: -32603, .. })
        ));

        let pending = AgentEnvelope::request("m", json!({}));
        assert!(pending.into_outcome().is_err());
    }

    #[test]
    fn test_both_result_and_error_is_invalid() {
        let raw = json!({
            "protocolVersion": "1.0",
            "correlationId": "x",
            "method": "m",
            "params": {},
            "result": 1,
            "error": {"code": -32000, "message": "boom"}
        });
        let env: AgentEnvelope = serde_json::from_value(raw).unwrap();
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_version_compatibility() {
        let mut env = AgentEnvelope::request("m", json!(null));
        assert!(env.is_compatible());
        env.protocol_version = "1.7".into();
        assert!(env.is_compatible());
        env.protocol_version = "2.0".into();
        assert!(!env.is_compatible());
    }
}
