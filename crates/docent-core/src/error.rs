//! Error taxonomy shared by every Docent component.
//!
//! Each variant carries a stable protocol error code (see [`Error::code`])
//! so that failures can cross the agent protocol boundary unchanged.

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the ingestion, retrieval, context, or
/// agent protocol layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad caller input. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding capability failed after exhausting its retry budget.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation capability failed after exhausting its retry budget.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(String),

    /// Retrieval returned a chunk owned by a document outside the
    /// conversation's document set. Always a bug; never retried.
    #[error("isolation violation: chunk of document {document_id} surfaced for conversation {conversation_id}")]
    IsolationViolation {
        conversation_id: String,
        document_id: String,
    },

    /// A caller reused a correlation ID that is still in flight.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(String),

    /// A responder tried to resolve an envelope that is already resolved.
    #[error("envelope {0} already resolved")]
    DoubleResolution(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Cooperative cancellation of an ingestion unit of work.
    #[error("cancelled")]
    Cancelled,

    /// A remote call exceeded its fixed time budget.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The newest conversation turn does not fit the context budget even
    /// after every chunk has been truncated away.
    #[error("context budget exceeded: need {required} tokens, {available} available")]
    ContextBudgetExceeded { required: usize, available: usize },

    /// An embedding vector does not have the configured dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(String),

    /// Failure inside a storage backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// An error returned by a peer over the agent protocol.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

impl Error {
    /// Wrap any displayable backend error as [`Error::Storage`].
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }

    /// Protocol error code for this error.
    ///
    /// The JSON-RPC reserved codes are used where a direct equivalent
    /// exists; the remainder live in the implementation-defined
    /// `-32000..-32099` range.
    pub fn code(&self) -> i64 {
        match self {
            Error::InvalidInput(_) => -32600,
            Error::MethodNotFound(_) => -32601,
            Error::InvalidParams(_) => -32602,
            Error::Storage(_) => -32603,
            Error::EmbeddingUnavailable(_) => -32001,
            Error::GenerationUnavailable(_) => -32002,
            Error::IsolationViolation { .. } => -32003,
            Error::DuplicateCorrelation(_) => -32004,
            Error::DoubleResolution(_) => -32005,
            Error::Cancelled => -32006,
            Error::Timeout { .. } => -32007,
            Error::ContextBudgetExceeded { .. } => -32008,
            Error::DimensionMismatch { .. } => -32009,
            Error::NotFound(_) => -32010,
            Error::Remote { code, .. } => *code,
        }
    }

    /// Whether a remote-capability retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_) | Error::GenerationUnavailable(_) | Error::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_codes() {
        assert_eq!(Error::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(Error::InvalidParams("x".into()).code(), -32602);
        assert_eq!(Error::DoubleResolution("c".into()).code(), -32005);
        assert_eq!(
            Error::Remote {
                code: -32000,
                message: "tool failed".into()
            }
            .code(),
            -32000
        );
    }

    #[test]
    fn test_display() {
        let err = Error::Timeout {
            operation: "embedding".into(),
            after_ms: 1500,
        };
        assert_eq!(err.to_string(), "embedding timed out after 1500ms");
    }

    #[test]
    fn test_isolation_is_not_retryable() {
        let err = Error::IsolationViolation {
            conversation_id: "c1".into(),
            document_id: "d2".into(),
        };
        assert!(!err.is_retryable());
        assert!(Error::EmbeddingUnavailable("503".into()).is_retryable());
    }
}
