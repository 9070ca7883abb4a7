//! Core data models shared by the ingestion, retrieval, and conversation
//! layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an uploaded document.
///
/// `Pending → Processing → {Ready | Failed}`. A `Failed` document may be
/// re-submitted, which moves it back to `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed { cause: String },
}

/// Cause recorded on a document whose unit of work was cancelled.
pub const CANCELLED_CAUSE: &str = "Cancelled";

impl DocumentStatus {
    /// Short label used for storage and logs.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed { .. } => "failed",
        }
    }

    /// Rebuild a status from its storage label and optional cause.
    pub fn from_label(label: &str, cause: Option<String>) -> Option<Self> {
        match label {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed {
                cause: cause.unwrap_or_default(),
            }),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            DocumentStatus::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    /// True once the unit of work can no longer change the document.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed { .. })
    }

    pub fn failed(cause: impl Into<String>) -> Self {
        DocumentStatus::Failed {
            cause: cause.into(),
        }
    }
}

/// An uploaded document and its ingestion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Where the content came from: an upload filename, URL, or repo path.
    pub origin: String,
    /// Extracted plain text. Re-ingestion always starts from this.
    pub content: String,
    pub status: DocumentStatus,
    /// Ingestion run that last claimed the document. Only that run may
    /// finish it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new `Pending` document with a fresh UUID.
    pub fn new(origin: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            origin: origin.into(),
            content: content.into(),
            status: DocumentStatus::Pending,
            attempt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A bounded, embedded segment of a document.
///
/// Chunks are created once by the ingestion pipeline and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Zero-based position within the document.
    pub ordinal: usize,
    /// Byte offset of the first character of the chunk.
    pub start: usize,
    /// Byte offset one past the last character of the chunk.
    pub end: usize,
    /// Number of leading bytes shared with the previous chunk.
    pub overlap_bytes: usize,
    pub text: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One immutable turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub text: String,
    pub token_count: usize,
    /// Strictly increasing, gapless, starting at 1 per conversation.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// A turn that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: Role,
    pub text: String,
}

impl NewTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// A chunk matched by a similarity scan, with its score and rank.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub token_count: usize,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
    /// 1-based position in the ranked result set.
    pub rank: usize,
}
