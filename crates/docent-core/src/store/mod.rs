//! Storage abstraction for Docent.
//!
//! Two traits split the persistence surface the core needs:
//!
//! - [`ChunkStore`]: documents, their status, their chunk sets, and the
//!   similarity scan.
//! - [`ConversationStore`]: conversation ↔ document links and the
//!   append-only turn history.
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! SQLite backend lives in the app crate; [`memory::InMemoryStore`] is the
//! runtime-free reference backend.
//!
//! # Atomicity
//!
//! [`ChunkStore::put_chunks`] must be atomic: a reader sees either the
//! complete new chunk set for a document or the previous one, never a mix.
//! [`ChunkStore::complete_attempt`] additionally couples that write to the
//! `Processing → Ready` change, guarded by the attempt that claimed the
//! document. [`ConversationStore::append_turns`] assigns gapless sequence
//! numbers to all given turns in one step.
//!
//! # Attempts
//!
//! Every ingestion run claims a document under a fresh attempt ID with
//! [`ChunkStore::begin_attempt`]. Once a document is cancelled and retried,
//! the earlier run's ID no longer matches, so its late
//! `complete_attempt`/`fail_attempt` calls change nothing.

pub mod memory;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, ConversationTurn, Document, DocumentStatus, NewTurn, RetrievalResult};

/// Restricts a similarity scan to a set of documents.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Only chunks of these documents are scored. `None` scans everything.
    pub document_ids: Option<Vec<String>>,
}

impl ScanFilter {
    pub fn documents(ids: Vec<String>) -> Self {
        Self {
            document_ids: Some(ids),
        }
    }

    pub fn allows(&self, document_id: &str) -> bool {
        match &self.document_ids {
            Some(ids) => ids.iter().any(|id| id == document_id),
            None => true,
        }
    }
}

/// Durable mapping from documents to their chunk sets.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](ChunkStore::create_document) | Insert a new document |
/// | [`document`](ChunkStore::document) | Fetch a document with its status |
/// | [`set_status`](ChunkStore::set_status) | Unconditional status change |
/// | [`transition`](ChunkStore::transition) | Compare-and-set status change |
/// | [`begin_attempt`](ChunkStore::begin_attempt) | Claim a pending document |
/// | [`complete_attempt`](ChunkStore::complete_attempt) | Store chunks and mark ready |
/// | [`fail_attempt`](ChunkStore::fail_attempt) | Mark a claimed document failed |
/// | [`put_chunks`](ChunkStore::put_chunks) | Atomically replace a chunk set |
/// | [`scan`](ChunkStore::scan) | Cosine similarity scan |
/// | [`delete_document`](ChunkStore::delete_document) | Delete with cascade |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn create_document(&self, doc: &Document) -> Result<()>;

    async fn document(&self, id: &str) -> Result<Option<Document>>;

    /// Set a document's status. Fails with [`Error::NotFound`] for an
    /// unknown document.
    async fn set_status(&self, id: &str, status: &DocumentStatus) -> Result<()>;

    /// Set `next` only if the current status has the same label as
    /// `expected`. Returns whether the change was applied.
    async fn transition(
        &self,
        id: &str,
        expected: &DocumentStatus,
        next: &DocumentStatus,
    ) -> Result<bool>;

    /// Move a `Pending` document to `Processing` and record `attempt` as its
    /// owner. Returns `false` if the document was not pending.
    async fn begin_attempt(&self, id: &str, attempt: &str) -> Result<bool>;

    /// Replace the document's chunks with `chunks` and mark it `Ready`, in
    /// one atomic step. Applies only while the document is `Processing`
    /// under `attempt`; otherwise nothing is written and `false` is
    /// returned.
    async fn complete_attempt(&self, id: &str, attempt: &str, chunks: &[Chunk])
        -> Result<bool>;

    /// Mark the document `Failed { cause }` if it is still `Processing`
    /// under `attempt`.
    async fn fail_attempt(&self, id: &str, attempt: &str, cause: &str) -> Result<bool>;

    /// Replace every chunk of `document_id` with `chunks` in one atomic step.
    /// An empty slice clears the document's chunks.
    async fn put_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Score stored chunks against `query` and return the top `k`, ranked.
    async fn scan(&self, query: &[f32], k: usize, filter: &ScanFilter)
        -> Result<Vec<RetrievalResult>>;

    /// Delete a document, its chunks, and its conversation links.
    /// Returns `false` if the document did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Total chunks across all documents.
    async fn chunk_count(&self) -> Result<usize>;

    async fn document_chunk_count(&self, document_id: &str) -> Result<usize>;

    /// Chunks of a document, ordered by ordinal.
    async fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;
}

/// Conversation links and turn history.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Associate a document with a conversation. Idempotent.
    async fn link_document(&self, conversation_id: &str, document_id: &str) -> Result<()>;

    /// IDs of every document linked to the conversation, in link order.
    async fn conversation_documents(&self, conversation_id: &str) -> Result<Vec<String>>;

    /// Append turns with consecutive sequence numbers continuing from the
    /// conversation's last turn. Either all turns are recorded or none.
    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
    ) -> Result<Vec<ConversationTurn>>;

    /// All turns of a conversation, oldest first.
    async fn history(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>>;
}

/// Validate a chunk set before it is written.
///
/// Every chunk must belong to `document_id`, ordinals must run `0..n`
/// without gaps, and all vectors must share one dimensionality.
pub fn validate_chunk_set(document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let dims = chunks.first().map(|c| c.embedding.len()).unwrap_or(0);
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.document_id != document_id {
            return Err(Error::InvalidInput(format!(
                "chunk {} belongs to document {}, not {}",
                chunk.id, chunk.document_id, document_id
            )));
        }
        if chunk.ordinal != i {
            return Err(Error::InvalidInput(format!(
                "chunk ordinals must be contiguous: expected {}, got {}",
                i, chunk.ordinal
            )));
        }
        if chunk.embedding.len() != dims {
            return Err(Error::DimensionMismatch {
                expected: dims,
                actual: chunk.embedding.len(),
            });
        }
    }
    Ok(())
}

/// Score a chunk against a query vector as an unranked result.
pub fn score_chunk(query: &[f32], chunk: &Chunk) -> RetrievalResult {
    RetrievalResult {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        ordinal: chunk.ordinal,
        text: chunk.text.clone(),
        token_count: chunk.token_count,
        score: cosine_similarity(query, &chunk.embedding),
        rank: 0,
    }
}

/// Sort by score descending, then ordinal and document ID ascending, keep
/// the first `k`, and assign 1-based ranks.
pub fn rank_results(mut results: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.ordinal.cmp(&b.ordinal))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    results.truncate(k);
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
    results
}
