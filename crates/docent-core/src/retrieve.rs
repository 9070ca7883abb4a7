//! Conversation-scoped retrieval.
//!
//! [`Retriever::retrieve`] embeds a query, scans only the chunks of the
//! `Ready` documents linked to the requesting conversation, applies an
//! optional score floor, and returns the top `k` results ranked by score
//! (ties broken by ascending chunk ordinal, then document ID).
//!
//! Every result is checked against the conversation's document set before
//! it is returned. A result outside that set means the store ignored the
//! scan filter; it is reported as [`Error::IsolationViolation`] rather than
//! silently dropped.

use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{DocumentStatus, RetrievalResult};
use crate::store::{ChunkStore, ConversationStore, ScanFilter};

pub struct Retriever {
    chunks: Arc<dyn ChunkStore>,
    conversations: Arc<dyn ConversationStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            chunks,
            conversations,
            embedder,
        }
    }

    /// IDs of the conversation's linked documents that are `Ready`.
    pub async fn searchable_documents(&self, conversation_id: &str) -> Result<Vec<String>> {
        let linked = self.conversations.conversation_documents(conversation_id).await?;
        let mut ready = Vec::with_capacity(linked.len());
        for id in linked {
            if let Some(doc) = self.chunks.document(&id).await? {
                if doc.status == DocumentStatus::Ready {
                    ready.push(id);
                }
            }
        }
        Ok(ready)
    }

    /// Top-`k` chunks for `query` within the conversation's documents.
    ///
    /// An empty result is valid. A conversation with no `Ready` documents
    /// returns immediately without embedding the query.
    pub async fn retrieve(
        &self,
        conversation_id: &str,
        query: &str,
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let scope = self.searchable_documents(conversation_id).await?;
        if scope.is_empty() {
            tracing::debug!(conversation_id, "no ready documents linked; skipping retrieval");
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;
        if query_vec.len() != self.embedder.dims() {
            return Err(Error::DimensionMismatch {
                expected: self.embedder.dims(),
                actual: query_vec.len(),
            });
        }

        let allowed: HashSet<&str> = scope.iter().map(String::as_str).collect();
        let mut results = self
            .chunks
            .scan(&query_vec, k, &ScanFilter::documents(scope.clone()))
            .await?;

        if let Some(stray) = results
            .iter()
            .find(|r| !allowed.contains(r.document_id.as_str()))
        {
            tracing::error!(
                conversation_id,
                document_id = %stray.document_id,
                "retrieval returned a chunk outside the conversation"
            );
            return Err(Error::IsolationViolation {
                conversation_id: conversation_id.to_string(),
                document_id: stray.document_id.clone(),
            });
        }

        if let Some(floor) = min_score {
            results.retain(|r| r.score >= floor);
        }

        tracing::debug!(
            conversation_id,
            documents = allowed.len(),
            results = results.len(),
            "retrieved chunks"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk, make_chunk};
    use crate::embedding::HashingEmbedder;
    use crate::models::{Chunk, Document};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    async fn ingest(store: &InMemoryStore, embedder: &HashingEmbedder, text: &str) -> String {
        let doc = Document::new("test", text);
        store.create_document(&doc).await.unwrap();
        let spans = chunk(text, 8, 2).unwrap();
        let chunks: Vec<Chunk> = spans
            .iter()
            .map(|s| make_chunk(&doc.id, text, s, embedder.embed_sync(s.text(text))))
            .collect();
        store.put_chunks(&doc.id, &chunks).await.unwrap();
        store.set_status(&doc.id, &DocumentStatus::Ready).await.unwrap();
        doc.id
    }

    fn retriever(store: Arc<InMemoryStore>, embedder: HashingEmbedder) -> Retriever {
        Retriever::new(store.clone(), store, Arc::new(embedder))
    }

    #[tokio::test]
    async fn test_retrieve_is_scoped_to_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = HashingEmbedder::new(128);
        let mine = ingest(&store, &embedder, "Rust ownership rules and the borrow checker.").await;
        let theirs = ingest(&store, &embedder, "Rust ownership rules and the borrow checker.").await;
        store.link_document("c1", &mine).await.unwrap();
        store.link_document("c2", &theirs).await.unwrap();

        let r = retriever(store, embedder);
        let results = r.retrieve("c1", "borrow checker", 10, None).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|res| res.document_id == mine));
    }

    #[tokio::test]
    async fn test_results_non_increasing() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = HashingEmbedder::new(128);
        let text = "Tokio runs async tasks. Axum serves HTTP. Sqlx talks to SQLite. \
                    Serde handles JSON. Clap parses flags. Tracing writes logs.";
        let id = ingest(&store, &embedder, text).await;
        store.link_document("c", &id).await.unwrap();

        let r = retriever(store, embedder);
        let results = r.retrieve("c", "async tasks with tokio", 10, None).await.unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                assert!(pair[0].ordinal < pair[1].ordinal);
            }
        }
        for (i, res) in results.iter().enumerate() {
            assert_eq!(res.rank, i + 1);
        }
    }

    #[tokio::test]
    async fn test_min_score_and_empty_scope() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = HashingEmbedder::new(128);
        let id = ingest(&store, &embedder, "completely unrelated gardening advice").await;
        store.link_document("c", &id).await.unwrap();

        let r = retriever(store, embedder);
        let results = r.retrieve("c", "quantum chromodynamics", 5, Some(0.99)).await.unwrap();
        assert!(results.is_empty());
        assert!(r.retrieve("nobody", "anything", 5, None).await.unwrap().is_empty());
        assert!(matches!(
            r.retrieve("c", "   ", 5, None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_documents_are_not_searched() {
        let store = Arc::new(InMemoryStore::new());
        let embedder = HashingEmbedder::new(64);
        let id = ingest(&store, &embedder, "ready text about cats").await;
        store.set_status(&id, &DocumentStatus::Processing).await.unwrap();
        store.link_document("c", &id).await.unwrap();

        let r = retriever(store, embedder);
        assert!(r.retrieve("c", "cats", 5, None).await.unwrap().is_empty());
    }

    /// A store that ignores the scan filter.
    struct LeakyStore(InMemoryStore);

    #[async_trait]
    impl ChunkStore for LeakyStore {
        async fn create_document(&self, doc: &Document) -> Result<()> {
            self.0.create_document(doc).await
        }
        async fn document(&self, id: &str) -> Result<Option<Document>> {
            self.0.document(id).await
        }
        async fn set_status(&self, id: &str, status: &DocumentStatus) -> Result<()> {
            self.0.set_status(id, status).await
        }
        async fn transition(
            &self,
            id: &str,
            expected: &DocumentStatus,
            next: &DocumentStatus,
        ) -> Result<bool> {
            self.0.transition(id, expected, next).await
        }
        async fn begin_attempt(&self, id: &str, attempt: &str) -> Result<bool> {
            self.0.begin_attempt(id, attempt).await
        }
        async fn complete_attempt(
            &self,
            id: &str,
            attempt: &str,
            chunks: &[Chunk],
        ) -> Result<bool> {
            self.0.complete_attempt(id, attempt, chunks).await
        }
        async fn fail_attempt(&self, id: &str, attempt: &str, cause: &str) -> Result<bool> {
            self.0.fail_attempt(id, attempt, cause).await
        }
        async fn put_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
            self.0.put_chunks(document_id, chunks).await
        }
        async fn scan(
            &self,
            query: &[f32],
            k: usize,
            _filter: &ScanFilter,
        ) -> Result<Vec<RetrievalResult>> {
            self.0.scan(query, k, &ScanFilter::default()).await
        }
        async fn delete_document(&self, id: &str) -> Result<bool> {
            self.0.delete_document(id).await
        }
        async fn chunk_count(&self) -> Result<usize> {
            self.0.chunk_count().await
        }
        async fn document_chunk_count(&self, document_id: &str) -> Result<usize> {
            self.0.document_chunk_count(document_id).await
        }
        async fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
            self.0.chunks(document_id).await
        }
    }

    #[tokio::test]
    async fn test_leaky_store_is_isolation_violation() {
        let inner = InMemoryStore::new();
        let embedder = HashingEmbedder::new(64);
        let mine = ingest(&inner, &embedder, "shared words here").await;
        let _other = ingest(&inner, &embedder, "shared words here").await;

        let leaky = Arc::new(LeakyStore(inner));
        let r = Retriever::new(leaky, Arc::new(LinkOnly(mine)), Arc::new(embedder));
        let err = r.retrieve("c", "shared words", 10, None).await.unwrap_err();
        assert!(matches!(err, Error::IsolationViolation { .. }));
        assert!(!err.is_retryable());
    }

    /// Conversation store with a single linked document.
    struct LinkOnly(String);

    #[async_trait]
    impl ConversationStore for LinkOnly {
        async fn link_document(&self, _c: &str, _d: &str) -> Result<()> {
            Ok(())
        }
        async fn conversation_documents(&self, _c: &str) -> Result<Vec<String>> {
            Ok(vec![self.0.clone()])
        }
        async fn append_turns(
            &self,
            _c: &str,
            _turns: &[crate::models::NewTurn],
        ) -> Result<Vec<crate::models::ConversationTurn>> {
            Ok(Vec::new())
        }
        async fn history(&self, _c: &str) -> Result<Vec<crate::models::ConversationTurn>> {
            Ok(Vec::new())
        }
    }
}
