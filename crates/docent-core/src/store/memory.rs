//! In-memory store for testing and embedding in other hosts.
//!
//! All state sits behind a single `std::sync::RwLock`. Each document's chunk
//! set is held in an `Arc<Vec<Chunk>>` and replaced by pointer swap, so a
//! scan always observes a whole chunk set. Vector search is brute-force
//! cosine similarity.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::models::{Chunk, ConversationTurn, Document, DocumentStatus, NewTurn, RetrievalResult};
use crate::tokens::count_tokens;

use super::{
    rank_results, score_chunk, validate_chunk_set, ChunkStore, ConversationStore, ScanFilter,
};

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, Arc<Vec<Chunk>>>,
    /// conversation id → linked document ids, in link order.
    links: HashMap<String, Vec<String>>,
    turns: HashMap<String, Vec<ConversationTurn>>,
}

/// In-memory implementation of both store traits.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::Storage("store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::Storage("store lock poisoned".into()))
    }
}

fn owns(doc: &Document, attempt: &str) -> bool {
    doc.status == DocumentStatus::Processing && doc.attempt.as_deref() == Some(attempt)
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn create_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        if state.docs.contains_key(&doc.id) {
            return Err(Error::InvalidInput(format!(
                "document {} already exists",
                doc.id
            )));
        }
        state.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.docs.get(id).cloned())
    }

    async fn set_status(&self, id: &str, status: &DocumentStatus) -> Result<()> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        doc.status = status.clone();
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        expected: &DocumentStatus,
        next: &DocumentStatus,
    ) -> Result<bool> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if doc.status.label() != expected.label() {
            return Ok(false);
        }
        doc.status = next.clone();
        doc.updated_at = Utc::now();
        Ok(true)
    }

    async fn begin_attempt(&self, id: &str, attempt: &str) -> Result<bool> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if doc.status != DocumentStatus::Pending {
            return Ok(false);
        }
        doc.status = DocumentStatus::Processing;
        doc.attempt = Some(attempt.to_string());
        doc.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_attempt(&self, id: &str, attempt: &str, chunks: &[Chunk]) -> Result<bool> {
        validate_chunk_set(id, chunks)?;
        let replacement = Arc::new(chunks.to_vec());
        let mut guard = self.write()?;
        let state = &mut *guard;
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if !owns(doc, attempt) {
            return Ok(false);
        }
        doc.status = DocumentStatus::Ready;
        doc.updated_at = Utc::now();
        if replacement.is_empty() {
            state.chunks.remove(id);
        } else {
            state.chunks.insert(id.to_string(), replacement);
        }
        Ok(true)
    }

    async fn fail_attempt(&self, id: &str, attempt: &str, cause: &str) -> Result<bool> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        if !owns(doc, attempt) {
            return Ok(false);
        }
        doc.status = DocumentStatus::failed(cause);
        doc.updated_at = Utc::now();
        Ok(true)
    }

    async fn put_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        validate_chunk_set(document_id, chunks)?;
        let replacement = Arc::new(chunks.to_vec());
        let mut state = self.write()?;
        if !state.docs.contains_key(document_id) {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }
        if replacement.is_empty() {
            state.chunks.remove(document_id);
        } else {
            state.chunks.insert(document_id.to_string(), replacement);
        }
        Ok(())
    }

    async fn scan(
        &self,
        query: &[f32],
        k: usize,
        filter: &ScanFilter,
    ) -> Result<Vec<RetrievalResult>> {
        let sets: Vec<Arc<Vec<Chunk>>> = {
            let state = self.read()?;
            state
                .chunks
                .iter()
                .filter(|(doc_id, _)| filter.allows(doc_id))
                .map(|(_, set)| Arc::clone(set))
                .collect()
        };
        let scored = sets
            .iter()
            .flat_map(|set| set.iter())
            .map(|chunk| score_chunk(query, chunk))
            .collect();
        Ok(rank_results(scored, k))
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let existed = state.docs.remove(id).is_some();
        state.chunks.remove(id);
        for linked in state.links.values_mut() {
            linked.retain(|d| d != id);
        }
        Ok(existed)
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.values().map(|set| set.len()).sum())
    }

    async fn document_chunk_count(&self, document_id: &str) -> Result<usize> {
        Ok(self
            .read()?
            .chunks
            .get(document_id)
            .map(|set| set.len())
            .unwrap_or(0))
    }

    async fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        Ok(self
            .read()?
            .chunks
            .get(document_id)
            .map(|set| set.as_ref().clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn link_document(&self, conversation_id: &str, document_id: &str) -> Result<()> {
        let mut state = self.write()?;
        if !state.docs.contains_key(document_id) {
            return Err(Error::NotFound(format!("document {}", document_id)));
        }
        let linked = state.links.entry(conversation_id.to_string()).or_default();
        if !linked.iter().any(|d| d == document_id) {
            linked.push(document_id.to_string());
        }
        Ok(())
    }

    async fn conversation_documents(&self, conversation_id: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .links
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        turns: &[NewTurn],
    ) -> Result<Vec<ConversationTurn>> {
        let mut state = self.write()?;
        let history = state.turns.entry(conversation_id.to_string()).or_default();
        let mut next = history.last().map(|t| t.sequence).unwrap_or(0) + 1;
        let now = Utc::now();
        let mut created = Vec::with_capacity(turns.len());
        for turn in turns {
            created.push(ConversationTurn {
                id: uuid::Uuid::new_v4().to_string(),
                conversation_id: conversation_id.to_string(),
                role: turn.role,
                text: turn.text.clone(),
                token_count: count_tokens(&turn.text),
                sequence: next,
                created_at: now,
            });
            next += 1;
        }
        history.extend(created.iter().cloned());
        Ok(created)
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .read()?
            .turns
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}
