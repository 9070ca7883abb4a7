//! Message turns: retrieval → context assembly → generation → history.
//!
//! At most one message per conversation is in flight at a time, which keeps
//! turn sequence numbers gapless. Different conversations proceed
//! concurrently. Turns are appended only after generation succeeds, so a
//! failed turn leaves the history exactly as it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::Instrument;

use docent_core::context::{ContextWindowManager, TokenAccounting};
use docent_core::embedding::Embedder;
use docent_core::models::{ConversationTurn, NewTurn};
use docent_core::retrieve::Retriever;
use docent_core::store::{ChunkStore, ConversationStore};
use docent_core::{Error, Result};

use crate::config::RetrievalConfig;
use crate::generation::Generator;

/// A chunk that was placed in the context window for an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub document_id: String,
    pub origin: String,
    pub chunk_id: String,
    pub ordinal: usize,
    pub score: f32,
    pub rank: usize,
    pub truncated: bool,
}

/// Result of one message turn.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub conversation_id: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub accounting: TokenAccounting,
    /// The user and assistant turns as stored.
    pub turns: Vec<ConversationTurn>,
}

pub struct ConversationService {
    retriever: Retriever,
    chunks: Arc<dyn ChunkStore>,
    conversations: Arc<dyn ConversationStore>,
    generator: Arc<dyn Generator>,
    window: ContextWindowManager,
    top_k: usize,
    min_score: Option<f32>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationService {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        window: ContextWindowManager,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            retriever: Retriever::new(
                Arc::clone(&chunks),
                Arc::clone(&conversations),
                embedder,
            ),
            chunks,
            conversations,
            generator,
            window,
            top_k: retrieval.top_k,
            min_score: retrieval.min_score,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Answer `text` within `conversation_id` and record both turns.
    pub async fn handle_message(&self, conversation_id: &str, text: &str) -> Result<Reply> {
        if conversation_id.trim().is_empty() {
            return Err(Error::InvalidInput("conversation id must not be empty".into()));
        }
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("message must not be empty".into()));
        }

        let slot = self.slot(conversation_id);
        let _turn = slot.lock.lock().await;
        let span = tracing::info_span!("conversation.message", conversation_id);
        self.turn(conversation_id, text).instrument(span).await
    }

    async fn turn(&self, conversation_id: &str, text: &str) -> Result<Reply> {
        let retrieved = self
            .retriever
            .retrieve(conversation_id, text, self.top_k, self.min_score)
            .await?;
        let history = self.conversations.history(conversation_id).await?;
        let window = self.window.assemble(&history, text, &retrieved)?;
        tracing::debug!(
            chunks = window.accounting.chunks_included,
            turns = window.accounting.turns_included,
            tokens = window.accounting.total,
            "context assembled"
        );

        let mut origins: HashMap<String, String> = HashMap::new();
        for chunk in window.chunks() {
            if origins.contains_key(&chunk.document_id) {
                continue;
            }
            let origin = self
                .chunks
                .document(&chunk.document_id)
                .await?
                .map(|d| d.origin)
                .unwrap_or_else(|| chunk.document_id.clone());
            origins.insert(chunk.document_id.clone(), origin);
        }

        let messages = window.to_messages(&origins);
        let answer = match self.generator.generate(&messages).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, "generation failed; history unchanged");
                return Err(e);
            }
        };

        let turns = self
            .conversations
            .append_turns(
                conversation_id,
                &[NewTurn::user(text), NewTurn::assistant(answer.as_str())],
            )
            .await?;
        tracing::info!(
            sequence = turns.last().map(|t| t.sequence).unwrap_or_default(),
            "turn recorded"
        );

        let citations = window
            .chunks()
            .map(|c| Citation {
                document_id: c.document_id.clone(),
                origin: origins
                    .get(&c.document_id)
                    .cloned()
                    .unwrap_or_else(|| c.document_id.clone()),
                chunk_id: c.chunk_id.clone(),
                ordinal: c.ordinal,
                score: c.score,
                rank: c.rank,
                truncated: c.truncated,
            })
            .collect();

        Ok(Reply {
            conversation_id: conversation_id.to_string(),
            text: answer,
            citations,
            accounting: window.accounting,
            turns,
        })
    }

    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        self.conversations.history(conversation_id).await
    }

    /// Make an existing document searchable from another conversation.
    pub async fn link_document(&self, conversation_id: &str, document_id: &str) -> Result<()> {
        self.conversations
            .link_document(conversation_id, document_id)
            .await?;
        tracing::info!(conversation_id, document_id, "document linked");
        Ok(())
    }

    fn slot<'a>(&'a self, conversation_id: &'a str) -> ConversationSlot<'a> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        let lock = Arc::clone(locks.entry(conversation_id.to_string()).or_default());
        ConversationSlot {
            locks: &self.locks,
            conversation_id,
            lock,
        }
    }
}

/// A claim on one conversation's entry in the lock map. Dropping it removes
/// the entry once no other message is waiting, including when the message
/// future is dropped mid-turn.
struct ConversationSlot<'a> {
    locks: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    conversation_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for ConversationSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Clones are only taken under this map lock, so a count of two means
        // nobody else is waiting on the conversation.
        let current = locks
            .get(self.conversation_id)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock));
        if current && Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.conversation_id);
        }
    }
}
