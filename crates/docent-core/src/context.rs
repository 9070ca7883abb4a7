//! Context window assembly under a token budget.
//!
//! [`ContextWindowManager::assemble`] merges retrieved chunks and the
//! conversation history into a [`ContextWindow`] whose token cost never
//! exceeds the configured budget.
//!
//! # Policy
//!
//! 1. Reserve `system_reserve_tokens` for system instructions. The rest is
//!    the *available* budget.
//! 2. Insert retrieved chunks highest score first, stopping before the
//!    running total would exceed `chunk_budget_tokens`.
//! 3. The newest turn (the message being answered) is mandatory. If it does
//!    not fit next to the chunks, drop chunks from the lowest score upward
//!    until one remains, then truncate that chunk's text. If the newest turn
//!    still does not fit, fail with [`Error::ContextBudgetExceeded`].
//! 4. Fill what remains with prior turns, walking backward from the newest,
//!    and stop at the first turn that would not fit. Turns are never split,
//!    so the oldest turns are the ones evicted.
//!
//! Chunks take priority over history, and only chunk text is ever truncated.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{ConversationTurn, RetrievalResult, Role};
use crate::tokens::{count_tokens, truncate_to_tokens};

/// Budget configuration for context assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBudget {
    pub budget_tokens: usize,
    pub system_reserve_tokens: usize,
    pub chunk_budget_tokens: usize,
}

/// A retrieved chunk placed in the window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub score: f32,
    pub rank: usize,
    pub text: String,
    pub tokens: usize,
    /// Whether `text` was cut to fit the budget.
    pub truncated: bool,
}

/// A conversation turn placed in the window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowTurn {
    /// Stored sequence number; `None` for the message being answered.
    pub sequence: Option<u64>,
    pub role: Role,
    pub text: String,
    pub tokens: usize,
}

/// One window entry with its token cost.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextEntry {
    Chunk(WindowChunk),
    Turn(WindowTurn),
}

impl ContextEntry {
    pub fn tokens(&self) -> usize {
        match self {
            ContextEntry::Chunk(c) => c.tokens,
            ContextEntry::Turn(t) => t.tokens,
        }
    }
}

/// Exact token accounting for one assembled window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenAccounting {
    pub budget: usize,
    pub reserved: usize,
    pub available: usize,
    pub chunk_tokens: usize,
    pub history_tokens: usize,
    /// `chunk_tokens + history_tokens`; never exceeds `available`.
    pub total: usize,
    pub chunks_included: usize,
    pub chunks_dropped: usize,
    pub chunks_truncated: usize,
    pub turns_included: usize,
    pub turns_dropped: usize,
}

/// Role of a message handed to the generation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// The assembled, ephemeral window for one generation call.
///
/// Entries are ordered chunks first (highest score first), then turns
/// oldest to newest. The last entry is always the newest turn.
#[derive(Debug, Clone, Serialize)]
pub struct ContextWindow {
    pub system_prompt: String,
    pub entries: Vec<ContextEntry>,
    pub accounting: TokenAccounting,
}

impl ContextWindow {
    pub fn chunks(&self) -> impl Iterator<Item = &WindowChunk> {
        self.entries.iter().filter_map(|e| match e {
            ContextEntry::Chunk(c) => Some(c),
            _ => None,
        })
    }

    pub fn turns(&self) -> impl Iterator<Item = &WindowTurn> {
        self.entries.iter().filter_map(|e| match e {
            ContextEntry::Turn(t) => Some(t),
            _ => None,
        })
    }

    /// Render the window as chat messages.
    ///
    /// Chunks go into the system message as `Source:` / `Content:` blocks.
    /// `sources` maps document IDs to a display name; unmapped documents
    /// are shown by ID.
    pub fn to_messages(&self, sources: &HashMap<String, String>) -> Vec<PromptMessage> {
        let mut system = self.system_prompt.clone();
        let blocks: Vec<String> = self
            .chunks()
            .map(|c| {
                let source = sources
                    .get(&c.document_id)
                    .map(String::as_str)
                    .unwrap_or(&c.document_id);
                format!("Source: {}\nContent: {}", source, c.text.trim())
            })
            .collect();
        if !blocks.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str("Context:\n");
            system.push_str(&blocks.join("\n\n"));
        }

        let mut messages = Vec::with_capacity(self.entries.len() + 1);
        if !system.is_empty() {
            messages.push(PromptMessage {
                role: PromptRole::System,
                content: system,
            });
        }
        messages.extend(self.turns().map(|t| PromptMessage {
            role: t.role.into(),
            content: t.text.clone(),
        }));
        messages
    }
}

/// Assembles [`ContextWindow`]s for a fixed budget and system prompt.
#[derive(Debug, Clone)]
pub struct ContextWindowManager {
    budget: ContextBudget,
    system_prompt: String,
}

impl ContextWindowManager {
    /// Fails with [`Error::InvalidInput`] if the reserve exceeds the budget
    /// or the system prompt does not fit in the reserve.
    pub fn new(budget: ContextBudget, system_prompt: impl Into<String>) -> Result<Self> {
        let system_prompt = system_prompt.into();
        if budget.system_reserve_tokens > budget.budget_tokens {
            return Err(Error::InvalidInput(format!(
                "system reserve ({}) exceeds budget ({})",
                budget.system_reserve_tokens, budget.budget_tokens
            )));
        }
        let prompt_tokens = count_tokens(&system_prompt);
        if prompt_tokens > budget.system_reserve_tokens {
            return Err(Error::InvalidInput(format!(
                "system prompt needs {} tokens but only {} are reserved",
                prompt_tokens, budget.system_reserve_tokens
            )));
        }
        Ok(Self {
            budget,
            system_prompt,
        })
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Build the window for answering `newest` given prior `history`
    /// (oldest first) and `retrieved` chunks (ranked, highest score first).
    pub fn assemble(
        &self,
        history: &[ConversationTurn],
        newest: &str,
        retrieved: &[RetrievalResult],
    ) -> Result<ContextWindow> {
        let available = self.budget.budget_tokens - self.budget.system_reserve_tokens;
        let chunk_cap = self.budget.chunk_budget_tokens.min(available);
        let newest_tokens = count_tokens(newest);

        if newest_tokens > available {
            return Err(Error::ContextBudgetExceeded {
                required: newest_tokens,
                available,
            });
        }

        // Chunks, highest score first, stopping before the chunk budget.
        let mut chunks: Vec<WindowChunk> = Vec::new();
        let mut chunk_tokens = 0usize;
        for r in retrieved {
            if chunk_tokens + r.token_count > chunk_cap {
                break;
            }
            chunk_tokens += r.token_count;
            chunks.push(window_chunk(r, r.text.clone(), r.token_count, false));
        }
        if chunks.is_empty() {
            if let Some(first) = retrieved.first() {
                // Keep one chunk even if it alone exceeds the chunk budget.
                let text = truncate_to_tokens(&first.text, chunk_cap).to_string();
                let tokens = count_tokens(&text);
                if tokens > 0 {
                    chunk_tokens = tokens;
                    chunks.push(window_chunk(first, text, tokens, tokens < first.token_count));
                }
            }
        }

        // The newest turn is mandatory; make room by shedding chunk text.
        while chunk_tokens + newest_tokens > available && chunks.len() > 1 {
            if let Some(dropped) = chunks.pop() {
                chunk_tokens -= dropped.tokens;
                tracing::debug!(chunk_id = %dropped.chunk_id, "dropped chunk to fit newest turn");
            }
        }
        if chunk_tokens + newest_tokens > available {
            let room = available - newest_tokens;
            if room == 0 {
                return Err(Error::ContextBudgetExceeded {
                    required: newest_tokens + 1,
                    available,
                });
            }
            if let Some(only) = chunks.first_mut() {
                let text = truncate_to_tokens(&only.text, room).to_string();
                only.tokens = count_tokens(&text);
                only.text = text;
                only.truncated = true;
                chunk_tokens = only.tokens;
                tracing::warn!(chunk_id = %only.chunk_id, tokens = only.tokens, "truncated chunk to fit budget");
            }
        }

        // Prior turns, newest first, stopping at the first that does not fit.
        let mut remaining = available - chunk_tokens - newest_tokens;
        let mut kept: Vec<&ConversationTurn> = Vec::new();
        for turn in history.iter().rev() {
            if turn.token_count > remaining {
                break;
            }
            remaining -= turn.token_count;
            kept.push(turn);
        }
        kept.reverse();
        let turns_dropped = history.len() - kept.len();
        if turns_dropped > 0 {
            tracing::debug!(turns_dropped, "evicted oldest turns from context window");
        }

        let history_tokens = newest_tokens + kept.iter().map(|t| t.token_count).sum::<usize>();
        let accounting = TokenAccounting {
            budget: self.budget.budget_tokens,
            reserved: self.budget.system_reserve_tokens,
            available,
            chunk_tokens,
            history_tokens,
            total: chunk_tokens + history_tokens,
            chunks_included: chunks.len(),
            chunks_dropped: retrieved.len() - chunks.len(),
            chunks_truncated: chunks.iter().filter(|c| c.truncated).count(),
            turns_included: kept.len() + 1,
            turns_dropped,
        };

        let mut entries: Vec<ContextEntry> = chunks.into_iter().map(ContextEntry::Chunk).collect();
        entries.extend(kept.into_iter().map(|t| {
            ContextEntry::Turn(WindowTurn {
                sequence: Some(t.sequence),
                role: t.role,
                text: t.text.clone(),
                tokens: t.token_count,
            })
        }));
        entries.push(ContextEntry::Turn(WindowTurn {
            sequence: None,
            role: Role::User,
            text: newest.to_string(),
            tokens: newest_tokens,
        }));

        Ok(ContextWindow {
            system_prompt: self.system_prompt.clone(),
            entries,
            accounting,
        })
    }
}

fn window_chunk(r: &RetrievalResult, text: String, tokens: usize, truncated: bool) -> WindowChunk {
    WindowChunk {
        chunk_id: r.chunk_id.clone(),
        document_id: r.document_id.clone(),
        ordinal: r.ordinal,
        score: r.score,
        rank: r.rank,
        text,
        tokens,
        truncated,
    }
}
