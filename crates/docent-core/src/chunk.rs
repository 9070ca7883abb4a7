//! Boundary-aware overlapping text chunker.
//!
//! Splits document text into [`TextSpan`]s of at most `max_tokens` tokens,
//! where consecutive spans share exactly `overlap_tokens` tokens. Tokens are
//! counted with [`crate::tokens`].
//!
//! # Algorithm
//!
//! 1. Tokenize the text into spans that tile it byte-for-byte.
//! 2. Starting at token `s`, the hard limit is `e = s + max_tokens`.
//! 3. If `e` reaches the end of the text, emit the final span.
//! 4. Otherwise search the last `boundary_window` tokens before `e` for a
//!    paragraph break (`\n\n`), then for a sentence end (`.`, `!`, `?`, or a
//!    single newline), and cut after the latest one found. With neither,
//!    cut hard at `e`.
//! 5. The next span starts `overlap_tokens` tokens before the cut.
//!
//! Cuts are never placed at or before `s + overlap_tokens`, so every span
//! contributes fresh text and the loop always advances.
//!
//! Chunking is deterministic: identical input and parameters produce
//! identical spans, and chunk IDs are derived from the document ID and
//! ordinal, so re-ingesting a document reproduces the same chunk set.
//!
//! # Example
//!
//! ```rust
//! use docent_core::chunk::{chunk, reassemble};
//!
//! let text = "First sentence here. Second one follows. A third closes it.";
//! let spans = chunk(text, 4, 1).unwrap();
//! assert!(spans.iter().all(|s| s.token_count <= 4));
//! assert_eq!(reassemble(text, &spans), text);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::tokens::{token_spans, TokenSpan};

/// Default number of tokens searched backward for a natural boundary.
pub const DEFAULT_BOUNDARY_WINDOW: usize = 32;

/// Chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub boundary_window: usize,
}

impl ChunkParams {
    pub fn new(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_tokens,
            overlap_tokens,
            boundary_window: DEFAULT_BOUNDARY_WINDOW,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(Error::InvalidInput("max_tokens must be > 0".into()));
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(Error::InvalidInput(format!(
                "overlap_tokens ({}) must be < max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            )));
        }
        Ok(())
    }
}

/// A contiguous byte range of the source text selected as one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSpan {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    /// Leading bytes shared with the previous span (0 for the first).
    pub overlap_bytes: usize,
    pub token_count: usize,
}

impl TextSpan {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// The part of the span not already covered by the previous span.
    pub fn fresh_text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start + self.overlap_bytes..self.end]
    }
}

/// Split `text` into overlapping spans with the default boundary window.
///
/// Fails with [`Error::InvalidInput`] on empty (or whitespace-only) text or
/// when `overlap_tokens >= max_tokens`.
pub fn chunk(text: &str, max_tokens: usize, overlap_tokens: usize) -> Result<Vec<TextSpan>> {
    chunk_with(text, &ChunkParams::new(max_tokens, overlap_tokens))
}

/// Split `text` into overlapping spans using explicit parameters.
pub fn chunk_with(text: &str, params: &ChunkParams) -> Result<Vec<TextSpan>> {
    params.validate()?;
    let tokens = token_spans(text);
    if tokens.is_empty() {
        return Err(Error::InvalidInput("cannot chunk empty text".into()));
    }

    let n = tokens.len();
    let mut spans = Vec::new();
    let mut start = 0usize;
    let mut prev_end_byte = 0usize;

    loop {
        let hard_end = (start + params.max_tokens).min(n);
        let cut = if hard_end == n {
            n
        } else {
            find_boundary(text, &tokens, start, hard_end, params)
        };

        let start_byte = tokens[start].start;
        let end_byte = tokens[cut - 1].end;
        let overlap_bytes = if spans.is_empty() {
            0
        } else {
            prev_end_byte.saturating_sub(start_byte)
        };
        spans.push(TextSpan {
            ordinal: spans.len(),
            start: start_byte,
            end: end_byte,
            overlap_bytes,
            token_count: cut - start,
        });

        if cut == n {
            break;
        }
        prev_end_byte = end_byte;
        start = cut - params.overlap_tokens;
    }

    Ok(spans)
}

/// Pick the cut (exclusive token index) for a span starting at `start`
/// whose hard limit is `hard_end`.
fn find_boundary(
    text: &str,
    tokens: &[TokenSpan],
    start: usize,
    hard_end: usize,
    params: &ChunkParams,
) -> usize {
    let floor = start + params.overlap_tokens + 1;
    let lo = hard_end.saturating_sub(params.boundary_window).max(floor);
    if lo > hard_end {
        return hard_end;
    }

    let mut sentence_cut = None;
    for cut in (lo..=hard_end).rev() {
        let last = &tokens[cut - 1];
        if is_paragraph_break(last.trailing(text)) {
            return cut;
        }
        if sentence_cut.is_none() && ends_sentence(last.word(text), last.trailing(text)) {
            sentence_cut = Some(cut);
        }
    }
    sentence_cut.unwrap_or(hard_end)
}

fn is_paragraph_break(trailing: &str) -> bool {
    trailing.matches('\n').count() >= 2
}

fn ends_sentence(word: &str, trailing: &str) -> bool {
    if trailing.contains('\n') {
        return true;
    }
    let core = word.trim_end_matches(['"', '\'', ')', ']', '”', '’']);
    core.ends_with(['.', '!', '?'])
}

/// Rebuild the original text from spans by dropping each span's overlap.
pub fn reassemble(text: &str, spans: &[TextSpan]) -> String {
    let mut out = String::with_capacity(text.len());
    for span in spans {
        out.push_str(span.fresh_text(text));
    }
    out
}

/// Deterministic chunk ID derived from the document ID and ordinal.
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// SHA-256 hex digest of chunk text.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Materialize a [`Chunk`] from a span and its embedding vector.
pub fn make_chunk(document_id: &str, source: &str, span: &TextSpan, embedding: Vec<f32>) -> Chunk {
    let text = span.text(source);
    Chunk {
        id: chunk_id(document_id, span.ordinal),
        document_id: document_id.to_string(),
        ordinal: span.ordinal,
        start: span.start,
        end: span.end,
        overlap_bytes: span.overlap_bytes,
        text: text.to_string(),
        token_count: span.token_count,
        embedding,
        hash: text_hash(text),
    }
}
