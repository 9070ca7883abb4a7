//! Word-level token accounting.
//!
//! A token is a maximal run of non-whitespace characters. For span
//! arithmetic each token also owns the whitespace that follows it, and the
//! first token owns any leading whitespace, so the spans returned by
//! [`token_spans`] tile the input exactly with no gaps.
//!
//! The chunker, the retriever, and the context window manager all count
//! with this module so that budgets agree across components.

/// Byte range of one token inside its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    /// Start byte, including leading whitespace for the first token.
    pub start: usize,
    /// End byte of the word itself (exclusive).
    pub word_end: usize,
    /// End byte including trailing whitespace (exclusive).
    pub end: usize,
}

impl TokenSpan {
    /// The word without surrounding whitespace.
    pub fn word<'a>(&self, text: &'a str) -> &'a str {
        text[self.start..self.word_end].trim_start()
    }

    /// The whitespace that follows the word.
    pub fn trailing<'a>(&self, text: &'a str) -> &'a str {
        &text[self.word_end..self.end]
    }
}

/// Split `text` into contiguous token spans.
///
/// Returns an empty vector when `text` has no non-whitespace characters.
pub fn token_spans(text: &str) -> Vec<TokenSpan> {
    let mut spans: Vec<TokenSpan> = Vec::new();
    let mut word_start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(ws) = word_start.take() {
                spans.push(TokenSpan {
                    start: ws,
                    word_end: i,
                    end: i,
                });
            }
        } else if word_start.is_none() {
            // Close the whitespace tail of the previous token.
            if let Some(prev) = spans.last_mut() {
                prev.end = i;
            }
            word_start = Some(i);
        }
    }
    if let Some(ws) = word_start {
        spans.push(TokenSpan {
            start: ws,
            word_end: text.len(),
            end: text.len(),
        });
    }
    if let Some(last) = spans.last_mut() {
        last.end = text.len();
    }
    if let Some(first) = spans.first_mut() {
        first.start = 0;
    }
    spans
}

/// Number of tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Return the prefix of `text` holding at most `max_tokens` tokens,
/// without trailing whitespace.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    if max_tokens == 0 {
        return "";
    }
    let spans = token_spans(text);
    if spans.len() <= max_tokens {
        return text;
    }
    &text[..spans[max_tokens - 1].word_end]
}
