//! Text chunking module
//!
//! Splits document text into token-bounded, sentence-aligned chunks with
//! a trailing-sentence overlap between neighbours.

use normrag_common::errors::{AppError, Result};
use normrag_common::text::{clean_text, split_sentences, TokenCounter};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// A chunk ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// The chunk content
    pub content: String,
    /// Index of this chunk in the document
    pub index: i32,
    /// Sum of sentence token counts
    pub token_count: usize,
}

struct Sentence {
    text: String,
    tokens: usize,
}

/// Sentence-greedy chunker over an injected tokenizer
#[derive(Clone)]
pub struct TextChunker {
    counter: Arc<dyn TokenCounter>,
}

impl TextChunker {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Split `text` into chunks of at most `chunk_size` tokens.
    ///
    /// Sentences are never split, so a sentence longer than `chunk_size`
    /// yields an oversized chunk. Each chunk after the first starts with
    /// the trailing sentences of its predecessor: at most `chunk_overlap`
    /// tokens of them, or the single last sentence when that alone is
    /// longer. Blank input yields no chunks.
    pub fn chunk(&self, text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<TextChunk>> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(AppError::invalid_input(format!(
                "chunk_overlap ({}) must be smaller than a positive chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }

        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        let mut current: VecDeque<Sentence> = VecDeque::new();
        let mut current_tokens = 0usize;

        for text in split_sentences(&cleaned) {
            let tokens = self.counter.count(&text);

            if !current.is_empty() && current_tokens + tokens > chunk_size {
                push_chunk(&mut chunks, &current, current_tokens);
                current_tokens = retain_overlap(&mut current, current_tokens, chunk_overlap);
            }

            current_tokens += tokens;
            current.push_back(Sentence { text, tokens });
        }

        if !current.is_empty() {
            push_chunk(&mut chunks, &current, current_tokens);
        }

        debug!(
            input_chars = cleaned.chars().count(),
            chunk_count = chunks.len(),
            chunk_size,
            chunk_overlap,
            "Text chunked"
        );

        Ok(chunks)
    }
}

fn push_chunk(chunks: &mut Vec<TextChunk>, sentences: &VecDeque<Sentence>, tokens: usize) {
    let content = sentences
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    chunks.push(TextChunk {
        content,
        index: chunks.len() as i32,
        token_count: tokens,
    });
}

/// Drop oldest sentences until the rest fit in `overlap` tokens.
/// The last sentence always stays, however long it is.
fn retain_overlap(sentences: &mut VecDeque<Sentence>, mut tokens: usize, overlap: usize) -> usize {
    while tokens > overlap && sentences.len() > 1 {
        if let Some(dropped) = sentences.pop_front() {
            tokens -= dropped.tokens;
        }
    }
    tokens
}
