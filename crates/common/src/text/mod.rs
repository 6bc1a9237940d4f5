//! Text utilities shared by ingestion and the RAG core
//!
//! Provides:
//! - Best-effort normalisation of extracted document text
//! - Regex sentence splitting on terminal punctuation
//! - Structural marker extraction (article / item / section numbers)
//! - Char-safe truncation for excerpts
//! - Token counting behind a trait

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::OnceLock;

// ============================================================================
// Cleaning
// ============================================================================

/// Punctuation kept by [`clean_text`] besides letters, digits and `_`.
const KEPT_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', ';', ':', '-', '(', ')', '"', '\'', '«', '»', '’',
];

/// Collapse whitespace runs and drop characters outside the allow-list.
///
/// Letters of any script survive, so Ukrainian text is untouched apart from
/// stray symbols (bullets, pictographs, PDF artifacts).
pub fn clean_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || *c == '_' || *c == ' ' || KEPT_PUNCTUATION.contains(c)
        })
        .collect::<String>()
        .trim()
        .to_string()
}

// ============================================================================
// Sentences
// ============================================================================

fn sentence_boundary() -> Option<&'static Regex> {
    static BOUNDARY: OnceLock<Option<Regex>> = OnceLock::new();
    BOUNDARY
        .get_or_init(|| Regex::new(r"[.!?]\s+").ok())
        .as_ref()
}

/// Split text after `.`, `!` or `?` followed by whitespace.
///
/// Terminal punctuation stays with its sentence and the separating
/// whitespace is dropped. Empty fragments are never returned.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let Some(boundary) = sentence_boundary() else {
        push_sentence(&mut sentences, text);
        return sentences;
    };

    let mut start = 0;

    for m in boundary.find_iter(text) {
        // punctuation is a single ASCII byte
        let end = m.start() + 1;
        push_sentence(&mut sentences, &text[start..end]);
        start = m.end();
    }
    push_sentence(&mut sentences, &text[start..]);

    sentences
}

fn push_sentence(out: &mut Vec<String>, fragment: &str) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        out.push(fragment.to_string());
    }
}

// ============================================================================
// Structural markers
// ============================================================================

/// Build a case-insensitive pattern for a lowercase word.
///
/// regex-lite only folds ASCII case, so Cyrillic needs explicit classes.
fn caseless(word: &str) -> String {
    word.chars()
        .map(|c| {
            let upper: String = c.to_uppercase().collect();
            if c.is_alphabetic() && upper != c.to_string() {
                format!("[{}{}]", c, upper)
            } else {
                regex_lite::escape(&c.to_string())
            }
        })
        .collect()
}

fn marker_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let groups: [&[&str]; 3] = [&["ст.", "стаття"], &["п.", "пункт"], &["розділ"]];
        groups
            .iter()
            .filter_map(|words| {
                let alternatives = words.iter().map(|w| caseless(w)).collect::<Vec<_>>();
                Regex::new(&format!(r"(?:{})\s*\d+", alternatives.join("|"))).ok()
            })
            .collect()
    })
}

/// Find the first article, item or section marker in a chunk.
///
/// Patterns are tried in priority order (article, item, section) and the
/// whole matched marker is returned, e.g. `"ст. 12"` or `"Розділ 3"`.
pub fn extract_article_number(text: &str) -> Option<String> {
    marker_patterns()
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Truncation
// ============================================================================

/// Truncate to at most `max_chars` characters, ending with `...` when cut.
///
/// Counts chars rather than bytes so Cyrillic is never split mid-character.
/// Applying it twice with the same limit gives the same result.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

// ============================================================================
// Token counting
// ============================================================================

/// Tokenizer collaborator used for chunk budgeting
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// cl100k_base BPE counter
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| AppError::Configuration {
            message: format!("Failed to load cl100k_base tokenizer: {}", e),
        })?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Counts whitespace-separated words. Deterministic, for tests and dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceCounter;

impl TokenCounter for WhitespaceCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
