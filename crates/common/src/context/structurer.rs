//! Context Structurer - Key-term re-ranking of retrieved chunks
//!
//! Pure local computation: scores every chunk by how many of the
//! understood key terms it mentions and produces a reasoning trace.
//! Chunks are never removed, only reordered and annotated.

use super::understanding::QueryUnderstanding;
use crate::retrieval::RetrievedChunk;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BASE_RELEVANCE: f64 = 0.5;
const TERM_BONUS: f64 = 0.1;
const RELEVANCE_REASONING: &str = "Чанк містить релевантну інформацію для запиту";

/// Relevance annotation for one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRelevance {
    pub chunk_id: Uuid,
    /// Score in [0, 1]
    pub relevance_score: f64,
    pub reasoning: String,
}

/// Ranked chunks plus the human-readable trace shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStructure {
    /// Descending by score, ties in retrieval order
    pub relevant_chunks: Vec<ChunkRelevance>,
    pub reasoning_path: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextStructurer;

impl ContextStructurer {
    pub fn new() -> Self {
        Self
    }

    pub fn structure(
        &self,
        chunks: &[RetrievedChunk],
        understanding: &QueryUnderstanding,
    ) -> ContextStructure {
        let terms: Vec<String> = understanding
            .key_terms
            .iter()
            .map(|t| t.to_lowercase())
            .collect();

        let mut relevant_chunks: Vec<ChunkRelevance> = chunks
            .iter()
            .map(|chunk| ChunkRelevance {
                chunk_id: chunk.chunk_id,
                relevance_score: relevance_score(&chunk.content, &terms),
                reasoning: RELEVANCE_REASONING.to_string(),
            })
            .collect();

        // sort_by is stable: equal scores keep retrieval order
        relevant_chunks.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));

        ContextStructure {
            reasoning_path: reasoning_trace(understanding, relevant_chunks.len()),
            relevant_chunks,
            confidence: understanding.confidence,
        }
    }
}

/// `terms` must already be lowercase
fn relevance_score(content: &str, terms: &[String]) -> f64 {
    let content = content.to_lowercase();
    let matches = terms.iter().filter(|t| content.contains(t.as_str())).count();
    (BASE_RELEVANCE + TERM_BONUS * matches as f64).clamp(0.0, 1.0)
}

fn reasoning_trace(understanding: &QueryUnderstanding, chunk_count: usize) -> String {
    let terms = understanding
        .key_terms
        .iter()
        .map(|t| format!("'{}'", t))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "На основі розуміння запиту (намір: {}) та ключових термінів [{}], відібрано {} релевантних фрагментів документів.",
        understanding.intent, terms, chunk_count
    )
}
