//! RAG Pipeline - One query from text to cited answer
//!
//! Stages: understand and retrieve (concurrently), then structure,
//! generate, and format sources. Zero retrieved chunks short-circuits
//! to a fixed answer without structuring or generation.

use super::structurer::ContextStructurer;
use super::synthesizer::AnswerGenerator;
use super::understanding::{QueryUnderstander, QueryUnderstanding};
use crate::config::RagConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::retrieval::{RetrievedChunk, Retriever};
use crate::text::truncate_text;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Answer when retrieval finds nothing
pub const NOT_FOUND_ANSWER: &str = "На жаль, я не знайшов релевантної інформації в документах.";

/// Reasoning note when retrieval finds nothing
pub const NOT_FOUND_REASONING: &str = "Не знайдено релевантних документів";

/// Citation for one chunk the answer was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_title: String,
    pub document_number: Option<String>,
    pub article: Option<String>,
    pub excerpt: String,
}

/// Final pipeline output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// In retrieval order
    pub sources: Vec<Source>,
    pub reasoning_path: String,
}

/// Orchestrates the query lifecycle. Holds only its collaborators.
pub struct RagPipeline {
    understander: QueryUnderstander,
    retriever: Arc<Retriever>,
    structurer: ContextStructurer,
    generator: AnswerGenerator,
    excerpt_length: usize,
    degrade_on_understanding_failure: bool,
}

impl RagPipeline {
    pub fn new(
        understander: QueryUnderstander,
        retriever: Arc<Retriever>,
        generator: AnswerGenerator,
        config: &RagConfig,
    ) -> Self {
        Self {
            understander,
            retriever,
            structurer: ContextStructurer::new(),
            generator,
            excerpt_length: config.excerpt_length,
            degrade_on_understanding_failure: config.degrade_on_understanding_failure,
        }
    }

    /// Answer `query` from the indexed documents.
    ///
    /// `top_k` falls back to configuration. Collaborator failures propagate
    /// unchanged; an understanding failure wins over a retrieval failure.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn process_query(&self, query: &str, top_k: Option<usize>) -> Result<QueryAnswer> {
        if query.trim().is_empty() {
            return Err(AppError::invalid_input("query must not be blank"));
        }

        let start = Instant::now();

        let (understanding, retrieved) = tokio::join!(
            self.understander.understand(query),
            self.retriever.search_by_text(query, top_k, None)
        );

        let understanding = self.settle_understanding(understanding)?;
        let chunks = retrieved?;

        if chunks.is_empty() {
            debug!("No chunks retrieved, short-circuiting");
            metrics::record_query(start.elapsed().as_secs_f64(), 0, true);
            return Ok(QueryAnswer {
                answer: NOT_FOUND_ANSWER.to_string(),
                sources: Vec::new(),
                reasoning_path: NOT_FOUND_REASONING.to_string(),
            });
        }

        let structure = self.structurer.structure(&chunks, &understanding);

        // Generation sees retrieval order; the ranking only feeds the trace
        let answer = self.generator.generate(query, &chunks).await?;

        let sources = self.format_sources(&chunks);

        metrics::record_query(start.elapsed().as_secs_f64(), chunks.len(), false);
        debug!(
            sources = sources.len(),
            confidence = structure.confidence,
            "Query answered"
        );

        Ok(QueryAnswer {
            answer,
            sources,
            reasoning_path: structure.reasoning_path,
        })
    }

    fn settle_understanding(
        &self,
        result: Result<QueryUnderstanding>,
    ) -> Result<QueryUnderstanding> {
        match result {
            Ok(understanding) => Ok(understanding),
            Err(e) if self.degrade_on_understanding_failure => {
                warn!(error = %e, "Query understanding failed, using neutral understanding");
                Ok(QueryUnderstanding::neutral())
            }
            Err(e) => Err(e),
        }
    }

    pub fn format_sources(&self, chunks: &[RetrievedChunk]) -> Vec<Source> {
        chunks
            .iter()
            .map(|chunk| Source {
                document_title: chunk.document_title.clone(),
                document_number: chunk.document_number.clone(),
                article: chunk.article_number.clone(),
                excerpt: truncate_text(&chunk.content, self.excerpt_length),
            })
            .collect()
    }
}
