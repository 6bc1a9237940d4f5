//! Answer Generator - Grounded answer synthesis
//!
//! Provides:
//! - Prompt construction from retrieved chunks and the query
//! - A single LLM completion per answer
//! - The no-context answer, returned without calling the LLM

use crate::errors::Result;
use crate::llm::ChatModel;
use crate::retrieval::RetrievedChunk;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Answer returned when there is no context to ground on
pub const NO_CONTEXT_ANSWER: &str =
    "На жаль, я не знайшов релевантної інформації в документах для відповіді на ваш запит.";

const UNKNOWN_TITLE: &str = "Невідомий документ";
const UNKNOWN_NUMBER: &str = "б/н";

/// Builds grounded prompts and calls the chat model
pub struct AnswerGenerator {
    chat: Arc<dyn ChatModel>,
    temperature: f32,
    max_tokens: u32,
}

impl AnswerGenerator {
    pub fn new(chat: Arc<dyn ChatModel>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            chat,
            temperature,
            max_tokens,
        }
    }

    /// Answer `query` from `chunks`, in the order given
    #[instrument(skip(self, query, chunks), fields(chunks = chunks.len()))]
    pub async fn generate(&self, query: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        if chunks.is_empty() {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let prompt = build_prompt(query, chunks);
        let answer = self
            .chat
            .complete(&prompt, self.temperature, self.max_tokens)
            .await?;

        debug!(prompt_chars = prompt.chars().count(), "Answer generated");
        Ok(answer.trim().to_string())
    }
}

/// Numbered context block, one entry per chunk
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let title = if chunk.document_title.trim().is_empty() {
                UNKNOWN_TITLE
            } else {
                chunk.document_title.as_str()
            };
            format!(
                "[Джерело {}: '{}' №{} {}]\n{}\n",
                i + 1,
                title,
                chunk.document_number.as_deref().unwrap_or(UNKNOWN_NUMBER),
                chunk.article_number.as_deref().unwrap_or(""),
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(query: &str, chunks: &[RetrievedChunk]) -> String {
    format!(
        "Ти - асистент для студентів Сумського державного університету.
Твоя задача - відповідати на запитання студентів на основі нормативних документів університету.

КОНТЕКСТ З ДОКУМЕНТІВ:
{context}

ЗАПИТ СТУДЕНТА:
{query}

ІНСТРУКЦІЇ:
1. Відповідай чітко та по суті, використовуючи ТІЛЬКИ інформацію з наданого контексту
2. Якщо в контексті немає відповіді на запитання, чесно скажи про це
3. Обов'язково вказуй джерела у форматі: \"Джерело 1 'Назва документа' ст. X\"
4. Відповідай українською мовою
5. Будь ввічливим та професійним

ВІДПОВІДЬ:",
        context = format_context(chunks),
        query = query
    )
}
