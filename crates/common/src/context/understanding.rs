//! Query Understanding - Intent and key-term extraction
//!
//! Provides:
//! - The `QueryUnderstanding` shape and its JSON schema
//! - Validation of the LLM's structured output before it is trusted
//! - `QueryUnderstander`, which delegates extraction to a `StructuredExtractor`

use crate::errors::{AppError, Result};
use crate::llm::{ExtractionRequest, OutputSchema, StructuredExtractor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

const SYSTEM_PROMPT: &str = "Ти - експерт з аналізу запитів студентів університету. \
Твоя задача - зрозуміти намір користувача та виділити ключові терміни. \
Визнач тип документа, який може містити відповідь (положення, наказ, інструкція). \
Відповідай українською мовою.";

const SCHEMA_NAME: &str = "query_understanding";

/// Structured reading of a student query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryUnderstanding {
    /// Short intent label
    pub intent: String,

    /// Key terms, first-seen order, no duplicates
    #[serde(default)]
    pub key_terms: Vec<String>,

    /// Document type likely to hold the answer (положення, наказ, ...)
    #[serde(default)]
    pub expected_document_type: Option<String>,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,
}

impl QueryUnderstanding {
    /// Used in place of a failed extraction when degradation is enabled
    pub fn neutral() -> Self {
        Self {
            intent: "unknown".to_string(),
            key_terms: Vec::new(),
            expected_document_type: None,
            confidence: 0.0,
        }
    }

    /// JSON schema sent with the extraction request
    pub fn schema() -> OutputSchema {
        OutputSchema {
            name: SCHEMA_NAME.to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "intent": { "type": "string" },
                    "key_terms": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "expected_document_type": { "type": ["string", "null"] },
                    "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                },
                "required": ["intent", "key_terms", "expected_document_type", "confidence"],
                "additionalProperties": false
            }),
        }
    }

    /// Parse and check an extraction result.
    ///
    /// Blank key terms are dropped and duplicates removed. A blank intent or
    /// a confidence outside [0, 1] rejects the whole object.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let parsed: QueryUnderstanding = serde_json::from_value(value).map_err(|e| {
            AppError::upstream("llm", format!("Malformed query understanding: {}", e))
        })?;
        parsed.validated()
    }

    fn validated(mut self) -> Result<Self> {
        self.intent = self.intent.trim().to_string();
        if self.intent.is_empty() {
            return Err(AppError::upstream("llm", "Query understanding has blank intent"));
        }

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AppError::upstream(
                "llm",
                format!("Query understanding confidence out of range: {}", self.confidence),
            ));
        }

        let mut seen = HashSet::new();
        self.key_terms = self
            .key_terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .collect();

        self.expected_document_type = self
            .expected_document_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(self)
    }
}

/// Derives a [`QueryUnderstanding`] from raw query text
pub struct QueryUnderstander {
    extractor: Arc<dyn StructuredExtractor>,
}

impl QueryUnderstander {
    pub fn new(extractor: Arc<dyn StructuredExtractor>) -> Self {
        Self { extractor }
    }

    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn understand(&self, query: &str) -> Result<QueryUnderstanding> {
        let request = ExtractionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            prompt: format!("Проаналізуй запит студента: '{}'", query),
            schema: QueryUnderstanding::schema(),
        };

        let value = self.extractor.extract(&request).await?;
        let understanding = QueryUnderstanding::from_value(value)?;

        debug!(
            intent = %understanding.intent,
            key_terms = understanding.key_terms.len(),
            confidence = understanding.confidence,
            "Query understood"
        );
        Ok(understanding)
    }
}
