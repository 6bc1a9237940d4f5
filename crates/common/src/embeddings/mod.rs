//! Embedding service abstraction
//!
//! Provides a unified interface over embedding providers:
//! - Cohere (embed-multilingual-v3.0) with asymmetric document/query modes
//! - A deterministic hash-based embedder for tests and offline runs

use crate::config::{EmbeddingConfig, MAX_EMBEDDING_RETRIES};
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which side of the asymmetric embedding space a text belongs to.
///
/// Chunks are embedded as documents at ingestion; user questions are
/// embedded as queries at retrieval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Document,
    Query,
}

impl EmbeddingMode {
    /// Cohere `input_type` value
    pub fn input_type(&self) -> &'static str {
        match self {
            EmbeddingMode::Document => "search_document",
            EmbeddingMode::Query => "search_query",
        }
    }
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed texts 1:1 and in order
    async fn embed_batch(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()], mode).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| AppError::upstream(self.model_name(), "Empty embedding response"))
    }

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// Reject an empty batch or any blank text before a provider call
pub fn validate_texts(texts: &[String]) -> Result<()> {
    if texts.is_empty() {
        return Err(AppError::invalid_input("embedding input must not be empty"));
    }
    if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(AppError::invalid_input(format!(
            "embedding input #{} is blank",
            i
        )));
    }
    Ok(())
}

// ============================================================================
// Cohere
// ============================================================================

/// Cohere embedding client
pub struct CohereEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
    batch_size: usize,
}

#[derive(Serialize)]
struct CohereRequest<'a> {
    texts: &'a [String],
    model: &'a str,
    input_type: &'a str,
}

#[derive(Deserialize)]
struct CohereResponse {
    embeddings: Vec<Vec<f32>>,
}

/// A failed Cohere call and whether another attempt may succeed
struct Failure {
    error: AppError,
    retryable: bool,
}

impl Failure {
    fn transient(message: String) -> Self {
        Self {
            error: AppError::upstream("cohere", message),
            retryable: true,
        }
    }

    fn permanent(message: String) -> Self {
        Self {
            error: AppError::upstream("cohere", message),
            retryable: false,
        }
    }
}

impl CohereEmbedder {
    /// Create a new Cohere embedder from configuration
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "embedding.api_key is required for the cohere provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            max_retries: config.max_retries.clamp(1, MAX_EMBEDDING_RETRIES),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Make request with retry.
    ///
    /// Only transport failures and 5xx responses are retried; anything
    /// else fails on the first attempt.
    async fn request_with_retry(
        &self,
        texts: &[String],
        mode: EmbeddingMode,
    ) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;

        loop {
            let start = Instant::now();
            let result = self.make_request(texts, mode).await;
            metrics::record_embedding(
                start.elapsed().as_secs_f64(),
                &self.model,
                texts.len(),
                result.is_ok(),
            );

            let failure = match result {
                Ok(embeddings) => return Ok(embeddings),
                Err(failure) => failure,
            };

            attempt += 1;
            if !failure.retryable || attempt >= self.max_retries {
                return Err(failure.error);
            }

            tracing::warn!(
                attempt,
                max_retries = self.max_retries,
                error = %failure.error,
                "Embedding request failed, retrying"
            );

            // Exponential backoff
            let delay = Duration::from_millis(100 * 2_u64.saturating_pow(attempt));
            tokio::time::sleep(delay).await;
        }
    }

    async fn make_request(
        &self,
        texts: &[String],
        mode: EmbeddingMode,
    ) -> std::result::Result<Vec<Vec<f32>>, Failure> {
        let url = format!("{}/v1/embed", self.base_url);

        let request = CohereRequest {
            texts,
            model: &self.model,
            input_type: mode.input_type(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Failure::transient(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = format!("API error {}: {}", status, body);
            return Err(if status.is_server_error() {
                Failure::transient(message)
            } else {
                Failure::permanent(message)
            });
        }

        let result: CohereResponse = response
            .json()
            .await
            .map_err(|e| Failure::permanent(format!("Failed to parse response: {}", e)))?;

        self.check_shape(texts.len(), &result.embeddings)
            .map_err(|error| Failure {
                error,
                retryable: false,
            })?;
        Ok(result.embeddings)
    }

    fn check_shape(&self, expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
        if embeddings.len() != expected {
            return Err(AppError::upstream(
                "cohere",
                format!("expected {} embeddings, got {}", expected, embeddings.len()),
            ));
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(AppError::upstream(
                "cohere",
                format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    bad.len()
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for CohereEmbedder {
    async fn embed_batch(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Vec<f32>>> {
        validate_texts(texts)?;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.request_with_retry(batch, mode).await?;
            all_embeddings.extend(embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Deterministic mock
// ============================================================================

/// Hash-seeded unit vectors: equal texts map to equal vectors in both modes.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut block = 0u32;

        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();

            for byte in digest.iter() {
                if values.len() == self.dimension {
                    break;
                }
                values.push((*byte as f32 / 127.5) - 1.0);
            }
            block += 1;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[String], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>> {
        validate_texts(texts)?;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "cohere" => Ok(Arc::new(CohereEmbedder::new(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("Unknown embedding provider: {}", other),
        }),
    }
}

/// Short fingerprint of a vector, handy in debug logs
pub fn fingerprint(embedding: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for v in embedding {
        hasher.update(v.to_le_bytes());
    }
    hex::encode(&hasher.finalize()[..6])
}
