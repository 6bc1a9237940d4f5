//! LLM collaborators
//!
//! Provides:
//! - `ChatModel`: single-turn free-text completion
//! - `StructuredExtractor`: schema-constrained JSON extraction
//! - An OpenAI-compatible client (Grok) implementing both

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Free-text chat completion
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String>;
}

/// Target shape for a structured extraction
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// One structured extraction call
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub schema: OutputSchema,
}

/// Schema-constrained extraction. Returns the raw JSON object; callers
/// validate it against their own types.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value>;
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

/// Chat completions client for OpenAI-compatible endpoints
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    extraction_temperature: f32,
}

const SERVICE: &str = "llm";

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required".to_string(),
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
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            extraction_temperature: config.temperature,
        })
    }

    async fn call(&self, request: &ChatRequest<'_>, operation: &str) -> Result<String> {
        let start = Instant::now();
        let result = self.send(request).await;
        metrics::record_llm(
            start.elapsed().as_secs_f64(),
            &self.model,
            operation,
            result.is_ok(),
        );
        result
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                SERVICE,
                format!("API error {}: {}", status, body),
            ));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            AppError::upstream(SERVICE, format!("Failed to parse response: {}", e))
        })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::upstream(SERVICE, "Empty response from LLM"))
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens: Some(max_tokens),
            response_format: None,
        };

        self.call(&request, "complete").await
    }
}

#[async_trait]
impl StructuredExtractor for OpenAiCompatibleClient {
    async fn extract(&self, request: &ExtractionRequest) -> Result<serde_json::Value> {
        let chat_request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.extraction_temperature,
            max_tokens: None,
            response_format: Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema.name,
                    "schema": request.schema.schema,
                    "strict": true,
                }
            })),
        };

        let content = self.call(&chat_request, "extract").await?;
        parse_json_content(&content)
    }
}

/// Parse a message body as a JSON object, tolerating a fenced code block
fn parse_json_content(content: &str) -> Result<serde_json::Value> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: serde_json::Value = serde_json::from_str(unfenced).map_err(|e| {
        AppError::upstream(SERVICE, format!("Structured output is not valid JSON: {}", e))
    })?;

    if !value.is_object() {
        return Err(AppError::upstream(
            SERVICE,
            "Structured output must be a JSON object",
        ));
    }
    Ok(value)
}
