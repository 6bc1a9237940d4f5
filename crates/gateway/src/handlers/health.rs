//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub llm_api: String,
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    #[serde(flatten)]
    pub health: HealthResponse,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_count: Option<u64>,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn llm_status(state: &AppState) -> &'static str {
    if state.config.llm.api_key.is_some() {
        "configured"
    } else {
        "not_configured"
    }
}

async fn check(state: &AppState) -> (HealthResponse, Result<u64, String>) {
    let documents = state
        .store
        .count_documents()
        .await
        .map_err(|e| e.to_string());

    let database = if documents.is_ok() { "connected" } else { "disconnected" };
    let healthy = documents.is_ok() && state.config.llm.api_key.is_some();

    (
        HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            database: database.to_string(),
            llm_api: llm_status(state).to_string(),
        },
        documents,
    )
}

/// Basic health: database reachability and LLM configuration
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (health, _) = check(&state).await;
    Json(health)
}

/// Health plus index statistics
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let (health, documents) = check(&state).await;

    let (documents_count, chunks_count, error) = match documents {
        Ok(count) => match state.store.count_chunks().await {
            Ok(chunks) => (Some(count), Some(chunks), None),
            Err(e) => (Some(count), None, Some(e.to_string())),
        },
        Err(e) => (None, None, Some(e)),
    };

    Json(DetailedHealthResponse {
        health,
        version: normrag_common::VERSION.to_string(),
        documents_count,
        chunks_count,
        embedding_model: state.config.embedding.model.clone(),
        error,
    })
}
