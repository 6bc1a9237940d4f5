//! Question answering handler

use axum::{extract::State, Json};
use normrag_common::{context::QueryAnswer, errors::Result};
use serde::Deserialize;
use validator::Validate;

use super::validate_request;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 3, max = 1000))]
    pub query: String,

    /// Falls back to `rag.top_k` when omitted
    #[validate(range(min = 1, max = 20))]
    pub top_k: Option<usize>,
}

/// Answer a student question from the indexed documents
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>> {
    validate_request(&request)?;

    let answer = state
        .pipeline
        .process_query(&request.query, request.top_k)
        .await?;

    tracing::info!(
        top_k = ?request.top_k,
        sources = answer.sources.len(),
        "Query answered"
    );

    Ok(Json(answer))
}
