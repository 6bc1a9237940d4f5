//! Document management handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;
use validator::Validate;

use super::validate_request;
use crate::AppState;
use normrag_common::{
    db::{models::Document, DocumentChanges, NewDocument},
    errors::{AppError, Result},
    text::truncate_text,
};
use normrag_ingestion::ProcessedDocument;

/// Characters of chunk content shown in a document preview
const PREVIEW_CHARS: usize = 200;

// ============================================================================
// Requests
// ============================================================================

fn default_limit() -> u64 {
    100
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListParams {
    #[serde(default)]
    pub skip: u64,

    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
}

/// Register a document. `file_path` is read from the server's disk;
/// `url` documents must carry their `content` since crawling happens
/// elsewhere.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 3, max = 500))]
    pub title: String,

    #[validate(length(max = 100))]
    pub document_number: Option<String>,

    #[validate(length(min = 1, max = 2000))]
    pub url: Option<String>,

    pub file_path: Option<String>,

    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateDocumentRequest {
    #[validate(length(min = 3, max = 500))]
    pub title: Option<String>,

    #[validate(length(max = 100))]
    pub document_number: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub document_number: Option<String>,
    pub url: Option<String>,
    pub file_path: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u64>,
}

impl DocumentResponse {
    fn new(document: Document, chunk_count: Option<u64>) -> Self {
        Self {
            id: document.id,
            title: document.title,
            document_number: document.document_number,
            url: document.url,
            file_path: document.file_path,
            status: document.status,
            created_at: document.created_at.to_rfc3339(),
            updated_at: document.updated_at.to_rfc3339(),
            chunk_count,
        }
    }
}

impl From<ProcessedDocument> for DocumentResponse {
    fn from(processed: ProcessedDocument) -> Self {
        Self::new(processed.document, Some(processed.chunk_count as u64))
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub items: Vec<DocumentResponse>,
    pub total: u64,
    pub skip: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize)]
pub struct ChunkPreview {
    pub chunk_index: i32,
    pub article_number: Option<String>,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: DocumentResponse,
    pub chunks_preview: Vec<ChunkPreview>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub deleted_chunks: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// List documents, newest first
pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>> {
    validate_request(&params)?;

    let (summaries, total) = state.documents.list(params.skip, params.limit).await?;

    Ok(Json(DocumentListResponse {
        items: summaries
            .into_iter()
            .map(|s| DocumentResponse::new(s.document, Some(s.chunk_count)))
            .collect(),
        total,
        skip: params.skip,
        limit: params.limit,
    }))
}

/// Get a document with a preview of its first chunks
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentDetailResponse>> {
    let detail = state.documents.get(id).await?;

    let chunks_preview = detail
        .preview
        .into_iter()
        .map(|chunk| ChunkPreview {
            chunk_index: chunk.chunk_index,
            article_number: chunk.article_number,
            content: preview_text(&chunk.content),
        })
        .collect();

    Ok(Json(DocumentDetailResponse {
        document: DocumentResponse::new(detail.document, None),
        chunks_preview,
    }))
}

/// Create a document and index it synchronously
pub async fn create_document(
    State(state): State<AppState>,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>)> {
    validate_request(&request)?;

    let processed = match (request.file_path, request.url) {
        (Some(_), Some(_)) => {
            return Err(AppError::invalid_input(
                "provide either url or file_path, not both",
            ))
        }
        (Some(file_path), None) => {
            state
                .documents
                .create_from_file(
                    &PathBuf::from(file_path),
                    Some(request.title),
                    request.document_number,
                )
                .await?
        }
        (None, Some(url)) => {
            let content = request
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| {
                    AppError::invalid_input("content is required for url documents")
                })?;

            state
                .documents
                .create_from_text(
                    NewDocument {
                        title: request.title,
                        document_number: request.document_number,
                        url: Some(url),
                        file_path: None,
                    },
                    &content,
                )
                .await?
        }
        (None, None) => return Err(AppError::invalid_input("url or file_path is required")),
    };

    tracing::info!(
        document_id = %processed.document.id,
        chunk_count = processed.chunk_count,
        "Document created"
    );

    Ok((StatusCode::CREATED, Json(processed.into())))
}

/// Update document metadata
pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>> {
    validate_request(&request)?;

    let document = state
        .documents
        .update(
            id,
            DocumentChanges {
                title: request.title,
                document_number: request.document_number,
            },
        )
        .await?;

    Ok(Json(DocumentResponse::new(document, None)))
}

/// Delete a document and its chunks
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>> {
    let deleted_chunks = state.documents.delete(id).await?;

    Ok(Json(DeleteResponse {
        status: "deleted".to_string(),
        deleted_chunks,
    }))
}

/// Reload a document from its origin and rebuild its chunks
pub async fn reprocess_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>> {
    let processed = state.documents.reprocess(id).await?;
    Ok(Json(processed.into()))
}

fn preview_text(content: &str) -> String {
    truncate_text(content, PREVIEW_CHARS + 3)
}
