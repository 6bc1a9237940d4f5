//! Document persistence contract
//!
//! Implemented by the Postgres [`Repository`](super::Repository) and by
//! [`MemoryStore`](super::MemoryStore) for tests and local runs.

use crate::db::models::{Chunk, Document, DocumentStatus};
use crate::errors::{AppError, Result};
use crate::retrieval::NewChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for a document about to be ingested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub title: String,
    pub document_number: Option<String>,
    pub url: Option<String>,
    pub file_path: Option<String>,
}

impl NewDocument {
    /// Exactly one of `url` / `file_path` must name the content origin
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation {
                message: "title must not be blank".to_string(),
                field: Some("title".to_string()),
            });
        }

        let has_url = self.url.as_deref().is_some_and(|u| !u.trim().is_empty());
        let has_file = self.file_path.as_deref().is_some_and(|p| !p.trim().is_empty());
        if has_url == has_file {
            return Err(AppError::invalid_input(
                "exactly one of url or file_path must be set",
            ));
        }
        Ok(())
    }
}

/// Partial metadata update; `None` leaves the field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentChanges {
    pub title: Option<String>,
    pub document_number: Option<String>,
}

/// A document with the number of chunks it currently owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: Document,
    pub chunk_count: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document in `processing` state
    async fn create_document(&self, new: NewDocument) -> Result<Document>;

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>>;

    /// Newest first, with total count
    async fn list_documents(&self, skip: u64, limit: u64) -> Result<(Vec<DocumentSummary>, u64)>;

    async fn all_document_ids(&self) -> Result<Vec<Uuid>>;

    async fn update_document(&self, id: Uuid, changes: DocumentChanges) -> Result<Document>;

    /// Move to `status`, enforcing [`DocumentStatus::transition`]
    async fn set_document_status(&self, id: Uuid, status: DocumentStatus) -> Result<Document>;

    /// Delete the chunks then the document in one transaction.
    /// Returns how many chunks went with it.
    async fn delete_document(&self, id: Uuid) -> Result<u64>;

    /// First `limit` chunks by index
    async fn chunk_preview(&self, id: Uuid, limit: u64) -> Result<Vec<Chunk>>;

    async fn count_documents(&self) -> Result<u64>;

    async fn count_chunks(&self) -> Result<u64>;
}

/// Check chunk invariants before any write: non-empty content, contiguous
/// zero-based indices, embeddings of the configured dimension.
pub fn validate_new_chunks(chunks: &[NewChunk], dimension: usize) -> Result<()> {
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index != expected as i32 {
            return Err(AppError::invalid_input(format!(
                "chunk indices must be contiguous from 0, found {} at position {}",
                chunk.chunk_index, expected
            )));
        }
        if chunk.content.trim().is_empty() {
            return Err(AppError::invalid_input(format!(
                "chunk {} has empty content",
                chunk.chunk_index
            )));
        }
        if chunk.embedding.len() != dimension {
            return Err(AppError::invalid_input(format!(
                "chunk {} embedding has dimension {}, expected {}",
                chunk.chunk_index,
                chunk.embedding.len(),
                dimension
            )));
        }
    }
    Ok(())
}

pub(crate) fn document_not_found(id: Uuid) -> AppError {
    AppError::DocumentNotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i32, content: &str, dim: usize) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: content.to_string(),
            article_number: None,
            embedding: vec![0.0; dim],
        }
    }

    #[test]
    fn test_origin_rule() {
        let mut doc = NewDocument {
            title: "Положення".to_string(),
            ..NewDocument::default()
        };
        assert!(doc.validate().is_err());

        doc.url = Some("https://sumdu.edu.ua/doc".to_string());
        assert!(doc.validate().is_ok());

        doc.file_path = Some("data/documents/a.pdf".to_string());
        assert!(doc.validate().is_err());

        doc.url = None;
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_blank_title_rejected() {
        let doc = NewDocument {
            title: "  ".to_string(),
            url: Some("https://x".to_string()),
            ..NewDocument::default()
        };
        assert!(matches!(doc.validate(), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_chunk_validation() {
        assert!(validate_new_chunks(&[chunk(0, "a", 3), chunk(1, "b", 3)], 3).is_ok());
        assert!(validate_new_chunks(&[chunk(0, "a", 3), chunk(2, "b", 3)], 3).is_err());
        assert!(validate_new_chunks(&[chunk(0, " ", 3)], 3).is_err());
        assert!(validate_new_chunks(&[chunk(0, "a", 2)], 3).is_err());
        assert!(validate_new_chunks(&[], 3).is_ok());
    }
}
