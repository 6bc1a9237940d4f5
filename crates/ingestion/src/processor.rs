//! Document lifecycle service
//!
//! Core ingestion logic: content loading, chunking, embedding and atomic
//! chunk replacement, with status bookkeeping and per-document locking.

use crate::chunker::{TextChunk, TextChunker};
use crate::errors::IngestionError;
use crate::loader::ContentLoader;
use normrag_common::config::RagConfig;
use normrag_common::db::models::{Chunk, Document, DocumentStatus};
use normrag_common::db::{DocumentChanges, DocumentStore, DocumentSummary, NewDocument};
use normrag_common::embeddings::{Embedder, EmbeddingMode};
use normrag_common::errors::AppError;
use normrag_common::metrics;
use normrag_common::retrieval::{ChunkStore, NewChunk};
use normrag_common::text::extract_article_number;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Chunks shown in a document detail view
pub const PREVIEW_CHUNKS: u64 = 3;

type ServiceResult<T> = Result<T, IngestionError>;

// ============================================================================
// Per-document locking
// ============================================================================

/// One async mutex per document id.
///
/// Every writer of a document's chunks holds its guard for the whole
/// operation, so delete-then-insert sequences never interleave. An entry
/// lives only while some guard or waiter references it.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Arc<StdMutex<LockMap>>,
}

type LockMap = HashMap<Uuid, Arc<Mutex<()>>>;

impl DocumentLocks {
    pub async fn acquire(&self, id: Uuid) -> DocumentGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;

        DocumentGuard {
            id,
            lock,
            guard: Some(guard),
            registry: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive access to one document; prunes its registry entry on drop
/// when nobody else is waiting
pub struct DocumentGuard {
    id: Uuid,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<StdMutex<LockMap>>,
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // map entry + this guard's clone
        let idle = locks
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if idle {
            locks.remove(&self.id);
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedDocument {
    pub document: Document,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    pub document: Document,
    pub preview: Vec<Chunk>,
}

/// Outcome of a batch run (directory index or full reindex)
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub succeeded: Vec<ProcessedDocument>,
    /// Source (path or document id) and error message
    pub failed: Vec<(String, String)>,
}

// ============================================================================
// Service
// ============================================================================

pub struct DocumentService {
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    chunker: TextChunker,
    loader: Arc<dyn ContentLoader>,
    locks: DocumentLocks,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        chunker: TextChunker,
        loader: Arc<dyn ContentLoader>,
        config: &RagConfig,
    ) -> Self {
        Self {
            documents,
            chunks,
            embedder,
            chunker,
            loader,
            locks: DocumentLocks::default(),
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Register a document whose text is already at hand and index it
    #[instrument(skip(self, new, content), fields(title = %new.title))]
    pub async fn create_from_text(
        &self,
        new: NewDocument,
        content: &str,
    ) -> ServiceResult<ProcessedDocument> {
        new.validate()?;
        if content.trim().is_empty() {
            return Err(AppError::invalid_input("document content must not be blank").into());
        }

        let document = self.documents.create_document(new).await?;
        let _guard = self.locks.acquire(document.id).await;
        self.process(document.id, content).await
    }

    /// Load a local PDF/TXT file, register it and index it.
    ///
    /// The file is read before anything is stored, so a rejected file
    /// leaves no document behind.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn create_from_file(
        &self,
        path: &Path,
        title: Option<String>,
        document_number: Option<String>,
    ) -> ServiceResult<ProcessedDocument> {
        let content = self.loader.load_file(path).await?;

        let title = title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "Untitled".to_string());

        self.create_from_text(
            NewDocument {
                title,
                document_number,
                url: None,
                file_path: Some(path.display().to_string()),
            },
            &content,
        )
        .await
    }

    /// Reload a document from its origin and rebuild all of its chunks
    #[instrument(skip(self))]
    pub async fn reprocess(&self, id: Uuid) -> ServiceResult<ProcessedDocument> {
        let _guard = self.locks.acquire(id).await;

        let document = self.require(id).await?;
        if document.document_status() != DocumentStatus::Processing {
            self.documents
                .set_document_status(id, DocumentStatus::Processing)
                .await?;
        }

        let content = match self.loader.load(&document).await {
            Ok(content) => content,
            Err(e) => {
                self.mark_failed(id, &e).await;
                return Err(e);
            }
        };

        self.process(id, &content).await
    }

    /// Delete a document and all of its chunks; returns the chunk count
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> ServiceResult<u64> {
        let deleted = {
            let _guard = self.locks.acquire(id).await;
            self.documents.delete_document(id).await?
        };

        info!(document_id = %id, deleted_chunks = deleted, "Document deleted");
        Ok(deleted)
    }

    /// Update title and/or number; content is left alone
    #[instrument(skip(self, changes))]
    pub async fn update(&self, id: Uuid, changes: DocumentChanges) -> ServiceResult<Document> {
        if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(AppError::Validation {
                message: "title must not be blank".to_string(),
                field: Some("title".to_string()),
            }
            .into());
        }

        let _guard = self.locks.acquire(id).await;
        Ok(self.documents.update_document(id, changes).await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<DocumentDetail> {
        let document = self.require(id).await?;
        let preview = self.documents.chunk_preview(id, PREVIEW_CHUNKS).await?;
        Ok(DocumentDetail { document, preview })
    }

    pub async fn list(&self, skip: u64, limit: u64) -> ServiceResult<(Vec<DocumentSummary>, u64)> {
        Ok(self.documents.list_documents(skip, limit).await?)
    }

    /// Index every supported file directly inside `dir`, in name order.
    /// Failures are collected, not fatal.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn index_directory(&self, dir: &Path) -> ServiceResult<BatchSummary> {
        let mut paths: Vec<PathBuf> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && self.loader.supports(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut summary = BatchSummary::default();
        for path in paths {
            match self.create_from_file(&path, None, None).await {
                Ok(processed) => summary.succeeded.push(processed),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to index file");
                    summary.failed.push((path.display().to_string(), e.to_string()));
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Directory indexing complete"
        );
        Ok(summary)
    }

    /// Reprocess every stored document
    pub async fn reprocess_all(&self) -> ServiceResult<BatchSummary> {
        let mut summary = BatchSummary::default();

        for id in self.documents.all_document_ids().await? {
            match self.reprocess(id).await {
                Ok(processed) => summary.succeeded.push(processed),
                Err(e) => summary.failed.push((id.to_string(), e.to_string())),
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Reindex complete"
        );
        Ok(summary)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn require(&self, id: Uuid) -> ServiceResult<Document> {
        self.documents
            .find_document(id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: id.to_string() }.into())
    }

    /// Index `content` for a document in `processing` state and settle its
    /// status. Caller holds the document lock.
    async fn process(&self, id: Uuid, content: &str) -> ServiceResult<ProcessedDocument> {
        let start = Instant::now();

        match self.index_content(id, content).await {
            Ok(chunk_count) => {
                let document = self
                    .documents
                    .set_document_status(id, DocumentStatus::Completed)
                    .await?;
                metrics::record_ingestion(start.elapsed().as_secs_f64(), chunk_count);
                info!(document_id = %id, chunk_count, "Document processed");
                Ok(ProcessedDocument {
                    document,
                    chunk_count,
                })
            }
            Err(e) => {
                self.mark_failed(id, &e).await;
                Err(e)
            }
        }
    }

    async fn index_content(&self, id: Uuid, content: &str) -> ServiceResult<usize> {
        let text_chunks = self
            .chunker
            .chunk(content, self.chunk_size, self.chunk_overlap)?;
        if text_chunks.is_empty() {
            return Err(AppError::invalid_input("document has no indexable text").into());
        }

        let texts: Vec<String> = text_chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts, EmbeddingMode::Document)
            .await?;

        if embeddings.len() != text_chunks.len() {
            return Err(AppError::upstream(
                self.embedder.model_name(),
                format!(
                    "expected {} embeddings, got {}",
                    text_chunks.len(),
                    embeddings.len()
                ),
            )
            .into());
        }

        let new_chunks: Vec<NewChunk> = text_chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| to_new_chunk(chunk, embedding))
            .collect();

        Ok(self.chunks.replace_chunks(id, new_chunks).await?)
    }

    async fn mark_failed(&self, id: Uuid, cause: &IngestionError) {
        error!(document_id = %id, error = %cause, "Document processing failed");
        metrics::record_ingestion_failure();

        if let Err(e) = self
            .documents
            .set_document_status(id, DocumentStatus::Failed)
            .await
        {
            warn!(document_id = %id, error = %e, "Could not mark document as failed");
        }
    }
}

fn to_new_chunk(chunk: TextChunk, embedding: Vec<f32>) -> NewChunk {
    NewChunk {
        chunk_index: chunk.index,
        article_number: extract_article_number(&chunk.content),
        content: chunk.content,
        embedding,
    }
}
