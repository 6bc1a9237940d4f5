//! NormRAG Ingestion
//!
//! Turns normative documents into retrievable chunks:
//! - Sentence-aligned, token-bounded chunking with overlap
//! - PDF / plain-text content loading
//! - The document lifecycle service (create, reprocess, update, delete)

pub mod chunker;
pub mod errors;
pub mod loader;
pub mod pdf;
pub mod processor;

pub use chunker::{TextChunk, TextChunker};
pub use errors::IngestionError;
pub use loader::{ContentLoader, LocalContentLoader};
pub use processor::{
    BatchSummary, DocumentDetail, DocumentGuard, DocumentLocks, DocumentService, ProcessedDocument,
};

use normrag_common::config::AppConfig;
use normrag_common::db::DocumentStore;
use normrag_common::embeddings::Embedder;
use normrag_common::retrieval::ChunkStore;
use normrag_common::text::TiktokenCounter;
use std::sync::Arc;

/// Wire a [`DocumentService`] with the cl100k tokenizer and the local
/// file loader
pub fn document_service<S>(
    config: &AppConfig,
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
) -> normrag_common::Result<DocumentService>
where
    S: DocumentStore + ChunkStore + 'static,
{
    let chunker = TextChunker::new(Arc::new(TiktokenCounter::cl100k()?));
    let loader = Arc::new(LocalContentLoader::new(&config.ingestion));

    Ok(DocumentService::new(
        store.clone(),
        store,
        embedder,
        chunker,
        loader,
        &config.rag,
    ))
}
