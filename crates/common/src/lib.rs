//! NormRAG Common Library
//!
//! Shared code for the NormRAG services including:
//! - The RAG core: retrieval, query understanding, context structuring,
//!   answer generation and the pipeline that sequences them
//! - Embedding and LLM provider clients
//! - Database models, repository and vector index
//! - Text utilities (cleaning, sentence splitting, token counting)
//! - Error types, configuration and metrics

pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod retrieval;
pub mod text;

// Re-export commonly used types
pub use config::AppConfig;
pub use context::{QueryAnswer, RagPipeline};
pub use db::{DocumentStore, Repository};
pub use embeddings::{Embedder, EmbeddingMode};
pub use errors::{AppError, Result};
pub use retrieval::{ChunkStore, Retriever, VectorIndex};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "embed-multilingual-v3.0";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1024;
