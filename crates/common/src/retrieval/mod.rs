//! Similarity retrieval
//!
//! Provides:
//! - `VectorIndex`: nearest-neighbour search by cosine similarity
//! - `ChunkStore`: chunk lookup by id and atomic per-document replacement
//! - `Retriever`: query embedding + index search + chunk resolution

use crate::config::RagConfig;
use crate::embeddings::{fingerprint, Embedder, EmbeddingMode};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

// ============================================================================
// Collaborator contracts
// ============================================================================

/// One index hit. `similarity = 1 - cosine_distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: Uuid,
    pub similarity: f64,
}

/// Nearest-neighbour search over chunk embeddings.
///
/// Implementations return at most `top_k` matches with
/// `similarity >= min_similarity`, most similar first.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest_neighbors(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<VectorMatch>>;
}

/// Chunk content joined with the metadata of its owning document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub document_number: Option<String>,
    pub article_number: Option<String>,
    pub chunk_index: i32,
    pub content: String,
}

/// A chunk ready for insertion, embedding attached
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub chunk_index: i32,
    pub content: String,
    pub article_number: Option<String>,
    pub embedding: Vec<f32>,
}

/// Chunk persistence needed by retrieval and ingestion
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Resolve ids to chunks. Unknown ids are simply absent from the result.
    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<ChunkRecord>>;

    /// Replace every chunk of a document in one atomic step.
    ///
    /// Readers observe either the old set or the new set, never a mix.
    /// Returns the number of chunks inserted.
    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<usize>;
}

// ============================================================================
// Retriever
// ============================================================================

/// A retrieved chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    pub document_number: Option<String>,
    pub article_number: Option<String>,
    pub chunk_index: i32,
    pub content: String,
    pub similarity: f64,
}

impl RetrievedChunk {
    pub fn new(record: ChunkRecord, similarity: f64) -> Self {
        Self {
            chunk_id: record.chunk_id,
            document_id: record.document_id,
            document_title: record.document_title,
            document_number: record.document_number,
            article_number: record.article_number,
            chunk_index: record.chunk_index,
            content: record.content,
            similarity,
        }
    }
}

/// Embeds queries and resolves index hits to stored chunks
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ChunkStore>,
    default_top_k: usize,
    default_threshold: f64,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            default_top_k: config.top_k,
            default_threshold: config.similarity_threshold,
        }
    }

    /// Find the chunks most similar to `query`, most similar first.
    ///
    /// `top_k` and `similarity_threshold` fall back to configuration.
    /// A blank query fails with `InvalidInput` before any provider call.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn search_by_text(
        &self,
        query: &str,
        top_k: Option<usize>,
        similarity_threshold: Option<f64>,
    ) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(AppError::invalid_input("query must not be blank"));
        }

        let embedding = self.embedder.embed(query, EmbeddingMode::Query).await?;
        self.search_by_embedding(&embedding, top_k, similarity_threshold)
            .await
    }

    /// Search with a precomputed query embedding
    pub async fn search_by_embedding(
        &self,
        embedding: &[f32],
        top_k: Option<usize>,
        similarity_threshold: Option<f64>,
    ) -> Result<Vec<RetrievedChunk>> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let threshold = similarity_threshold.unwrap_or(self.default_threshold);

        if top_k == 0 {
            return Ok(Vec::new());
        }

        let mut matches = self
            .index
            .nearest_neighbors(embedding, top_k, threshold)
            .await?;

        // Hold the contract even if an index is sloppy about it
        matches.retain(|m| m.similarity >= threshold);
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        matches.truncate(top_k);

        debug!(
            query_fingerprint = %fingerprint(embedding),
            hits = matches.len(),
            top_k,
            threshold,
            "Vector search complete"
        );

        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = matches.iter().map(|m| m.chunk_id).collect();
        let mut records: HashMap<Uuid, ChunkRecord> = self
            .store
            .load_chunks(&ids)
            .await?
            .into_iter()
            .map(|r| (r.chunk_id, r))
            .collect();

        // Ids deleted since indexing are dropped silently
        let results: Vec<RetrievedChunk> = matches
            .into_iter()
            .filter_map(|m| {
                records
                    .remove(&m.chunk_id)
                    .map(|record| RetrievedChunk::new(record, m.similarity))
            })
            .collect();

        debug!(resolved = results.len(), "Chunks resolved");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct FixedIndex {
        matches: Vec<VectorMatch>,
        calls: AtomicUsize,
    }

    impl FixedIndex {
        fn new(matches: Vec<VectorMatch>) -> Self {
            Self {
                matches,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn nearest_neighbors(
            &self,
            _query: &[f32],
            _top_k: usize,
            _min_similarity: f64,
        ) -> Result<Vec<VectorMatch>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(self.matches.clone())
        }
    }

    struct FixedStore {
        records: Vec<ChunkRecord>,
    }

    #[async_trait]
    impl ChunkStore for FixedStore {
        async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<ChunkRecord>> {
            Ok(self
                .records
                .iter()
                .filter(|r| ids.contains(&r.chunk_id))
                .cloned()
                .collect())
        }

        async fn replace_chunks(&self, _document_id: Uuid, chunks: Vec<NewChunk>) -> Result<usize> {
            Ok(chunks.len())
        }
    }

    fn record(id: Uuid, content: &str) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id,
            document_id: Uuid::nil(),
            document_title: "Положення про стипендії".to_string(),
            document_number: Some("123-р".to_string()),
            article_number: None,
            chunk_index: 0,
            content: content.to_string(),
        }
    }

    fn config() -> RagConfig {
        RagConfig {
            top_k: 3,
            similarity_threshold: 0.7,
            ..RagConfig::default()
        }
    }

    fn retriever(index: Arc<FixedIndex>, records: Vec<ChunkRecord>) -> Retriever {
        Retriever::new(
            Arc::new(MockEmbedder::new(8)),
            index,
            Arc::new(FixedStore { records }),
            &config(),
        )
    }

    #[tokio::test]
    async fn test_blank_query_rejected_before_index() {
        let index = Arc::new(FixedIndex::new(vec![]));
        let retriever = retriever(index.clone(), vec![]);

        let err = retriever.search_by_text("   ", None, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
        assert_eq!(index.calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_rows_gives_empty_result() {
        let index = Arc::new(FixedIndex::new(vec![]));
        let retriever = retriever(index, vec![]);

        let results = retriever
            .search_by_embedding(&[0.1, 0.2, 0.3], None, None)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_filters_sorts_and_caps() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let index = Arc::new(FixedIndex::new(vec![
            VectorMatch { chunk_id: ids[0], similarity: 0.75 },
            VectorMatch { chunk_id: ids[1], similarity: 0.95 },
            VectorMatch { chunk_id: ids[2], similarity: 0.5 },
            VectorMatch { chunk_id: ids[3], similarity: 0.85 },
            VectorMatch { chunk_id: ids[4], similarity: 0.8 },
        ]));
        let records = ids.iter().map(|id| record(*id, "текст")).collect();
        let retriever = retriever(index, records);

        let results = retriever.search_by_text("стипендія", None, None).await.unwrap();

        assert_eq!(results.len(), 3);
        let sims: Vec<f64> = results.iter().map(|r| r.similarity).collect();
        assert_eq!(sims, vec![0.95, 0.85, 0.8]);
        assert!(results.iter().all(|r| r.similarity >= 0.7));
    }

    #[tokio::test]
    async fn test_explicit_overrides() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let index = Arc::new(FixedIndex::new(vec![
            VectorMatch { chunk_id: ids[0], similarity: 0.6 },
            VectorMatch { chunk_id: ids[1], similarity: 0.4 },
            VectorMatch { chunk_id: ids[2], similarity: 0.2 },
        ]));
        let records = ids.iter().map(|id| record(*id, "текст")).collect();
        let retriever = retriever(index, records);

        let results = retriever
            .search_by_text("гуртожиток", Some(2), Some(0.3))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, ids[0]);
        assert_eq!(results[1].chunk_id, ids[1]);
    }

    #[tokio::test]
    async fn test_stale_ids_dropped() {
        let live = Uuid::new_v4();
        let deleted = Uuid::new_v4();
        let index = Arc::new(FixedIndex::new(vec![
            VectorMatch { chunk_id: deleted, similarity: 0.99 },
            VectorMatch { chunk_id: live, similarity: 0.9 },
        ]));
        let retriever = retriever(index, vec![record(live, "живий чанк")]);

        let results = retriever.search_by_text("запит", None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, live);
        assert_eq!(results[0].content, "живий чанк");
    }

    #[tokio::test]
    async fn test_ties_keep_index_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let index = Arc::new(FixedIndex::new(vec![
            VectorMatch { chunk_id: a, similarity: 0.8 },
            VectorMatch { chunk_id: b, similarity: 0.8 },
        ]));
        let retriever = retriever(index, vec![record(b, "b"), record(a, "a")]);

        let results = retriever.search_by_text("запит", None, None).await.unwrap();
        assert_eq!(results[0].chunk_id, a);
        assert_eq!(results[1].chunk_id, b);
    }
}
