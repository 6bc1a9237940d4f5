//! In-memory store for tests and database-free runs.
//!
//! One `tokio::sync::RwLock` guards all state, so chunk replacement and
//! cascade deletes are atomic for readers. Vector search is brute-force
//! cosine similarity over every stored embedding.

use crate::db::models::{Chunk, Document, DocumentStatus};
use crate::db::store::{
    document_not_found, validate_new_chunks, DocumentChanges, DocumentStore, DocumentSummary,
    NewDocument,
};
use crate::errors::{AppError, Result};
use crate::retrieval::{ChunkRecord, ChunkStore, NewChunk, VectorIndex, VectorMatch};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct StoredChunk {
    chunk: Chunk,
    embedding: Vec<f32>,
}

#[derive(Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    /// Insertion order, oldest first
    order: Vec<Uuid>,
    /// Chunks per document, ordered by chunk index
    chunks: HashMap<Uuid, Vec<StoredChunk>>,
}

impl State {
    fn chunk_count(&self, document_id: &Uuid) -> u64 {
        self.chunks.get(document_id).map(|c| c.len() as u64).unwrap_or(0)
    }
}

/// In-memory implementation of every persistence contract
pub struct MemoryStore {
    dimension: usize,
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(State::default()),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();
        let document = Document {
            id: Uuid::now_v7(),
            title: new.title,
            document_number: new.document_number,
            url: new.url,
            file_path: new.file_path,
            status: DocumentStatus::Processing.into(),
            created_at: now.into(),
            updated_at: now.into(),
        };

        let mut state = self.state.write().await;
        state.order.push(document.id);
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self, skip: u64, limit: u64) -> Result<(Vec<DocumentSummary>, u64)> {
        let state = self.state.read().await;
        let total = state.order.len() as u64;

        let summaries = state
            .order
            .iter()
            .rev()
            .skip(skip as usize)
            .take(limit as usize)
            .filter_map(|id| {
                state.documents.get(id).map(|document| DocumentSummary {
                    document: document.clone(),
                    chunk_count: state.chunk_count(id),
                })
            })
            .collect();

        Ok((summaries, total))
    }

    async fn all_document_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self.state.read().await.order.clone())
    }

    async fn update_document(&self, id: Uuid, changes: DocumentChanges) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| document_not_found(id))?;

        if let Some(title) = changes.title {
            document.title = title;
        }
        if let Some(number) = changes.document_number {
            document.document_number = Some(number);
        }
        document.updated_at = chrono::Utc::now().into();
        Ok(document.clone())
    }

    async fn set_document_status(&self, id: Uuid, status: DocumentStatus) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| document_not_found(id))?;

        let next = document.document_status().transition(status)?;
        document.status = next.into();
        document.updated_at = chrono::Utc::now().into();
        Ok(document.clone())
    }

    async fn delete_document(&self, id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        if state.documents.remove(&id).is_none() {
            return Err(document_not_found(id));
        }
        state.order.retain(|d| *d != id);
        let deleted = state.chunks.remove(&id).map(|c| c.len() as u64).unwrap_or(0);
        Ok(deleted)
    }

    async fn chunk_preview(&self, id: Uuid, limit: u64) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        Ok(state
            .chunks
            .get(&id)
            .map(|chunks| {
                chunks
                    .iter()
                    .take(limit as usize)
                    .map(|c| c.chunk.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_documents(&self) -> Result<u64> {
        Ok(self.state.read().await.documents.len() as u64)
    }

    async fn count_chunks(&self) -> Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .chunks
            .values()
            .map(|c| c.len() as u64)
            .sum())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<ChunkRecord>> {
        let state = self.state.read().await;

        let records = state
            .chunks
            .iter()
            .flat_map(|(document_id, chunks)| chunks.iter().map(move |c| (document_id, c)))
            .filter(|(_, stored)| ids.contains(&stored.chunk.id))
            .filter_map(|(document_id, stored)| {
                state.documents.get(document_id).map(|document| ChunkRecord {
                    chunk_id: stored.chunk.id,
                    document_id: *document_id,
                    document_title: document.title.clone(),
                    document_number: document.document_number.clone(),
                    article_number: stored.chunk.article_number.clone(),
                    chunk_index: stored.chunk.chunk_index,
                    content: stored.chunk.content.clone(),
                })
            })
            .collect();

        Ok(records)
    }

    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<usize> {
        validate_new_chunks(&chunks, self.dimension)?;

        let mut state = self.state.write().await;
        if !state.documents.contains_key(&document_id) {
            return Err(document_not_found(document_id));
        }

        let now = chrono::Utc::now();
        let stored: Vec<StoredChunk> = chunks
            .into_iter()
            .map(|c| StoredChunk {
                chunk: Chunk {
                    id: Uuid::now_v7(),
                    document_id,
                    chunk_index: c.chunk_index,
                    content: c.content,
                    article_number: c.article_number,
                    created_at: now.into(),
                },
                embedding: c.embedding,
            })
            .collect();

        let inserted = stored.len();
        state.chunks.insert(document_id, stored);
        Ok(inserted)
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn nearest_neighbors(
        &self,
        query: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<VectorMatch>> {
        if query.len() != self.dimension {
            return Err(AppError::invalid_input(format!(
                "query embedding has dimension {}, expected {}",
                query.len(),
                self.dimension
            )));
        }

        let state = self.state.read().await;
        let mut matches: Vec<VectorMatch> = state
            .chunks
            .values()
            .flatten()
            .map(|stored| VectorMatch {
                chunk_id: stored.chunk.id,
                similarity: cosine_similarity(query, &stored.embedding),
            })
            .filter(|m| m.similarity >= min_similarity)
            .collect();

        // Ties broken by chunk id so results do not depend on map order
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(title: &str) -> NewDocument {
        NewDocument {
            title: title.to_string(),
            url: Some(format!("https://sumdu.edu.ua/{}", title)),
            ..NewDocument::default()
        }
    }

    fn chunk(index: i32, content: &str, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: content.to_string(),
            article_number: None,
            embedding,
        }
    }

    #[tokio::test]
    async fn test_replace_discards_previous_chunks() {
        let store = MemoryStore::new(2);
        let doc = store.create_document(new_doc("a")).await.unwrap();

        store
            .replace_chunks(
                doc.id,
                vec![chunk(0, "old 0", vec![1.0, 0.0]), chunk(1, "old 1", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        store
            .replace_chunks(doc.id, vec![chunk(0, "new 0", vec![1.0, 0.0])])
            .await
            .unwrap();

        let preview = store.chunk_preview(doc.id, 10).await.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].content, "new 0");
        assert_eq!(store.count_chunks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_replacement_keeps_old_chunks() {
        let store = MemoryStore::new(2);
        let doc = store.create_document(new_doc("a")).await.unwrap();
        store
            .replace_chunks(doc.id, vec![chunk(0, "old", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .replace_chunks(doc.id, vec![chunk(0, "bad", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));

        let preview = store.chunk_preview(doc.id, 10).await.unwrap();
        assert_eq!(preview[0].content, "old");
    }

    #[tokio::test]
    async fn test_delete_cascades_and_counts() {
        let store = MemoryStore::new(2);
        let doc = store.create_document(new_doc("a")).await.unwrap();
        store
            .replace_chunks(
                doc.id,
                vec![chunk(0, "x", vec![1.0, 0.0]), chunk(1, "y", vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_document(doc.id).await.unwrap(), 2);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
        assert!(store.find_document(doc.id).await.unwrap().is_none());
        assert!(matches!(
            store.delete_document(doc.id).await,
            Err(AppError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_nearest_neighbors_threshold_and_order() {
        let store = MemoryStore::new(2);
        let doc = store.create_document(new_doc("a")).await.unwrap();
        store
            .replace_chunks(
                doc.id,
                vec![
                    chunk(0, "east", vec![1.0, 0.0]),
                    chunk(1, "north-east", vec![1.0, 1.0]),
                    chunk(2, "north", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let matches = store.nearest_neighbors(&[1.0, 0.0], 5, 0.5).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert!((matches[0].similarity - 1.0).abs() < 1e-9);
        assert!(matches[0].similarity > matches[1].similarity);

        let capped = store.nearest_neighbors(&[1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_status_transitions_enforced() {
        let store = MemoryStore::new(2);
        let doc = store.create_document(new_doc("a")).await.unwrap();
        assert_eq!(doc.document_status(), DocumentStatus::Processing);

        let done = store
            .set_document_status(doc.id, DocumentStatus::Completed)
            .await
            .unwrap();
        assert_eq!(done.document_status(), DocumentStatus::Completed);

        assert!(matches!(
            store.set_document_status(doc.id, DocumentStatus::Failed).await,
            Err(AppError::InvalidStatusTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_counts() {
        let store = MemoryStore::new(2);
        let first = store.create_document(new_doc("first")).await.unwrap();
        let second = store.create_document(new_doc("second")).await.unwrap();
        store
            .replace_chunks(first.id, vec![chunk(0, "x", vec![1.0, 0.0])])
            .await
            .unwrap();

        let (items, total) = store.list_documents(0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].document.id, second.id);
        assert_eq!(items[1].chunk_count, 1);

        let (page, _) = store.list_documents(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].document.id, first.id);
    }
}
