//! Repository pattern for database operations
//!
//! Documents go through SeaORM entities. Chunk embeddings live in a
//! pgvector column, so chunk writes and similarity search use sqlx with
//! `pgvector::Vector` bindings on the same pool.

use crate::db::models::*;
use crate::db::store::{
    document_not_found, validate_new_chunks, DocumentChanges, DocumentStore, DocumentSummary,
    NewDocument,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::retrieval::{ChunkRecord, ChunkStore, NewChunk, VectorIndex, VectorMatch};
use async_trait::async_trait;
use pgvector::Vector;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
    dimension: usize,
}

impl Repository {
    /// Create a new repository; `dimension` is the embedding column size
    pub fn new(pool: DbPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    fn conn(&self) -> &DatabaseConnection {
        self.pool.connection()
    }

    async fn chunk_counts(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT document_id, COUNT(*)
            FROM chunks
            WHERE document_id = ANY($1)
            GROUP BY document_id
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool.pg_pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, count)| (id, count.max(0) as u64))
            .collect())
    }
}

// ============================================================================
// Document Operations
// ============================================================================

#[async_trait]
impl DocumentStore for Repository {
    async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let now = chrono::Utc::now();

        let document = DocumentActiveModel {
            id: Set(Uuid::now_v7()),
            title: Set(new.title),
            document_number: Set(new.document_number),
            url: Set(new.url),
            file_path: Set(new.file_path),
            status: Set(DocumentStatus::Processing.into()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        document.insert(self.conn()).await.map_err(Into::into)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(id)
            .one(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn list_documents(&self, skip: u64, limit: u64) -> Result<(Vec<DocumentSummary>, u64)> {
        let total = DocumentEntity::find().count(self.conn()).await?;

        let documents = DocumentEntity::find()
            .order_by_desc(DocumentColumn::CreatedAt)
            .order_by_desc(DocumentColumn::Id)
            .offset(skip)
            .limit(limit)
            .all(self.conn())
            .await?;

        let ids: Vec<Uuid> = documents.iter().map(|d| d.id).collect();
        let counts = self.chunk_counts(&ids).await?;

        let summaries = documents
            .into_iter()
            .map(|document| DocumentSummary {
                chunk_count: counts.get(&document.id).copied().unwrap_or(0),
                document,
            })
            .collect();

        Ok((summaries, total))
    }

    async fn all_document_ids(&self) -> Result<Vec<Uuid>> {
        DocumentEntity::find()
            .select_only()
            .column(DocumentColumn::Id)
            .order_by_asc(DocumentColumn::CreatedAt)
            .into_tuple::<Uuid>()
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn update_document(&self, id: Uuid, changes: DocumentChanges) -> Result<Document> {
        let mut document: DocumentActiveModel = DocumentEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .ok_or_else(|| document_not_found(id))?
            .into();

        if let Some(title) = changes.title {
            document.title = Set(title);
        }
        if let Some(number) = changes.document_number {
            document.document_number = Set(Some(number));
        }
        document.updated_at = Set(chrono::Utc::now().into());

        document.update(self.conn()).await.map_err(Into::into)
    }

    async fn set_document_status(&self, id: Uuid, status: DocumentStatus) -> Result<Document> {
        let current = DocumentEntity::find_by_id(id)
            .one(self.conn())
            .await?
            .ok_or_else(|| document_not_found(id))?;

        let next = current.document_status().transition(status)?;

        let mut document: DocumentActiveModel = current.into();
        document.status = Set(next.into());
        document.updated_at = Set(chrono::Utc::now().into());

        document.update(self.conn()).await.map_err(Into::into)
    }

    async fn delete_document(&self, id: Uuid) -> Result<u64> {
        let txn = self.conn().begin().await?;

        if DocumentEntity::find_by_id(id).one(&txn).await?.is_none() {
            return Err(document_not_found(id));
        }

        let deleted_chunks = ChunkEntity::delete_many()
            .filter(ChunkColumn::DocumentId.eq(id))
            .exec(&txn)
            .await?
            .rows_affected;

        DocumentEntity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        debug!(document_id = %id, deleted_chunks, "Document deleted");
        Ok(deleted_chunks)
    }

    async fn chunk_preview(&self, id: Uuid, limit: u64) -> Result<Vec<Chunk>> {
        ChunkEntity::find()
            .filter(ChunkColumn::DocumentId.eq(id))
            .order_by_asc(ChunkColumn::ChunkIndex)
            .limit(limit)
            .all(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn count_documents(&self) -> Result<u64> {
        DocumentEntity::find()
            .count(self.conn())
            .await
            .map_err(Into::into)
    }

    async fn count_chunks(&self) -> Result<u64> {
        ChunkEntity::find()
            .count(self.conn())
            .await
            .map_err(Into::into)
    }
}

// ============================================================================
// Chunk Operations
// ============================================================================

#[async_trait]
impl ChunkStore for Repository {
    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(Uuid, Uuid, String, Option<String>, Option<String>, i32, String)> =
            sqlx::query_as(
                r#"
                SELECT c.id, c.document_id, d.title, d.document_number,
                       c.article_number, c.chunk_index, c.content
                FROM chunks c
                JOIN documents d ON d.id = c.document_id
                WHERE c.id = ANY($1)
                "#,
            )
            .bind(ids)
            .fetch_all(self.pool.pg_pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(chunk_id, document_id, document_title, document_number, article_number, chunk_index, content)| {
                    ChunkRecord {
                        chunk_id,
                        document_id,
                        document_title,
                        document_number,
                        article_number,
                        chunk_index,
                        content,
                    }
                },
            )
            .collect())
    }

    async fn replace_chunks(&self, document_id: Uuid, chunks: Vec<NewChunk>) -> Result<usize> {
        validate_new_chunks(&chunks, self.dimension)?;

        let mut tx = self.pool.pg_pool().begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, document_id, chunk_index, content, article_number, embedding, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, NOW())
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.article_number)
            .bind(Vector::from(chunk.embedding.clone()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(document_id = %document_id, inserted = chunks.len(), "Chunks replaced");
        Ok(chunks.len())
    }
}

// ============================================================================
// Vector Search
// ============================================================================

#[async_trait]
impl VectorIndex for Repository {
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

        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            r#"
            SELECT id, (1 - (embedding <=> $1))::float8 AS similarity
            FROM chunks
            WHERE embedding IS NOT NULL
              AND 1 - (embedding <=> $1) >= $2
            ORDER BY embedding <=> $1, id
            LIMIT $3
            "#,
        )
        .bind(Vector::from(query.to_vec()))
        .bind(min_similarity)
        .bind(top_k as i64)
        .fetch_all(self.pool.pg_pool())
        .await
        .map_err(|e| AppError::upstream("vector_index", e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(chunk_id, similarity)| VectorMatch {
                chunk_id,
                similarity,
            })
            .collect())
    }
}
