//! Database layer for NormRAG
//!
//! Provides:
//! - SeaORM entity models
//! - Repository pattern for data access (Postgres + pgvector)
//! - In-memory store with the same contracts
//! - Connection pool management and schema bootstrap

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::{
    validate_new_chunks, DocumentChanges, DocumentStore, DocumentSummary, NewDocument,
};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");
        Ok(Self { conn })
    }

    /// SeaORM connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Underlying sqlx pool, used where pgvector bindings are needed
    pub fn pg_pool(&self) -> &sqlx::PgPool {
        self.conn.get_postgres_connection_pool()
    }

    /// Create the pgvector extension, tables and indexes if missing
    pub async fn init_schema(&self, dimension: usize) -> Result<()> {
        for statement in schema_statements(dimension) {
            self.conn.execute_unprepared(&statement).await?;
        }
        info!(dimension, "Database schema ready");
        Ok(())
    }
}

fn schema_statements(dimension: usize) -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id UUID PRIMARY KEY,
            title TEXT NOT NULL,
            document_number TEXT,
            url TEXT,
            file_path TEXT,
            status TEXT NOT NULL DEFAULT 'processing'
                CHECK (status IN ('processing', 'completed', 'failed')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id UUID PRIMARY KEY,
                document_id UUID NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL CHECK (content <> ''),
                article_number TEXT,
                embedding vector({}),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (document_id, chunk_index)
            )
            "#,
            dimension
        ),
        "CREATE INDEX IF NOT EXISTS documents_created_at_idx ON documents (created_at DESC)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS chunks_document_id_idx ON chunks (document_id)".to_string(),
        "CREATE INDEX IF NOT EXISTS chunks_embedding_idx ON chunks USING hnsw (embedding vector_cosine_ops)"
            .to_string(),
    ]
}
