//! Chunk entity
//!
//! The `embedding vector(N)` column is not mapped here; it is written and
//! searched through sqlx with pgvector bindings in the repository.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub document_id: Uuid,

    /// Zero-based, contiguous within a document
    pub chunk_index: i32,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// Structural marker found in the chunk, e.g. "ст. 12"
    #[sea_orm(column_type = "Text", nullable)]
    pub article_number: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::DocumentId",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document,
}

impl Related<super::document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Document.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
