// Database module
// Postgres + pgvector storage: pools, retry policy, record model, stores and their registry

pub mod manager;
pub mod models;
pub mod postgres;
pub mod retry;
pub mod vector_store;

use thiserror::Error;

pub use manager::{InitReport, SingleStoreRouter, StoreManager, StoreRouter};
pub use models::{
    EmbeddingRecord, RecordMetadata, ScoredRecord, StoreName, StoredRecord, vector_literal,
};
pub use postgres::DbPool;
pub use retry::RetryPolicy;
pub use vector_store::{InsertOutcome, SearchOutcome, StoreStats, VectorStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Invalid store name: {0}")]
    InvalidStoreName(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Record content must not be empty")]
    EmptyContent,

    #[error("Embedding contains NaN or infinite values")]
    NonFiniteVector,
}
