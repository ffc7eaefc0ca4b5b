
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Connection, Postgres, QueryBuilder, Row, Transaction};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::models::{
    EmbeddingRecord, RecordMetadata, ScoredRecord, StoreName, StoredRecord, validate_vector,
    vector_literal,
};
use super::postgres::{DbPool, GuardedConnection, connect_lazy};
use super::retry::{RetryPolicy, is_transient, is_unique_violation};
use super::StoreError;
use crate::config::{Config, IndexConfig};
use crate::embeddings::normalized;
use crate::retrieval::{LineSource, SearchBackend};

/// Rows per INSERT statement; three bind parameters each keeps well under the protocol limit
const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Durable storage and approximate similarity search for one named collection
pub struct VectorStore {
    name: StoreName,
    pool: DbPool,
    index: IndexConfig,
    retry: RetryPolicy,
    schema_ready: OnceCell<()>,
}

/// Result of one `insert_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertOutcome {
    pub attempted: u64,
    pub inserted: u64,
}

impl InsertOutcome {
    /// Records dropped by the (content, filename) uniqueness constraint
    #[inline]
    pub fn skipped(&self) -> u64 {
        self.attempted.saturating_sub(self.inserted)
    }
}

/// Outcome of a similarity search; failures are reported, never raised
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Hits(Vec<ScoredRecord>),
    Empty,
    Unavailable { reason: String },
}

impl SearchOutcome {
    fn from_hits(hits: Vec<ScoredRecord>) -> Self {
        if hits.is_empty() {
            Self::Empty
        } else {
            Self::Hits(hits)
        }
    }

    #[inline]
    pub fn hits(&self) -> &[ScoredRecord] {
        match self {
            Self::Hits(hits) => hits,
            Self::Empty | Self::Unavailable { .. } => &[],
        }
    }

    #[inline]
    pub fn into_hits(self) -> Vec<ScoredRecord> {
        match self {
            Self::Hits(hits) => hits,
            Self::Empty | Self::Unavailable { .. } => Vec::new(),
        }
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub name: String,
    pub table_name: String,
    pub index_name: String,
    pub total_records: i64,
}

/// DDL and the similarity query for one store, rendered from its validated
/// name and the index settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSql {
    pub extension: String,
    pub table: String,
    pub hnsw_index: String,
    pub filename_index: String,
    pub content_text_index: String,
    pub unique_index: String,
    pub deduplicate: String,
    /// Binds the query vector literal, limit and offset. Ordered by distance
    /// alone so the planner can serve it from the HNSW index scan
    pub search: String,
}

impl SchemaSql {
    #[inline]
    pub fn render(name: &StoreName, index: &IndexConfig) -> Self {
        let table = name.table_name();
        Self {
            extension: "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    content TEXT NOT NULL,
                    embedding vector({dim}),
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb
                )",
                dim = index.embedding_dimension
            ),
            hnsw_index: format!(
                "CREATE INDEX IF NOT EXISTS {idx} ON {table} \
                 USING hnsw (embedding vector_ip_ops) \
                 WITH (m = {m}, ef_construction = {efc})",
                idx = name.hnsw_index_name(),
                m = index.hnsw_m,
                efc = index.hnsw_ef_construction
            ),
            filename_index: format!(
                "CREATE INDEX IF NOT EXISTS {idx} ON {table} USING BTREE ((metadata->>'filename'))",
                idx = name.filename_index_name()
            ),
            content_text_index: format!(
                "CREATE INDEX IF NOT EXISTS {idx} ON {table} \
                 USING GIN (to_tsvector('english', content))",
                idx = name.content_text_index_name()
            ),
            unique_index: format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {idx} ON {table} (content, (metadata->>'filename'))",
                idx = name.unique_index_name()
            ),
            deduplicate: format!(
                "DELETE FROM {table} a USING {table} b \
                 WHERE a.id > b.id \
                 AND a.content = b.content \
                 AND a.metadata->>'filename' = b.metadata->>'filename'"
            ),
            search: format!(
                "SELECT id, content, metadata, (embedding <#> $1::text::vector) * -1 AS similarity
                 FROM {table}
                 ORDER BY embedding <#> $1::text::vector
                 LIMIT $2 OFFSET $3"
            ),
        }
    }
}

impl VectorStore {
    #[inline]
    pub fn new(name: StoreName, pool: DbPool, index: IndexConfig, retry: RetryPolicy) -> Self {
        Self {
            name,
            pool,
            index,
            retry,
            schema_ready: OnceCell::new(),
        }
    }

    /// Create a handle with its own lazily connecting pool sized for this store
    #[inline]
    pub fn connect_lazy(name: StoreName, config: &Config) -> Result<Self, StoreError> {
        let pool = connect_lazy(&config.database, config.pool_for(&name))?;
        Ok(Self::new(
            name,
            pool,
            config.index,
            RetryPolicy::from_config(&config.retry),
        ))
    }

    #[inline]
    pub fn name(&self) -> &StoreName {
        &self.name
    }

    #[inline]
    pub fn table_name(&self) -> String {
        self.name.table_name()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.index.embedding_dimension as usize
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Idempotently create the table and its indexes; runs at most once per handle
    #[inline]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| self.create_schema())
            .await
            .map(|_| ())
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let sql = SchemaSql::render(&self.name, &self.index);
        debug!("Creating schema for store {}", self.name);

        self.retry
            .execute(&self.pool, "create vector extension", || {
                sqlx::query(&sql.extension)
            })
            .await?;
        self.retry
            .execute(&self.pool, "create embeddings table", || sqlx::query(&sql.table))
            .await?;

        for (label, statement) in [
            ("HNSW index", &sql.hnsw_index),
            ("filename index", &sql.filename_index),
            ("full-text index", &sql.content_text_index),
        ] {
            if let Err(e) = self
                .retry
                .execute(&self.pool, label, || sqlx::query(statement))
                .await
            {
                warn!(
                    "Failed to create {} for store {}, continuing without it: {}",
                    label, self.name, e
                );
            }
        }

        self.create_unique_index(&sql).await;

        info!("Vector store ready: {}", self.table_name());
        Ok(())
    }

    /// Unique (content, filename) index; existing duplicates are removed first if they block it
    async fn create_unique_index(&self, sql: &SchemaSql) {
        let first_try = self
            .retry
            .execute(&self.pool, "create unique index", || {
                sqlx::query(&sql.unique_index)
            })
            .await;

        match first_try {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    "Unique index for store {} blocked by duplicate rows, deduplicating: {}",
                    self.name, e
                );
                let healed = async {
                    let removed = self
                        .retry
                        .execute(&self.pool, "deduplicate rows", || {
                            sqlx::query(&sql.deduplicate)
                        })
                        .await?
                        .rows_affected();
                    info!(
                        "Removed {} duplicate rows from {}",
                        removed,
                        self.table_name()
                    );
                    self.retry
                        .execute(&self.pool, "create unique index", || {
                            sqlx::query(&sql.unique_index)
                        })
                        .await
                }
                .await;
                match healed {
                    Ok(_) => info!("Cleaned duplicates and created unique index for {}", self.name),
                    Err(e) => warn!(
                        "Unique index for store {} still missing after deduplication: {}",
                        self.name, e
                    ),
                }
            }
            Err(e) => warn!(
                "Failed to create unique index for store {}: {}",
                self.name, e
            ),
        }
    }

    /// True if any record carries `filename` in its metadata
    #[inline]
    pub async fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        self.ensure_schema().await?;
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE metadata->>'filename' = $1)",
            self.table_name()
        );
        let found = self
            .retry
            .fetch_scalar(&self.pool, "check document exists", || {
                sqlx::query_scalar::<_, bool>(&sql).bind(filename)
            })
            .await?;
        Ok(found)
    }

    /// Remove every record of `filename`; returns the number of rows deleted
    #[inline]
    pub async fn delete_document(&self, filename: &str) -> Result<u64, StoreError> {
        self.ensure_schema().await?;
        let sql = format!(
            "DELETE FROM {} WHERE metadata->>'filename' = $1",
            self.table_name()
        );
        let result = self
            .retry
            .execute(&self.pool, "delete document", || {
                sqlx::query(&sql).bind(filename)
            })
            .await?;
        Ok(result.rows_affected())
    }

    /// Insert all records in one transaction; rows conflicting on
    /// (content, filename) are skipped while the rest commit
    #[inline]
    pub async fn insert_batch(
        &self,
        records: &[EmbeddingRecord],
    ) -> Result<InsertOutcome, StoreError> {
        if records.is_empty() {
            debug!("No records to insert into {}", self.name);
            return Ok(InsertOutcome::default());
        }

        let dimension = self.dimension();
        for record in records {
            record.validate(dimension)?;
        }
        self.ensure_schema().await?;

        let rows: Vec<PreparedRow<'_>> = records
            .iter()
            .map(|record| PreparedRow {
                content: &record.content,
                vector: record.vector_literal(),
                metadata: &record.metadata,
            })
            .collect();

        let inserted = self
            .retry
            .run_if("insert batch", is_transient, || self.insert_attempt(&rows))
            .await?;

        let outcome = InsertOutcome {
            attempted: records.len() as u64,
            inserted,
        };
        debug!(
            "Inserted {} of {} records into {} ({} duplicates skipped)",
            outcome.inserted,
            outcome.attempted,
            self.name,
            outcome.skipped()
        );
        Ok(outcome)
    }

    async fn insert_attempt(&self, rows: &[PreparedRow<'_>]) -> Result<u64, sqlx::Error> {
        let mut conn = GuardedConnection::acquire(&self.pool).await?;
        let mut tx = conn.begin().await?;

        match self.insert_rows(&mut tx, rows).await {
            Ok(inserted) => {
                tx.commit().await?;
                conn.mark_clean();
                Ok(inserted)
            }
            Err(e) => {
                if tx.rollback().await.is_ok() {
                    conn.mark_clean();
                }
                Err(e)
            }
        }
    }

    async fn insert_rows(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        rows: &[PreparedRow<'_>],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (content, embedding, metadata) ",
                self.table_name()
            ));
            builder.push_values(chunk, |mut row, prepared| {
                row.push_bind(prepared.content)
                    .push_bind(prepared.vector.as_str())
                    .push_unseparated("::text::vector")
                    .push_bind(Json(prepared.metadata));
            });
            builder.push(" ON CONFLICT DO NOTHING");

            inserted += builder.build().execute(&mut **tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    /// Up to `top_k` records by descending inner-product similarity, skipping `offset`
    #[inline]
    pub async fn search(&self, query_vector: &[f32], top_k: u32, offset: u32) -> SearchOutcome {
        match self.try_search(query_vector, top_k, offset).await {
            Ok(hits) => SearchOutcome::from_hits(hits),
            Err(e) => {
                warn!("Search failed on store {}: {}", self.name, e);
                SearchOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_search(
        &self,
        query_vector: &[f32],
        top_k: u32,
        offset: u32,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        validate_vector(query_vector, self.dimension())?;
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.ensure_schema().await?;

        let vector = vector_literal(&normalized(query_vector));
        let set_ef_search = format!("SET hnsw.ef_search = {}", self.index.hnsw_ef_search);
        let sql = SchemaSql::render(&self.name, &self.index).search;

        let rows = self
            .retry
            .run_if("vector search", is_transient, || async {
                let mut conn = self.pool.acquire().await?;
                sqlx::query(&set_ef_search).execute(&mut *conn).await?;
                sqlx::query(&sql)
                    .bind(vector.as_str())
                    .bind(i64::from(top_k))
                    .bind(i64::from(offset))
                    .fetch_all(&mut *conn)
                    .await
            })
            .await?;

        let mut hits = rows
            .iter()
            .map(|row| -> Result<ScoredRecord, StoreError> {
                Ok(ScoredRecord {
                    record: stored_record(row)?,
                    similarity: row.try_get("similarity")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        order_page(&mut hits);
        Ok(hits)
    }

    /// Number of records whose similarity to the query exceeds `threshold`
    #[inline]
    pub async fn count_above(&self, query_vector: &[f32], threshold: f64) -> Result<i64, StoreError> {
        validate_vector(query_vector, self.dimension())?;
        self.ensure_schema().await?;

        let vector = vector_literal(&normalized(query_vector));
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE (embedding <#> $1::text::vector) * -1 > $2",
            self.table_name()
        );
        let count = self
            .retry
            .fetch_scalar(&self.pool, "count above threshold", || {
                sqlx::query_scalar::<_, i64>(&sql)
                    .bind(vector.as_str())
                    .bind(threshold)
            })
            .await?;
        Ok(count)
    }

    /// Records of `filename` whose line number lies in `[first_line, last_line]`, ascending
    #[inline]
    pub async fn fetch_window(
        &self,
        filename: &str,
        first_line: i64,
        last_line: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.ensure_schema().await?;
        let sql = format!(
            "WITH lines AS (
                SELECT id, content, metadata,
                       CASE WHEN jsonb_typeof(metadata->'line_number') = 'number'
                            THEN (metadata->>'line_number')::numeric END AS line_no
                FROM {}
                WHERE metadata->>'filename' = $1
             )
             SELECT id, content, metadata FROM lines
             WHERE line_no BETWEEN $2 AND $3
             ORDER BY line_no, id",
            self.table_name()
        );
        let rows = self
            .retry
            .fetch_all(&self.pool, "fetch context window", || {
                sqlx::query(&sql)
                    .bind(filename)
                    .bind(first_line)
                    .bind(last_line)
            })
            .await?;

        rows.iter()
            .map(|row| stored_record(row).map_err(StoreError::from))
            .collect()
    }

    #[inline]
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.ensure_schema().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.table_name());
        let total_records = self
            .retry
            .fetch_scalar(&self.pool, "count records", || {
                sqlx::query_scalar::<_, i64>(&sql)
            })
            .await?;

        Ok(StoreStats {
            name: self.name.to_string(),
            table_name: self.table_name(),
            index_name: self.name.hnsw_index_name(),
            total_records,
        })
    }

    /// Close the pool; waits for checked-out connections to come back
    #[inline]
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            debug!("Closing connection pool for store {}", self.name);
            self.pool.close().await;
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

struct PreparedRow<'a> {
    content: &'a str,
    vector: String,
    metadata: &'a RecordMetadata,
}

/// Descending similarity, equal similarities by ascending id
fn order_page(hits: &mut [ScoredRecord]) {
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then(a.record.id.cmp(&b.record.id))
    });
}

fn stored_record(row: &PgRow) -> Result<StoredRecord, sqlx::Error> {
    let Json(metadata): Json<Value> = row.try_get("metadata")?;
    Ok(StoredRecord {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        metadata: RecordMetadata::from_json(metadata),
    })
}

#[async_trait]
impl LineSource for VectorStore {
    async fn lines_between(
        &self,
        filename: &str,
        first_line: i64,
        last_line: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.fetch_window(filename, first_line, last_line).await
    }
}

#[async_trait]
impl SearchBackend for VectorStore {
    async fn search(&self, query_vector: &[f32], top_k: u32, offset: u32) -> SearchOutcome {
        Self::search(self, query_vector, top_k, offset).await
    }

    async fn count_above(&self, query_vector: &[f32], threshold: f64) -> Result<i64, StoreError> {
        Self::count_above(self, query_vector, threshold).await
    }
}
