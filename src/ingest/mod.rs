//! Document ingestion.
//!
//! Each document is read, split into numbered lines, embedded off the async
//! scheduler and inserted into the store its filename routes to. Documents
//! already present in their store are skipped as a whole. Documents are
//! independent: a failure is recorded in that document's [`IngestReport`] and
//! the remaining documents still run.


use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::database::{EmbeddingRecord, RecordMetadata, StoreManager, VectorStore};
use crate::embeddings::{Embedder, embed_blocking};

pub const LINE_KIND: &str = "document_line";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLine {
    /// 1-based position in the source text
    pub number: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Completed,
    /// Already present in its store
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: Uuid,
    pub filename: String,
    pub store: String,
    #[serde(flatten)]
    pub status: IngestStatus,
    pub lines_total: usize,
    pub lines_embedded: usize,
    pub rows_inserted: u64,
    pub finished_at: DateTime<Utc>,
}

impl IngestReport {
    fn new(filename: String, store: String) -> Self {
        Self {
            document_id: Uuid::new_v4(),
            filename,
            store,
            status: IngestStatus::Completed,
            lines_total: 0,
            lines_embedded: 0,
            rows_inserted: 0,
            finished_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, IngestStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestCounts {
    pub lines_total: usize,
    pub lines_embedded: usize,
    pub rows_inserted: u64,
}

/// Trimmed lines strictly longer than `min_length` chars, numbered from 1
#[inline]
pub fn extract_lines(text: &str, min_length: usize) -> Vec<DocumentLine> {
    text.lines()
        .zip(1..)
        .filter_map(|(line, number)| {
            let line = line.trim();
            (line.chars().count() > min_length).then(|| DocumentLine {
                number,
                content: line.to_string(),
            })
        })
        .collect()
}

/// `document_type` recorded for a source file, or `None` if it cannot be read as text
#[inline]
pub fn document_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "txt" | "md" => Some("text"),
        _ => None,
    }
}

pub struct Ingestor {
    manager: Arc<StoreManager>,
    embedder: Arc<dyn Embedder>,
    config: IngestionConfig,
}

impl Ingestor {
    #[inline]
    pub fn new(
        manager: Arc<StoreManager>,
        embedder: Arc<dyn Embedder>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            manager,
            embedder,
            config,
        }
    }

    #[inline]
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Vec<IngestReport> {
        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            reports.push(self.ingest_path(path).await);
        }

        let failed = reports.iter().filter(|r| r.is_failed()).count();
        info!(
            "Ingested {} documents ({} failed)",
            reports.len(),
            failed
        );
        reports
    }

    #[inline]
    pub async fn ingest_path(&self, path: &Path) -> IngestReport {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let store = self.manager.route_and_get("", Some(&filename));
        let mut report = IngestReport::new(filename, store.name().to_string());

        match self.ingest_file(&store, path, &report.filename).await {
            Ok(None) => {
                info!("Skipped {}: already present in {}", report.filename, report.store);
                report.status = IngestStatus::Skipped;
            }
            Ok(Some(counts)) => {
                info!(
                    "Ingested {}: {} of {} lines embedded, {} rows inserted into {}",
                    report.filename,
                    counts.lines_embedded,
                    counts.lines_total,
                    counts.rows_inserted,
                    report.store
                );
                report.lines_total = counts.lines_total;
                report.lines_embedded = counts.lines_embedded;
                report.rows_inserted = counts.rows_inserted;
            }
            Err(e) => {
                warn!("Failed to ingest {}: {:#}", path.display(), e);
                report.status = IngestStatus::Failed {
                    error: format!("{e:#}"),
                };
            }
        }

        report.finished_at = Utc::now();
        report
    }

    /// `Ok(None)` when the document is already stored
    async fn ingest_file(
        &self,
        store: &VectorStore,
        path: &Path,
        filename: &str,
    ) -> Result<Option<IngestCounts>> {
        let document_type = document_type_for(path)
            .with_context(|| format!("Unsupported file type: {}", path.display()))?;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if store
            .exists(filename)
            .await
            .with_context(|| format!("Failed to check whether {filename} is stored"))?
        {
            return Ok(None);
        }

        self.ingest_text(store, filename, &text, document_type)
            .await
            .map(Some)
    }

    /// Embed every qualifying line of `text`, then insert the records under
    /// `filename` in `batch_size` batches.
    ///
    /// Nothing is written until all lines are embedded. If a later batch fails
    /// to insert, the rows already committed for `filename` are deleted again
    /// so that `exists` never reports a partly stored document.
    #[inline]
    pub async fn ingest_text(
        &self,
        store: &VectorStore,
        filename: &str,
        text: &str,
        document_type: &str,
    ) -> Result<IngestCounts> {
        let lines = extract_lines(text, self.config.min_line_length);
        let lines_total = text.lines().count();
        debug!(
            "{}: {} of {} lines qualify for embedding",
            filename,
            lines.len(),
            lines_total
        );

        let records = self.embed_lines(&lines, filename, document_type).await?;
        let rows_inserted = match self.insert_records(store, &records, filename).await {
            Ok(inserted) => inserted,
            Err(e) => {
                self.discard_partial(store, filename).await;
                return Err(e);
            }
        };

        Ok(IngestCounts {
            lines_total,
            lines_embedded: records.len(),
            rows_inserted,
        })
    }

    async fn embed_lines(
        &self,
        lines: &[DocumentLine],
        filename: &str,
        document_type: &str,
    ) -> Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::with_capacity(lines.len());
        for chunk in lines.chunks(self.config.embedding_batch_size.max(1)) {
            let texts: Vec<String> = chunk.iter().map(|line| line.content.clone()).collect();
            let vectors = embed_blocking(Arc::clone(&self.embedder), texts)
                .await
                .with_context(|| {
                    format!(
                        "Failed to embed lines {}-{} of {filename}",
                        chunk.first().map_or(0, |l| l.number),
                        chunk.last().map_or(0, |l| l.number)
                    )
                })?;

            records.extend(chunk.iter().zip(vectors).map(|(line, vector)| {
                let metadata = RecordMetadata::for_line(filename, line.number)
                    .with_kind(LINE_KIND)
                    .with_document_type(document_type);
                EmbeddingRecord::new(line.content.clone(), vector, metadata)
            }));
        }
        Ok(records)
    }

    async fn insert_records(
        &self,
        store: &VectorStore,
        records: &[EmbeddingRecord],
        filename: &str,
    ) -> Result<u64> {
        let mut inserted = 0;
        for batch in records.chunks(self.config.batch_size.max(1)) {
            let outcome = store.insert_batch(batch).await.with_context(|| {
                format!(
                    "Failed to store a batch of {} lines from {filename}",
                    batch.len()
                )
            })?;
            debug!(
                "Stored batch for {}: {} inserted, {} duplicates skipped",
                filename,
                outcome.inserted,
                outcome.skipped()
            );
            inserted += outcome.inserted;
        }
        Ok(inserted)
    }

    async fn discard_partial(&self, store: &VectorStore, filename: &str) {
        match store.delete_document(filename).await {
            Ok(0) => {}
            Ok(removed) => info!(
                "Removed {} rows of partially stored {} from {}",
                removed,
                filename,
                store.name()
            ),
            Err(e) => warn!(
                "Failed to remove partially stored {} from {}: {}",
                filename,
                store.name(),
                e
            ),
        }
    }
}
