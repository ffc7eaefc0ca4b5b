// Retrieval module
// Query pipeline: vector search, quality filter, context expansion and re-ranking

pub mod context;
pub mod ranking;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::database::{RecordMetadata, SearchOutcome, StoreError, StoredRecord};
use crate::embeddings::{Embedder, embed_blocking};
use crate::RagError;

pub use context::ContextWindowAssembler;
pub use ranking::{ResultRanker, query_terms};

/// Neighboring lines of a source document, by line number
#[async_trait]
pub trait LineSource: Send + Sync {
    /// Records of `filename` with line numbers in `[first_line, last_line]`, ascending
    async fn lines_between(
        &self,
        filename: &str,
        first_line: i64,
        last_line: i64,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

/// A searchable collection of embedded lines
#[async_trait]
pub trait SearchBackend: LineSource {
    async fn search(&self, query_vector: &[f32], top_k: u32, offset: u32) -> SearchOutcome;

    async fn count_above(&self, query_vector: &[f32], threshold: f64) -> Result<i64, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SearchStatus {
    Ok,
    /// The search could not run; the empty result set is not a "no matches" answer
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub id: i64,
    /// Matched line expanded with its neighbors
    pub content: String,
    pub original_content: String,
    pub similarity: f64,
    pub relevance: f64,
    pub score: f64,
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub results: Vec<RetrievedPassage>,
    pub total_matches: i64,
    pub status: SearchStatus,
}

impl QueryResponse {
    fn unavailable(reason: String) -> Self {
        Self {
            results: Vec::new(),
            total_matches: 0,
            status: SearchStatus::Unavailable(reason),
        }
    }

    #[inline]
    pub fn is_unavailable(&self) -> bool {
        matches!(self.status, SearchStatus::Unavailable(_))
    }
}

pub struct Retriever {
    ranker: ResultRanker,
    assembler: ContextWindowAssembler,
    count_threshold: f64,
    default_top_k: u32,
    max_top_k: u32,
}

impl Retriever {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            ranker: ResultRanker::new(config.ranking.clone(), &config.retrieval),
            assembler: ContextWindowAssembler::from_config(&config.retrieval),
            count_threshold: config.retrieval.count_threshold,
            default_top_k: config.retrieval.default_top_k,
            max_top_k: config.retrieval.max_top_k,
        }
    }

    #[inline]
    pub fn ranker(&self) -> &ResultRanker {
        &self.ranker
    }

    #[inline]
    pub fn assembler(&self) -> &ContextWindowAssembler {
        &self.assembler
    }

    #[inline]
    pub fn effective_top_k(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_top_k).min(self.max_top_k)
    }

    /// Search, filter, expand and rank; failures surface as `SearchStatus::Unavailable`
    #[inline]
    pub async fn search<B>(
        &self,
        backend: &B,
        query_vector: &[f32],
        query_text: &str,
        top_k: Option<u32>,
        offset: u32,
    ) -> QueryResponse
    where
        B: SearchBackend + ?Sized,
    {
        let top_k = self.effective_top_k(top_k);
        let hits = match backend.search(query_vector, top_k, offset).await {
            SearchOutcome::Hits(hits) => hits,
            SearchOutcome::Empty => Vec::new(),
            SearchOutcome::Unavailable { reason } => {
                warn!("Search unavailable, returning no results: {}", reason);
                return QueryResponse::unavailable(reason);
            }
        };

        let found = hits.len();
        let hits = self.ranker.filter_by_quality(hits);
        debug!("{} of {} hits passed the quality filter", hits.len(), found);

        let passages = join_all(hits.into_iter().map(|hit| async move {
            let content = self.assembler.expand(backend, &hit.record).await;
            RetrievedPassage {
                id: hit.record.id,
                content,
                original_content: hit.record.content,
                similarity: hit.similarity,
                relevance: 0.0,
                score: 0.0,
                metadata: hit.record.metadata,
            }
        }))
        .await;

        let results = self.ranker.rank(passages, query_text);

        let total_matches = match backend.count_above(query_vector, self.count_threshold).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Failed to count matching records: {}", e);
                0
            }
        };

        QueryResponse {
            results,
            total_matches,
            status: SearchStatus::Ok,
        }
    }

    /// Embed `query_text` off the async scheduler, then [`search`](Self::search)
    #[inline]
    pub async fn search_text<B>(
        &self,
        backend: &B,
        embedder: Arc<dyn Embedder>,
        query_text: &str,
        top_k: Option<u32>,
        offset: u32,
    ) -> Result<QueryResponse, RagError>
    where
        B: SearchBackend + ?Sized,
    {
        let mut vectors = embed_blocking(embedder, vec![query_text.to_string()]).await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("embedder returned no vector".to_string()))?;
        Ok(self
            .search(backend, &query_vector, query_text, top_k, offset)
            .await)
    }
}
