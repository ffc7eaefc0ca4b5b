use super::*;
use crate::database::ScoredRecord;
use crate::embeddings::normalized;
use std::sync::atomic::{AtomicBool, Ordering};

/// Brute-force inner-product search over an in-memory table
struct MemoryBackend {
    rows: Vec<(StoredRecord, Vec<f32>)>,
    count_fails: AtomicBool,
}

impl MemoryBackend {
    fn new(rows: Vec<(StoredRecord, Vec<f32>)>) -> Self {
        Self {
            rows,
            count_fails: AtomicBool::new(false),
        }
    }

    fn ordered(&self, query: &[f32]) -> Vec<ScoredRecord> {
        let query = normalized(query);
        let mut scored: Vec<ScoredRecord> = self
            .rows
            .iter()
            .map(|(record, vector)| ScoredRecord {
                record: record.clone(),
                similarity: vector
                    .iter()
                    .zip(&query)
                    .map(|(a, b)| f64::from(*a) * f64::from(*b))
                    .sum(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.record.id.cmp(&b.record.id))
        });
        scored
    }
}

#[async_trait]
impl LineSource for MemoryBackend {
    async fn lines_between(
        &self,
        filename: &str,
        first_line: i64,
        last_line: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut lines: Vec<StoredRecord> = self
            .rows
            .iter()
            .map(|(record, _)| record)
            .filter(|r| r.metadata.source_filename() == Some(filename))
            .filter(|r| {
                r.metadata
                    .source_line()
                    .is_some_and(|n| (first_line..=last_line).contains(&n))
            })
            .cloned()
            .collect();
        lines.sort_by_key(|r| (r.metadata.source_line(), r.id));
        Ok(lines)
    }
}

#[async_trait]
impl SearchBackend for MemoryBackend {
    async fn search(&self, query_vector: &[f32], top_k: u32, offset: u32) -> SearchOutcome {
        let hits: Vec<ScoredRecord> = self
            .ordered(query_vector)
            .into_iter()
            .skip(offset as usize)
            .take(top_k as usize)
            .collect();
        if hits.is_empty() {
            SearchOutcome::Empty
        } else {
            SearchOutcome::Hits(hits)
        }
    }

    async fn count_above(&self, query_vector: &[f32], threshold: f64) -> Result<i64, StoreError> {
        if self.count_fails.load(Ordering::SeqCst) {
            return Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .ordered(query_vector)
            .iter()
            .filter(|hit| hit.similarity > threshold)
            .count() as i64)
    }
}

struct DownBackend;

#[async_trait]
impl LineSource for DownBackend {
    async fn lines_between(&self, _: &str, _: i64, _: i64) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl SearchBackend for DownBackend {
    async fn search(&self, _: &[f32], _: u32, _: u32) -> SearchOutcome {
        SearchOutcome::Unavailable {
            reason: "relation \"hnsw_idx_documents\" does not exist".to_string(),
        }
    }

    async fn count_above(&self, _: &[f32], _: f64) -> Result<i64, StoreError> {
        Ok(0)
    }
}

/// Ten lines of "a.txt"; line 5 points straight at the query direction
fn document() -> MemoryBackend {
    let rows = (1..=10)
        .map(|n: i64| {
            let content = if n == 5 {
                "Section 5 requires approval from the authority".to_string()
            } else {
                format!("Line {n} of the general background narrative")
            };
            let angle = (n - 5).abs() as f32 * 0.15;
            let vector = vec![angle.cos(), angle.sin()];
            let record = StoredRecord {
                id: n,
                content,
                metadata: RecordMetadata::for_line("a.txt", n).with_document_type("text"),
            };
            (record, vector)
        })
        .collect();
    MemoryBackend::new(rows)
}

fn retriever(radius: u32) -> Retriever {
    let mut config = Config::default();
    config.retrieval.context_window_radius = radius;
    config.retrieval.min_similarity = 0.0;
    Retriever::new(&config)
}

#[tokio::test]
async fn best_match_comes_first_with_context() {
    let backend = document();
    let response = retriever(2)
        .search(&backend, &[1.0, 0.0], "approval requirement", Some(10), 0)
        .await;

    assert_eq!(response.status, SearchStatus::Ok);
    assert_eq!(response.results.len(), 10);

    let top = &response.results[0];
    assert_eq!(top.id, 5);
    assert_eq!(top.original_content, "Section 5 requires approval from the authority");
    assert!(top.content.starts_with("Line 3 of"));
    assert!(top.content.contains("Section 5 requires approval"));
    assert!(top.content.ends_with("Line 7 of the general background narrative"));
    assert!(response.results.iter().all(|p| p.similarity <= top.similarity));
}

#[tokio::test]
async fn results_are_ordered_by_blended_score() {
    let backend = document();
    let response = retriever(1)
        .search(&backend, &[1.0, 0.0], "background", Some(10), 0)
        .await;

    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(
        response
            .results
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.relevance) && (0.0..=1.0).contains(&p.score))
    );
}

#[tokio::test]
async fn pages_do_not_overlap() {
    let backend = document();
    let query = [1.0, 0.0];

    let first = backend.search(&query, 5, 0).await.into_hits();
    let second = backend.search(&query, 5, 5).await.into_hits();
    let all = backend.search(&query, 10, 0).await.into_hits();

    let ids = |hits: &[ScoredRecord]| hits.iter().map(|h| h.record.id).collect::<Vec<_>>();
    let mut paged = ids(&first);
    paged.extend(ids(&second));
    assert_eq!(paged, ids(&all));

    for pair in all.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[tokio::test]
async fn quality_filter_runs_before_expansion() {
    let backend = document();
    let mut config = Config::default();
    config.retrieval.min_similarity = 0.99;
    let response = Retriever::new(&config)
        .search(&backend, &[1.0, 0.0], "approval", Some(10), 0)
        .await;

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, 5);
}

#[tokio::test]
async fn unavailable_search_is_distinct_from_no_matches() {
    let response = retriever(2)
        .search(&DownBackend, &[1.0, 0.0], "anything", None, 0)
        .await;
    assert!(response.results.is_empty());
    assert!(response.is_unavailable());

    let empty = MemoryBackend::new(Vec::new());
    let response = retriever(2)
        .search(&empty, &[1.0, 0.0], "anything", None, 0)
        .await;
    assert!(response.results.is_empty());
    assert_eq!(response.status, SearchStatus::Ok);
    assert_eq!(response.total_matches, 0);
}

#[tokio::test]
async fn count_failure_does_not_fail_search() {
    let backend = document();
    backend.count_fails.store(true, Ordering::SeqCst);

    let response = retriever(0)
        .search(&backend, &[1.0, 0.0], "approval", Some(3), 0)
        .await;
    assert_eq!(response.status, SearchStatus::Ok);
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.total_matches, 0);
}

#[test]
fn top_k_defaults_and_clamps() {
    let retriever = Retriever::new(&Config::default());
    assert_eq!(retriever.effective_top_k(None), 25);
    assert_eq!(retriever.effective_top_k(Some(5)), 5);
    assert_eq!(retriever.effective_top_k(Some(10_000)), 100);
}

struct AxisEmbedder;

impl Embedder for AxisEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![2.0, 0.0]).collect())
    }
}

#[tokio::test]
async fn search_text_embeds_the_query() {
    let backend = document();
    let response = retriever(0)
        .search_text(&backend, Arc::new(AxisEmbedder), "approval", Some(1), 0)
        .await
        .expect("embedding should succeed");

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, 5);
    assert_eq!(response.total_matches, 10);
}
