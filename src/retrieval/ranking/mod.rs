
use std::collections::HashSet;

use super::RetrievedPassage;
use crate::config::{RankingConfig, RetrievalConfig};
use crate::database::{RecordMetadata, ScoredRecord};

/// Blends vector similarity with a keyword-based relevance score
#[derive(Debug, Clone)]
pub struct ResultRanker {
    config: RankingConfig,
    similarity_weight: f64,
    min_similarity: f64,
    min_content_length: usize,
}

impl ResultRanker {
    #[inline]
    pub fn new(ranking: RankingConfig, retrieval: &RetrievalConfig) -> Self {
        Self {
            config: ranking,
            similarity_weight: retrieval.similarity_weight.clamp(0.0, 1.0),
            min_similarity: retrieval.min_similarity,
            min_content_length: retrieval.min_content_length,
        }
    }

    /// Similarity at least the minimum and content strictly longer than the minimum (in chars)
    #[inline]
    pub fn passes_quality(&self, similarity: f64, content: &str) -> bool {
        similarity >= self.min_similarity && content.chars().count() > self.min_content_length
    }

    #[inline]
    pub fn filter_by_quality(&self, hits: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
        hits.into_iter()
            .filter(|hit| self.passes_quality(hit.similarity, &hit.record.content))
            .collect()
    }

    /// Heuristic relevance of `content` to the query, clamped to [0, 1]
    #[inline]
    pub fn relevance(
        &self,
        content: &str,
        metadata: &RecordMetadata,
        query_terms: &HashSet<String>,
    ) -> f64 {
        let content = content.to_lowercase();
        let cfg = &self.config;

        let domain = count_present(&content, &cfg.domain_keywords);
        let obligation = count_present(&content, &cfg.obligation_keywords);
        let mut score = domain as f64 * cfg.domain_keyword_bonus
            + obligation as f64 * cfg.obligation_keyword_bonus;

        if !query_terms.is_empty() {
            let matched = query_terms
                .iter()
                .filter(|term| content.contains(term.as_str()))
                .count();
            score += matched as f64 / query_terms.len() as f64 * cfg.query_term_weight;
        }

        if let (Some(preferred), Some(actual)) = (
            cfg.preferred_document_type.as_deref(),
            metadata.document_type.as_deref(),
        ) {
            if preferred == actual {
                score += cfg.preferred_document_bonus;
            }
        }

        if metadata
            .line_number
            .is_some_and(|line| line > cfg.deep_line_threshold)
        {
            score -= cfg.deep_line_penalty;
        }

        score.clamp(0.0, 1.0)
    }

    #[inline]
    pub fn blended(&self, similarity: f64, relevance: f64) -> f64 {
        self.similarity_weight * similarity + (1.0 - self.similarity_weight) * relevance
    }

    /// Score every passage and sort by blended score, descending; ties keep input order
    #[inline]
    pub fn rank(&self, mut passages: Vec<RetrievedPassage>, query: &str) -> Vec<RetrievedPassage> {
        if passages.is_empty() {
            return passages;
        }

        let terms = query_terms(query);
        for passage in &mut passages {
            passage.relevance = self.relevance(&passage.content, &passage.metadata, &terms);
            passage.score = self.blended(passage.similarity, passage.relevance);
        }

        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages
    }
}

/// Distinct lowercase whitespace-separated terms
#[inline]
pub fn query_terms(query: &str) -> HashSet<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect()
}

fn count_present(content: &str, keywords: &[String]) -> usize {
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && content.contains(&keyword.to_lowercase()))
        .count()
}
