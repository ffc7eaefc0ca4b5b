use criterion::{Criterion, criterion_group, criterion_main};
use rag_store::config::{RankingConfig, RetrievalConfig};
use rag_store::database::RecordMetadata;
use rag_store::retrieval::{RetrievedPassage, ResultRanker};
use std::hint::black_box;

fn candidates(n: i64) -> Vec<RetrievedPassage> {
    (1..=n)
        .map(|id| {
            let content = if id % 3 == 0 {
                format!("Section {id} of the Act: the authority shall grant approval where required")
            } else {
                format!("Line {id} describes general background for the surrounding provisions")
            };
            RetrievedPassage {
                id,
                original_content: content.clone(),
                content,
                similarity: 1.0 - id as f64 / (n as f64 * 2.0),
                relevance: 0.0,
                score: 0.0,
                metadata: RecordMetadata::for_line("bench.txt", id).with_document_type("text"),
            }
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let ranker = ResultRanker::new(RankingConfig::default(), &RetrievalConfig::default());
    let passages = candidates(100);
    c.bench_function("rank_100", |b| {
        b.iter(|| ranker.rank(black_box(passages.clone()), black_box("approval requirement")))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
