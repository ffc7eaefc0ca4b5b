use super::*;
use crate::database::{RecordMetadata, StoreError};
use async_trait::async_trait;

struct Lines(Vec<StoredRecord>);

#[async_trait]
impl LineSource for Lines {
    async fn lines_between(
        &self,
        filename: &str,
        first_line: i64,
        last_line: i64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self
            .0
            .iter()
            .filter(|r| r.metadata.source_filename() == Some(filename))
            .filter(|r| {
                r.metadata
                    .source_line()
                    .is_some_and(|n| (first_line..=last_line).contains(&n))
            })
            .cloned()
            .collect())
    }
}

struct Broken;

#[async_trait]
impl LineSource for Broken {
    async fn lines_between(&self, _: &str, _: i64, _: i64) -> Result<Vec<StoredRecord>, StoreError> {
        Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut))
    }
}

fn line(filename: &str, n: i64, content: &str) -> StoredRecord {
    StoredRecord {
        id: n,
        content: content.to_string(),
        metadata: RecordMetadata::for_line(filename, n),
    }
}

fn doc() -> Lines {
    Lines((1..=10).map(|n| line("doc.txt", n, &format!("L{n}"))).collect())
}

#[test]
fn window_bounds() {
    let assembler = ContextWindowAssembler::new(2, 2000);
    assert_eq!(assembler.window_for(5), (3, 7));
    assert_eq!(assembler.window_for(1), (1, 3));
    assert_eq!(assembler.window_for(2), (1, 4));
    assert_eq!(ContextWindowAssembler::new(0, 10).window_for(4), (4, 4));
}

#[tokio::test]
async fn expands_match_to_neighbors_in_order() {
    let assembler = ContextWindowAssembler::new(2, 2000);
    let matched = line("doc.txt", 5, "L5");

    let text = assembler.expand(&doc(), &matched).await;
    assert_eq!(text, "L3 L4 L5 L6 L7");
}

#[tokio::test]
async fn window_is_clipped_at_document_edges() {
    let assembler = ContextWindowAssembler::new(3, 2000);
    assert_eq!(assembler.expand(&doc(), &line("doc.txt", 1, "L1")).await, "L1 L2 L3 L4");
    assert_eq!(assembler.expand(&doc(), &line("doc.txt", 10, "L10")).await, "L7 L8 L9 L10");
}

#[tokio::test]
async fn falls_back_to_matched_content() {
    let assembler = ContextWindowAssembler::new(2, 2000);

    let no_metadata = StoredRecord {
        id: 1,
        content: "orphan line".to_string(),
        metadata: RecordMetadata::default(),
    };
    assert_eq!(assembler.expand(&doc(), &no_metadata).await, "orphan line");

    let other_file = line("other.txt", 5, "elsewhere");
    assert_eq!(assembler.expand(&doc(), &other_file).await, "elsewhere");

    let matched = line("doc.txt", 5, "L5");
    assert_eq!(assembler.expand(&Broken, &matched).await, "L5");
}

#[test]
fn long_windows_are_truncated() {
    let assembler = ContextWindowAssembler::new(1, 10);
    let lines = vec![
        line("doc.txt", 1, "abcdef"),
        line("doc.txt", 2, "ghijkl"),
    ];
    assert_eq!(assembler.join_window(&lines), "abcdef ghi...");

    let exact = vec![line("doc.txt", 1, "0123456789")];
    assert_eq!(assembler.join_window(&exact), "0123456789");

    let multibyte = ContextWindowAssembler::new(1, 3);
    assert_eq!(multibyte.join_window(&[line("d", 1, "ééééé")]), "ééé...");
}
