use super::*;

struct FixedEmbedder {
    dimension: usize,
    output: Vec<Vec<f32>>,
}

impl Embedder for FixedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(self.output.clone())
    }
}

struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    fn embed_batch(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Err(anyhow::anyhow!("model not loaded"))
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("line {i}")).collect()
}

#[test]
fn normalize_produces_unit_vectors() {
    let v = normalized(&[3.0, 4.0]);
    assert_eq!(v, vec![0.6, 0.8]);

    let mut zero = vec![0.0, 0.0, 0.0];
    normalize(&mut zero);
    assert_eq!(zero, vec![0.0, 0.0, 0.0]);

    let long = normalized(&[1.0, 2.0, 3.0, 4.0]);
    let norm: f32 = long.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn embed_blocking_normalizes_output() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder {
        dimension: 2,
        output: vec![vec![3.0, 4.0], vec![0.0, 2.0]],
    });

    let vectors = embed_blocking(embedder, texts(2))
        .await
        .expect("embedding should succeed");
    assert_eq!(vectors, vec![vec![0.6, 0.8], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn embed_blocking_rejects_count_mismatch() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder {
        dimension: 2,
        output: vec![vec![1.0, 0.0]],
    });

    let result = embed_blocking(embedder, texts(3)).await;
    assert!(matches!(result, Err(RagError::Embedding(msg)) if msg.contains("expected 3")));
}

#[tokio::test]
async fn embed_blocking_rejects_wrong_dimension() {
    let embedder: Arc<dyn Embedder> = Arc::new(FixedEmbedder {
        dimension: 4,
        output: vec![vec![1.0, 0.0]],
    });

    let result = embed_blocking(embedder, texts(1)).await;
    assert!(matches!(result, Err(RagError::Embedding(msg)) if msg.contains("4-dimensional")));
}

#[tokio::test]
async fn embed_blocking_surfaces_embedder_errors() {
    let result = embed_blocking(Arc::new(FailingEmbedder), texts(1)).await;
    assert!(matches!(result, Err(RagError::Embedding(msg)) if msg.contains("model not loaded")));

    let empty = embed_blocking(Arc::new(FailingEmbedder), Vec::new())
        .await
        .expect("empty input never reaches the embedder");
    assert!(empty.is_empty());
}
