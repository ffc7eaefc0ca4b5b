// Embeddings module
// Text-to-vector conversion: the Embedder seam, the Ollama client and vector normalization

#[cfg(test)]
mod tests;

pub mod ollama;

use std::sync::Arc;
use tracing::debug;

use crate::RagError;

pub use ollama::{ModelInfo, OllamaEmbedder};

/// Synchronous text embedder; async callers go through [`embed_blocking`]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// One vector per input text, in input order
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Scale `vector` to unit length in place; the zero vector is left unchanged
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 && norm.is_finite() {
        for x in vector.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}

#[inline]
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut out = vector.to_vec();
    normalize(&mut out);
    out
}

/// Embed `texts` on the blocking pool, checking count and dimension and
/// returning unit-length vectors
#[inline]
pub async fn embed_blocking(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, RagError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let expected = texts.len();
    let dimension = embedder.dimension();
    debug!("Embedding {} texts", expected);

    let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
        .await
        .map_err(|e| RagError::Embedding(format!("embedding task failed: {e}")))?
        .map_err(|e| RagError::Embedding(format!("{e:#}")))?;

    check_vectors(vectors, expected, dimension)
}

fn check_vectors(
    mut vectors: Vec<Vec<f32>>,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, RagError> {
    if vectors.len() != expected {
        return Err(RagError::Embedding(format!(
            "expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    for vector in &mut vectors {
        if vector.len() != dimension {
            return Err(RagError::Embedding(format!(
                "expected {dimension}-dimensional embeddings, got {}",
                vector.len()
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::Embedding(
                "embedding contains NaN or infinite values".to_string(),
            ));
        }
        normalize(vector);
    }
    Ok(vectors)
}
