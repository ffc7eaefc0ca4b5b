#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::Embedder;
use crate::config::Config;

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Embedder backed by an Ollama server's `/api/embed` endpoint
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: Url,
    model: String,
    dimension: usize,
    batch_size: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaEmbedder {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .embedding
            .base_url()
            .context("Failed to generate Ollama URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.embedding.timeout()))
            .build()
            .into();

        Ok(Self {
            base_url,
            model: config.embedding.model.clone(),
            dimension: config.index.embedding_dimension as usize,
            batch_size: config.ingestion.embedding_batch_size.max(1),
            agent,
            retry_attempts: config.embedding.retry_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base wait between attempts; doubles after each failure
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Server reachable and configured model pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        if !models.iter().any(|m| m.name == self.model) {
            let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            warn!(
                "Model {} not found. Available models: {:?}",
                self.model, available
            );
            anyhow::bail!(
                "Model '{}' is not available. Available models: {:?}",
                self.model,
                available
            );
        }

        info!(
            "Health check passed for Ollama server at {} with model {}",
            self.base_url, self.model
        );
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("/api/tags")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models_response: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models_response.models.len());
        Ok(models_response.models)
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/api/embed")
            .context("Failed to build embedding URL")?;

        let request_json = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .make_request_with_retry(|| {
                self.agent
                    .post(url.as_str())
                    .header("Content-Type", "application/json")
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.embeddings.len()
            );
        }
        if let Some(bad) = response
            .embeddings
            .iter()
            .find(|embedding| embedding.len() != self.dimension)
        {
            anyhow::bail!(
                "Model {} returned {}-dimensional embeddings, expected {}",
                self.model,
                bad.len(),
                self.dimension
            );
        }

        Ok(response.embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                            true
                        }
                        ureq::Error::StatusCode(status) => {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self
                            .retry_delay
                            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt - 1));
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

impl Embedder for OllamaEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self
                .embed_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            vectors.extend(batch);
        }

        debug!("Generated {} embeddings total", vectors.len());
        Ok(vectors)
    }
}
