
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::database::models::StoreName;

/// Overrides the configuration directory (defaults to `~/.rag-store`)
pub const CONFIG_DIR_ENV: &str = "RAG_STORE_CONFIG_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Pool profile for stores serving ingestion and search
    pub vector_pool: PoolConfig,
    /// Pool profile for stores listed in `stores.auxiliary`
    pub auxiliary_pool: PoolConfig,
    pub acquire_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/rag".to_string(),
            vector_pool: PoolConfig {
                min_connections: 2,
                max_connections: 10,
            },
            auxiliary_pool: PoolConfig {
                min_connections: 1,
                max_connections: 5,
            },
            acquire_timeout_secs: 30,
            command_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub embedding_dimension: u32,
    pub hnsw_m: u32,
    pub hnsw_ef_construction: u32,
    pub hnsw_ef_search: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: 1024,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestionConfig {
    /// Records per `insert_batch` call
    pub batch_size: usize,
    /// Texts per embedder call
    pub embedding_batch_size: usize,
    /// Lines must be strictly longer than this (in chars) to be embedded
    pub min_line_length: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            embedding_batch_size: 32,
            min_line_length: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub context_window_radius: u32,
    pub max_context_length: usize,
    pub min_similarity: f64,
    pub min_content_length: usize,
    /// Weight of vector similarity in the blended score; relevance gets the rest
    pub similarity_weight: f64,
    pub count_threshold: f64,
    pub default_top_k: u32,
    pub max_top_k: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_window_radius: 3,
            max_context_length: 2000,
            min_similarity: 0.3,
            min_content_length: 20,
            similarity_weight: 0.7,
            count_threshold: 0.3,
            default_top_k: 25,
            max_top_k: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    pub domain_keywords: Vec<String>,
    pub obligation_keywords: Vec<String>,
    pub domain_keyword_bonus: f64,
    pub obligation_keyword_bonus: f64,
    pub query_term_weight: f64,
    pub preferred_document_type: Option<String>,
    pub preferred_document_bonus: f64,
    pub deep_line_threshold: i64,
    pub deep_line_penalty: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(ToString::to_string).collect();
        Self {
            domain_keywords: words(&[
                "section",
                "subsection",
                "act",
                "rule",
                "regulation",
                "authority",
                "provision",
                "statute",
            ]),
            obligation_keywords: words(&[
                "shall",
                "must",
                "required",
                "mandatory",
                "prohibited",
                "entitled",
            ]),
            domain_keyword_bonus: 0.1,
            obligation_keyword_bonus: 0.05,
            query_term_weight: 0.3,
            preferred_document_type: Some("pdf".to_string()),
            preferred_document_bonus: 0.1,
            deep_line_threshold: 100,
            deep_line_penalty: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoresConfig {
    pub names: Vec<String>,
    pub default: String,
    /// Stores that get the smaller auxiliary pool profile
    pub auxiliary: Vec<String>,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            names: vec!["documents".to_string()],
            default: "documents".to_string(),
            auxiliary: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "bge-large:latest".to_string(),
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid database URL: {0} (must be a postgres:// or postgresql:// URL)")]
    InvalidDatabaseUrl(String),
    #[error("Invalid pool size: min {0}, max {1} (max must be >= 1 and >= min)")]
    InvalidPoolSize(u32, u32),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 16000)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid HNSW m: {0} (must be between 2 and 100)")]
    InvalidHnswM(u32),
    #[error("Invalid HNSW ef_construction: {0} (must be between 2*m and 1000)")]
    InvalidEfConstruction(u32),
    #[error("Invalid HNSW ef_search: {0} (must be between 1 and 1000)")]
    InvalidEfSearch(u32),
    #[error("Invalid retry policy: {0}")]
    InvalidRetry(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid weight for {0}: {1} (must be between 0 and 1)")]
    InvalidWeight(&'static str, f64),
    #[error("Invalid similarity threshold for {0}: {1} (must be between -1 and 1)")]
    InvalidThreshold(&'static str, f64),
    #[error("Invalid top_k limits: default {0}, max {1}")]
    InvalidTopK(u32, u32),
    #[error("Invalid max context length: {0} (must be at least 1)")]
    InvalidContextLength(usize),
    #[error("Invalid store name: {0} (lowercase letters, digits and '_', starting with a letter)")]
    InvalidStoreName(String),
    #[error("Default store '{0}' is not listed in stores.names")]
    UnknownDefaultStore(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid value for environment variable {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Get the configuration directory, honoring `RAG_STORE_CONFIG_DIR`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        dirs::home_dir()
            .map(|home| home.join(".rag-store"))
            .or_else(|| dirs::data_dir().map(|data| data.join("rag-store")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default config directory with process environment overrides
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir().context("Failed to locate configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        Self::load_with_env(config_dir, |key| std::env::var(key).ok())
    }

    /// Load `config.toml` (defaults when absent), apply overrides from `lookup`, validate
    #[inline]
    pub fn load_with_env<P, F>(config_dir: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<Config>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .apply_env_overrides(lookup)
            .context("Failed to apply environment overrides")?;
        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();
        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("RAG_STORE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = url;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_EMBEDDING_DIMENSION")? {
            self.index.embedding_dimension = v;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_HNSW_M")? {
            self.index.hnsw_m = v;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_HNSW_EF_CONSTRUCTION")? {
            self.index.hnsw_ef_construction = v;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_HNSW_EF_SEARCH")? {
            self.index.hnsw_ef_search = v;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_BATCH_SIZE")? {
            self.ingestion.batch_size = v;
        }
        if let Some(v) = parse_env(&lookup, "RAG_STORE_CONTEXT_WINDOW")? {
            self.retrieval.context_window_radius = v;
        }
        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.index.validate()?;
        self.retry.validate()?;
        self.ingestion.validate()?;
        self.retrieval.validate()?;
        self.stores.validate()?;
        self.embedding.validate()?;
        Ok(())
    }

    /// Pool profile for the given store
    #[inline]
    pub fn pool_for(&self, store: &StoreName) -> PoolConfig {
        if self.stores.auxiliary.iter().any(|name| name == store.as_str()) {
            self.database.auxiliary_pool
        } else {
            self.database.vector_pool
        }
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvValue {
                key: key.to_string(),
                value,
            }),
    }
}

impl DatabaseConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url =
            Url::parse(&self.url).map_err(|_| ConfigError::InvalidDatabaseUrl(self.redacted_url()))?;
        if url.scheme() != "postgres" && url.scheme() != "postgresql" {
            return Err(ConfigError::InvalidDatabaseUrl(self.redacted_url()));
        }
        self.vector_pool.validate()?;
        self.auxiliary_pool.validate()?;
        Ok(())
    }

    #[inline]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Database URL with any password masked, for display and logs
    #[inline]
    pub fn redacted_url(&self) -> String {
        match Url::parse(&self.url) {
            Ok(mut url) if url.password().is_some() => {
                // set_password only fails for cannot-be-a-base URLs, which have no password
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            Ok(url) => url.to_string(),
            Err(_) => "<unparseable>".to_string(),
        }
    }
}

impl PoolConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 || self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidPoolSize(
                self.min_connections,
                self.max_connections,
            ));
        }
        Ok(())
    }
}

impl IndexConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=16000).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }
        if !(2..=100).contains(&self.hnsw_m) {
            return Err(ConfigError::InvalidHnswM(self.hnsw_m));
        }
        if self.hnsw_ef_construction < 2 * self.hnsw_m || self.hnsw_ef_construction > 1000 {
            return Err(ConfigError::InvalidEfConstruction(
                self.hnsw_ef_construction,
            ));
        }
        if !(1..=1000).contains(&self.hnsw_ef_search) {
            return Err(ConfigError::InvalidEfSearch(self.hnsw_ef_search));
        }
        Ok(())
    }
}

impl RetryConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

impl IngestionConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for size in [self.batch_size, self.embedding_batch_size] {
            if !(1..=1000).contains(&size) {
                return Err(ConfigError::InvalidBatchSize(size));
            }
        }
        Ok(())
    }
}

impl RetrievalConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_weight) {
            return Err(ConfigError::InvalidWeight(
                "similarity_weight",
                self.similarity_weight,
            ));
        }
        for (name, value) in [
            ("min_similarity", self.min_similarity),
            ("count_threshold", self.count_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidThreshold(name, value));
            }
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(ConfigError::InvalidTopK(self.default_top_k, self.max_top_k));
        }
        if self.max_context_length == 0 {
            return Err(ConfigError::InvalidContextLength(self.max_context_length));
        }
        Ok(())
    }
}

impl StoresConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.names.iter().chain(self.auxiliary.iter()) {
            if !StoreName::is_valid(name) {
                return Err(ConfigError::InvalidStoreName(name.clone()));
            }
        }
        if !self.names.contains(&self.default) {
            return Err(ConfigError::UnknownDefaultStore(self.default.clone()));
        }
        Ok(())
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }
        self.base_url()?;
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }
        Ok(())
    }

    #[inline]
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
