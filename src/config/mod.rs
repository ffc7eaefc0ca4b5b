// Configuration management module
// TOML file in the config directory, environment overrides on top

pub mod settings;

pub use settings::{
    Config, ConfigError, DatabaseConfig, EmbeddingConfig, IndexConfig, IngestionConfig,
    PoolConfig, RankingConfig, RetrievalConfig, RetryConfig, StoresConfig,
};
