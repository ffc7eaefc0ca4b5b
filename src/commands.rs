use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::StoreManager;
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::ingest::{IngestStatus, Ingestor};
use crate::retrieval::{QueryResponse, Retriever, SearchStatus};

/// Print the effective configuration with the database password masked
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Database:").bold().yellow());
    eprintln!("  URL: {}", style(config.database.redacted_url()).cyan());
    eprintln!(
        "  Vector pool: {}-{} connections",
        config.database.vector_pool.min_connections, config.database.vector_pool.max_connections
    );
    eprintln!(
        "  Statement timeout: {}s",
        style(config.database.command_timeout_secs).cyan()
    );

    eprintln!("{}", style("Index:").bold().yellow());
    eprintln!(
        "  Dimension: {}  M: {}  efConstruction: {}  efSearch: {}",
        style(config.index.embedding_dimension).cyan(),
        style(config.index.hnsw_m).cyan(),
        style(config.index.hnsw_ef_construction).cyan(),
        style(config.index.hnsw_ef_search).cyan()
    );

    eprintln!("{}", style("Stores:").bold().yellow());
    eprintln!("  Names: {}", style(config.stores.names.join(", ")).cyan());
    eprintln!("  Default: {}", style(&config.stores.default).cyan());

    eprintln!("{}", style("Embedding:").bold().yellow());
    match config.embedding.base_url() {
        Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
        Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
    }
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());

    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!(
        "  Context radius: {}  Max context: {} chars  Min similarity: {}",
        config.retrieval.context_window_radius,
        config.retrieval.max_context_length,
        config.retrieval.min_similarity
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    Ok(())
}

/// Write the effective configuration to `config.toml`
#[inline]
pub fn write_config(config: &Config) -> Result<()> {
    config.save().context("Failed to save configuration")?;
    eprintln!(
        "{} {}",
        style("Configuration written to").green(),
        config.config_file_path().display()
    );
    Ok(())
}

/// Create every configured store's schema and check the embedding server
#[inline]
pub async fn init_stores(config: &Config) -> Result<()> {
    let manager = StoreManager::connect(config).context("Failed to set up stores")?;
    let reports = manager.initialize_all().await;
    manager.close_all().await;

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(()) => eprintln!("  {} {}", style("✓").green(), report.name),
            Err(e) => {
                failed += 1;
                eprintln!("  {} {}: {}", style("✗").red(), report.name, e);
            }
        }
    }

    let embedder = OllamaEmbedder::new(config).context("Failed to create embedder")?;
    let health = tokio::task::spawn_blocking(move || embedder.health_check())
        .await
        .context("Health check task failed")?;
    match health {
        Ok(()) => eprintln!("  {} embedding model {}", style("✓").green(), config.embedding.model),
        Err(e) => {
            warn!("Embedding server health check failed: {:#}", e);
            eprintln!("  {} embedding server: {:#}", style("✗").red(), e);
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} stores failed to initialize", reports.len());
    }
    info!("Initialized {} stores", reports.len());
    Ok(())
}

#[inline]
pub async fn ingest_files(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let manager = Arc::new(StoreManager::connect(config).context("Failed to set up stores")?);
    let embedder: Arc<dyn Embedder> =
        Arc::new(OllamaEmbedder::new(config).context("Failed to create embedder")?);

    let ingestor = Ingestor::new(Arc::clone(&manager), embedder, config.ingestion);
    let reports = ingestor.ingest_paths(paths).await;
    manager.close_all().await;

    for report in &reports {
        match &report.status {
            IngestStatus::Completed => eprintln!(
                "{} {} → {}: {} lines embedded, {} new rows",
                style("✓").green(),
                report.filename,
                report.store,
                report.lines_embedded,
                report.rows_inserted
            ),
            IngestStatus::Skipped => eprintln!(
                "{} {}: already ingested, skipped",
                style("•").yellow(),
                report.filename
            ),
            IngestStatus::Failed { error } => {
                eprintln!("{} {}: {}", style("✗").red(), report.filename, error);
            }
        }
    }

    let failed = reports.iter().filter(|r| r.is_failed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} documents failed to ingest", reports.len());
    }
    Ok(())
}

#[inline]
pub async fn run_query(
    config: &Config,
    text: &str,
    top_k: Option<u32>,
    offset: u32,
    store: Option<&str>,
    json: bool,
) -> Result<()> {
    let manager = StoreManager::connect(config).context("Failed to set up stores")?;
    let store = match store {
        Some(name) => manager.get_store(name),
        None => manager.default_store(),
    };
    let embedder: Arc<dyn Embedder> =
        Arc::new(OllamaEmbedder::new(config).context("Failed to create embedder")?);

    let response = Retriever::new(config)
        .search_text(store.as_ref(), embedder, text, top_k, offset)
        .await
        .context("Failed to embed query");
    manager.close_all().await;
    let response = response?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).context("Failed to serialize results")?
        );
    } else {
        print_results(&response, offset);
    }
    Ok(())
}

fn print_results(response: &QueryResponse, offset: u32) {
    if let SearchStatus::Unavailable(reason) = &response.status {
        eprintln!("{} {}", style("Search unavailable:").red().bold(), reason);
        return;
    }
    if response.results.is_empty() {
        eprintln!("{}", style("No matching passages.").yellow());
        return;
    }

    eprintln!(
        "{}",
        style(format!(
            "{} results ({} matches above threshold)",
            response.results.len(),
            response.total_matches
        ))
        .bold()
    );
    for (rank, passage) in response.results.iter().enumerate() {
        let source = match (passage.metadata.source_filename(), passage.metadata.source_line()) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            (Some(file), None) => file.to_string(),
            _ => "unknown source".to_string(),
        };
        println!();
        println!(
            "{} {} {}",
            style(format!("#{}", offset as usize + rank + 1)).bold().cyan(),
            style(source).dim(),
            style(format!(
                "score {:.3} (similarity {:.3}, relevance {:.3})",
                passage.score, passage.similarity, passage.relevance
            ))
            .dim()
        );
        println!("{}", passage.content);
    }
}

#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let manager = StoreManager::connect(config).context("Failed to set up stores")?;
    let stats = manager.stats_all().await;
    manager.close_all().await;

    println!("{}", style("📊 Store Statistics").bold().cyan());
    for (name, result) in stats {
        match result {
            Ok(stats) => println!(
                "  {} ({}): {} records, index {}",
                style(&stats.name).bold(),
                stats.table_name,
                style(stats.total_records).cyan(),
                stats.index_name
            ),
            Err(e) => println!("  {}: {}", style(name).bold(), style(e).red()),
        }
    }
    Ok(())
}
