use clap::{Parser, Subcommand};
use rag_store::commands::{
    ingest_files, init_stores, run_query, show_config, show_stats, write_config,
};
use rag_store::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-store")]
#[command(about = "Vector storage and retrieval engine for line-level document search")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the effective configuration to config.toml
    Config {
        /// Show current configuration instead of writing it
        #[arg(long)]
        show: bool,
    },
    /// Create store schemas and indexes, and check the embedding server
    Init,
    /// Ingest text documents line by line
    Ingest {
        /// Files to ingest (.txt, .md)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Search stored documents
    Query {
        text: String,
        /// Number of results (capped by retrieval.max_top_k)
        #[arg(long)]
        top_k: Option<u32>,
        /// Results to skip
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Store to search instead of the default
        #[arg(long)]
        store: Option<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show record counts per store
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_config(&config)?;
            }
        }
        Commands::Init => init_stores(&config).await?,
        Commands::Ingest { paths } => ingest_files(&config, &paths).await?,
        Commands::Query {
            text,
            top_k,
            offset,
            store,
            json,
        } => run_query(&config, &text, top_k, offset, store.as_deref(), json).await?,
        Commands::Stats => show_stats(&config).await?,
    }

    Ok(())
}
