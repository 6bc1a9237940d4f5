//! NormRAG Ingest CLI
//!
//! Indexes normative documents into the vector store:
//! - `ingest index [--dir DIR]` indexes every PDF/TXT file in a directory
//! - `ingest reindex --yes` rebuilds the chunks of every stored document

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use normrag_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository},
    embeddings::create_embedder,
    metrics, VERSION,
};
use normrag_ingestion::{document_service, BatchSummary};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ingest", version, about = "Index university normative documents for NormRAG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every .pdf/.txt file in a directory (title = file name).
    Index {
        /// Directory to scan. Defaults to `ingestion.documents_dir`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Reprocess every stored document, replacing all of its chunks.
    Reindex {
        /// Confirm rebuilding the whole index.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate()?;
    init_tracing(&config.observability);

    info!("Starting NormRAG ingest v{}", VERSION);
    metrics::register_metrics();

    let db = DbPool::new(&config.database).await?;
    db.init_schema(config.embedding.dimension).await?;

    let repository = Arc::new(Repository::new(db, config.embedding.dimension));
    let embedder = create_embedder(&config.embedding)?;
    let service = document_service(&config, repository, embedder)?;

    let summary = match cli.command {
        Commands::Index { dir } => {
            let dir = dir.unwrap_or_else(|| PathBuf::from(&config.ingestion.documents_dir));
            if !dir.is_dir() {
                bail!("{} is not a directory", dir.display());
            }
            info!(dir = %dir.display(), "Indexing directory");
            service.index_directory(&dir).await?
        }
        Commands::Reindex { yes } => {
            if !yes {
                bail!("reindex rebuilds every document; pass --yes to confirm");
            }
            service.reprocess_all().await?
        }
    };

    print_summary(&summary);

    if !summary.failed.is_empty() {
        bail!("{} document(s) failed", summary.failed.len());
    }
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_summary(summary: &BatchSummary) {
    println!("Indexed: {}", summary.succeeded.len());
    for processed in &summary.succeeded {
        println!(
            "  ok    {} ({} chunks)",
            processed.document.title, processed.chunk_count
        );
    }

    println!("Failed: {}", summary.failed.len());
    for (source, error) in &summary.failed {
        println!("  error {}: {}", source, error);
    }
}
