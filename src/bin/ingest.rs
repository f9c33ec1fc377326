use anyhow::{Context, Result};
use clap::Parser;
use ragchat::embeddings::{EmbeddingsStore, OpenAIEmbedder};
use ragchat::ingest::{IndexReport, Indexer};
use ragchat::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Embed the Ragchat corpora (files already in the ledger are skipped)")]
struct Args {
    /// Delete the vector index and ledger before indexing
    #[arg(short, long)]
    reset: bool,

    /// Only index the user corpus
    #[arg(short, long, conflicts_with = "system_only")]
    user_only: bool,

    /// Only index the training and knowledge corpora
    #[arg(short, long)]
    system_only: bool,

    /// Copy a file into the user corpus, then index the user corpus
    #[arg(short, long, value_name = "PATH")]
    add: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Corpus root: {}", config.data_dir().display());
    log::info!("Embeddings path: {}", config.embeddings_path().display());

    let api_key = std::env::var(&config.embeddings.api_key_env)
        .with_context(|| format!("Environment variable {} not set", config.embeddings.api_key_env))?;
    let embedder = OpenAIEmbedder::new(api_key, config.embeddings.model.clone(), config.embeddings.batch_size)?;
    log::info!("Embedding model: {}", embedder.model());
    let store = Arc::new(EmbeddingsStore::open(config.embeddings_path(), Arc::new(embedder)).await?);

    if args.reset {
        store.reset().await?;
        log::info!("Index reset");
    }

    let indexer = Indexer::from_config(&config, store)?;
    let start = Instant::now();
    let mut report = IndexReport::default();

    if let Some(path) = &args.add {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        let content = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        log::info!("Adding {} to {}", file_name, indexer.user_dir().display());
        report = report.merge(indexer.add_file_to_user_index(file_name, &content).await?);
    } else {
        if !args.user_only {
            report = report.merge(indexer.system_index().await?);
        }
        if !args.system_only {
            report = report.merge(indexer.user_index().await?);
        }
    }

    log::info!("=== Indexing Complete ===");
    log::info!("Stored: {}", report.stored);
    log::info!("Skipped (already indexed): {}", report.skipped);
    log::info!("Empty or unparseable: {}", report.empty);
    log::info!("Failed (retried next run): {}", report.failed);
    log::info!("Time: {:?}", start.elapsed());

    Ok(())
}
