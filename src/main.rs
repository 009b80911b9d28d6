use anyhow::{Context, Result};
use clap::Parser;
use deb_symbol_harvester::{
    DedupStore, HarvestConfig, HarvestPipeline, MemoryStore, ReqwestClient, SledStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Crawl Ubuntu package archives and record the dynamic symbols of their libraries.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// JSON config file; omitted fields use the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store directory, overriding `store_path` from the config
    #[arg(short, long, conflicts_with = "memory")]
    store: Option<PathBuf>,

    /// Keep records in memory only (nothing is persisted)
    #[arg(long)]
    memory: bool,

    /// Print the final counters as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(store) = cli.store {
        config.store_path = store;
    }

    for tool in [&config.extract_tool, &config.symbols_tool] {
        let resolved = which::which(&tool.program)
            .with_context(|| format!("required tool '{}' not found", tool.program))?;
        info!(tool = %tool.program, path = %resolved.display(), "Using tool");
    }

    let http = Arc::new(ReqwestClient::new()?);
    let sled = if cli.memory {
        None
    } else {
        let store = SledStore::open(&config.store_path)
            .with_context(|| format!("failed to open store {}", config.store_path.display()))?;
        Some(Arc::new(store))
    };
    let store: Arc<dyn DedupStore> = match &sled {
        Some(store) => store.clone() as Arc<dyn DedupStore>,
        None => Arc::new(MemoryStore::new()),
    };

    let pipeline = HarvestPipeline::new(&config, http, store)?;
    let stats = pipeline.run().await;

    if let Some(store) = &sled {
        store.flush().await?;
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
