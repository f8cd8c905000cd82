use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use drive_seed_core::{
    AstraStore, CollectionWriter, Config, FolderSync, GoogleDriveClient, IngestionReport,
    Ingestor, MemoryStore, OllamaEmbedder, QdrantStore, RunStatus, StoreBackend, SyncReport,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "drive-seed", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration with folder mappings and tunables
    #[arg(long, env = "DRIVE_SEED_CONFIG", default_value = "drive-seed.toml")]
    config: PathBuf,

    /// Astra DB application token
    #[arg(long, env = "ASTRA_DB_APPLICATION_TOKEN", hide_env_values = true)]
    store_token: Option<String>,

    /// Qdrant API key
    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true)]
    qdrant_api_key: Option<String>,

    /// OAuth access token for the Drive API
    #[arg(long, env = "GOOGLE_DRIVE_ACCESS_TOKEN", hide_env_values = true)]
    drive_token: Option<String>,

    /// Print reports as JSON on stdout.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Fail when any file or chunk was skipped.
    #[arg(long, global = true, default_value_t = false)]
    strict: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror a remote folder into its staging directory.
    Sync {
        #[arg(long)]
        folder: String,
    },
    /// Rebuild a collection from its staging directory.
    Seed {
        #[arg(long)]
        collection: String,
    },
    /// Sync a folder, then reseed the collection it maps to.
    Run {
        #[arg(long)]
        folder: String,
    },
}

fn build_store(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn CollectionWriter>> {
    let endpoint = || {
        config
            .store
            .endpoint
            .as_deref()
            .context("store.endpoint is not configured")
    };

    let store: Arc<dyn CollectionWriter> = match config.store.backend {
        StoreBackend::Astra => {
            let namespace = config
                .store
                .namespace
                .as_deref()
                .context("store.namespace is not configured")?;
            let token = cli
                .store_token
                .clone()
                .context("Astra needs --store-token or ASTRA_DB_APPLICATION_TOKEN")?;
            Arc::new(AstraStore::new(
                endpoint()?,
                namespace,
                token,
                config.store.timeout(),
            )?)
        }
        StoreBackend::Qdrant => Arc::new(QdrantStore::new(
            endpoint()?,
            cli.qdrant_api_key.clone(),
            config.store.timeout(),
        )?),
        StoreBackend::Memory => {
            warn!("memory backend selected; records are dropped when the process exits");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

async fn sync_folder(cli: &Cli, config: &Arc<Config>, folder: &str) -> anyhow::Result<SyncReport> {
    let token = cli
        .drive_token
        .clone()
        .context("sync needs --drive-token or GOOGLE_DRIVE_ACCESS_TOKEN")?;
    let drive = GoogleDriveClient::new(&config.remote.endpoint, token, config.remote.timeout())?;

    let report = FolderSync::new(Arc::clone(config), drive)
        .sync(folder)
        .await
        .with_context(|| format!("sync of folder {folder} failed"))?;

    for skipped in &report.skipped {
        warn!(file_id = %skipped.id, name = %skipped.name, reason = %skipped.reason, "skipped remote file");
    }
    Ok(report)
}

async fn seed_collection(
    cli: &Cli,
    config: &Arc<Config>,
    collection: &str,
) -> anyhow::Result<IngestionReport> {
    let embedder = OllamaEmbedder::new(
        &config.embedding.endpoint,
        &config.embedding.model,
        config.embedding.dimensions,
        config.embedding.timeout(),
    )?;
    let store = build_store(cli, config)?;
    info!(
        collection,
        backend = store.backend(),
        model = embedder.model(),
        "seeding collection"
    );

    let ingestor = Ingestor::new(Arc::clone(config), embedder, store)?;
    let report = ingestor
        .seed_collection(collection)
        .await
        .with_context(|| format!("seeding collection {collection} failed"))?;

    match ingestor.store().count(collection).await {
        Ok(count) => info!(collection, count, "collection record count"),
        Err(error) => warn!(collection, error = %error, "could not count collection"),
    }
    Ok(report)
}

fn print_sync(report: &SyncReport) {
    println!(
        "synced folder {} into {}: {} written, {} skipped",
        report.folder_id,
        report.staging_dir.display(),
        report.written.len(),
        report.skipped.len()
    );
    for skipped in &report.skipped {
        println!("  skipped {} ({}): {}", skipped.name, skipped.id, skipped.reason);
    }
}

fn print_ingestion(report: &IngestionReport) {
    println!(
        "seeded {}: {} records from {}/{} files at {}",
        report.collection,
        report.records_inserted,
        report.files_processed(),
        report.files_discovered,
        report.finished_at.to_rfc3339()
    );
    for skipped in &report.skipped_files {
        println!("  skipped file {}: {}", skipped.path.display(), skipped.reason);
    }
    for skipped in &report.skipped_chunks {
        println!(
            "  skipped chunk {} of {}: {}",
            skipped.chunk_index,
            skipped.path.display(),
            skipped.reason
        );
    }
}

fn check_strict(
    cli: &Cli,
    sync: Option<&SyncReport>,
    ingestion: Option<&IngestionReport>,
) -> anyhow::Result<()> {
    if !cli.strict {
        return Ok(());
    }
    if let Some(report) = sync {
        if !report.skipped.is_empty() {
            bail!("{} remote files were skipped", report.skipped.len());
        }
    }
    if let Some(report) = ingestion {
        if report.status() == RunStatus::Partial {
            bail!(
                "ingestion into {} was partial: {} files and {} chunks skipped",
                report.collection,
                report.skipped_files.len(),
                report.skipped_chunks.len()
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(
        Config::load(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?,
    );

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        config = %cli.config.display(),
        "drive-seed boot"
    );

    match &cli.command {
        Command::Sync { folder } => {
            let report = sync_folder(&cli, &config, folder).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_sync(&report);
            }
            check_strict(&cli, Some(&report), None)?;
        }
        Command::Seed { collection } => {
            let report = seed_collection(&cli, &config, collection).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_ingestion(&report);
            }
            check_strict(&cli, None, Some(&report))?;
        }
        Command::Run { folder } => {
            let collection = config.mapping_for_folder(folder)?.collection.clone();
            let synced = sync_folder(&cli, &config, folder).await?;
            let seeded = seed_collection(&cli, &config, &collection).await?;
            if cli.json {
                let combined = json!({ "sync": synced, "ingestion": seeded });
                println!("{}", serde_json::to_string_pretty(&combined)?);
            } else {
                print_sync(&synced);
                print_ingestion(&seeded);
            }
            check_strict(&cli, Some(&synced), Some(&seeded))?;
        }
    }

    Ok(())
}
