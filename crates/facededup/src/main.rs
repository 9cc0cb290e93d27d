mod input;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use facededup_common::{logger, AppConfig, MetricKind};
use facededup_engine::{DedupCoordinator, EmbeddingStore, JsonlBackend, Metadata};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Find project root by looking for .git directory
fn find_project_root() -> Option<PathBuf> {
    let mut current_dir = std::env::current_dir().ok()?;

    loop {
        if current_dir.join(".git").exists() {
            return Some(current_dir);
        }

        if !current_dir.pop() {
            break;
        }
    }

    None
}

/// Load .env file from project root, falling back to the working directory
fn load_dotenv_from_project_root() {
    match find_project_root().map(|root| root.join(".env")) {
        Some(env_path) if env_path.exists() => {
            dotenv::from_path(&env_path).ok();
        }
        _ => {
            dotenv::dotenv().ok();
        }
    }
}

#[derive(Parser)]
#[command(name = "facededup")]
#[command(about = "FaceDedup - face embedding deduplication store", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over file and environment configuration
#[derive(Args)]
struct Overrides {
    /// TOML configuration file (default: $FACEDEDUP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Embedding store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Similarity metric (cosine or euclidean)
    #[arg(long, global = true)]
    metric: Option<MetricKind>,

    /// Embedding dimension
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit one embedding; stored only if no prior record matches
    Submit {
        #[command(flatten)]
        vector: VectorInput,

        /// Metadata as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,

        /// Match threshold for this submission
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Search for a match without storing anything
    Probe {
        #[command(flatten)]
        vector: VectorInput,

        /// Match threshold for this search
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Submit every *.json extraction file in a directory
    Import {
        /// Directory of extraction files
        dir: PathBuf,
    },

    /// Print the number of stored embeddings
    Count,

    /// Print stored records (metadata only)
    List {
        /// Maximum number of records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct VectorInput {
    /// Extraction file ({"encodings": [[...]]} or a bare array)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Inline comma-separated embedding
    #[arg(long, allow_hyphen_values = true)]
    vector: Option<String>,
}

impl VectorInput {
    fn encodings(&self) -> Result<Vec<Vec<f32>>> {
        match (&self.file, &self.vector) {
            (Some(path), _) => input::read_extraction(path),
            (None, Some(text)) => {
                let vector = input::parse_vector(text)?;
                Ok(if vector.is_empty() { Vec::new() } else { vec![vector] })
            }
            (None, None) => bail!("Either --file or --vector is required"),
        }
    }
}

fn load_config(overrides: &Overrides) -> Result<AppConfig> {
    let mut config = match &overrides.config {
        Some(path) => AppConfig::load(Some(path.as_path()))?,
        None => AppConfig::from_env()?,
    };

    if let Some(store) = &overrides.store {
        config.store_path = store.clone();
    }
    if let Some(metric) = overrides.metric {
        config.engine.metric = metric;
    }
    if let Some(dimension) = overrides.dimension {
        config.engine.dimension = dimension;
    }
    if let Some(level) = &overrides.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn open_coordinator(config: &AppConfig) -> Result<DedupCoordinator> {
    config.ensure_directories()?;

    let backend = JsonlBackend::new(&config.store_path, config.engine.dimension, config.fsync);
    let store = EmbeddingStore::open(Arc::new(backend), config.engine.dimension)
        .await
        .with_context(|| format!("Failed to open store {}", config.store_path.display()))?;

    Ok(DedupCoordinator::new(Arc::new(store), config.engine.clone())?)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn import_dir(dedup: &DedupCoordinator, dir: &Path) -> Result<bool> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("json"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    tracing::info!("Importing {} files from {}", files.len(), dir.display());

    let mut failed = 0usize;
    for path in &files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let encodings = match input::read_extraction(path) {
            Ok(encodings) => encodings,
            Err(e) => {
                tracing::warn!("Skipping {}: {:#}", filename, e);
                failed += 1;
                continue;
            }
        };

        let metadata = Metadata::new()
            .with_text("filename", filename.clone())
            .with_time("ingested_at", Utc::now());

        match dedup.submit_extracted(encodings, metadata, None).await {
            Ok(result) => {
                println!("{}", json!({ "file": filename, "result": result }));
            }
            Err(e) if e.is_retryable() => {
                tracing::error!("Store failure while importing {}: {}", filename, e);
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!("Failed to import {}: {}", filename, e);
                failed += 1;
            }
        }
    }

    print_json(&json!({
        "files": files.len(),
        "failed": failed,
        "stats": dedup.stats(),
        "count": dedup.count().await,
    }))?;

    Ok(failed == 0)
}

async fn run(command: Commands, config: &AppConfig, dedup: &DedupCoordinator) -> Result<bool> {
    match command {
        Commands::Submit {
            vector,
            meta,
            threshold,
        } => {
            let metadata = input::parse_metadata(&meta)?;
            let result = dedup
                .submit_extracted(vector.encodings()?, metadata, threshold)
                .await?;
            print_json(&result)?;
            Ok(!result.is_rejected())
        }
        Commands::Probe { vector, threshold } => {
            let encodings = vector.encodings()?;
            let Some(query) = encodings.first() else {
                bail!("No embedding provided");
            };
            let outcome = dedup.probe(query, threshold).await?;
            print_json(&json!({
                "matched_id": outcome.matched.as_ref().map(|m| m.id()),
                "score": outcome.matched.as_ref().map(|m| m.score),
                "max_similarity_found": outcome.max_similarity_found,
                "scanned": outcome.scanned,
                "skipped": outcome.skipped,
            }))?;
            Ok(true)
        }
        Commands::Import { dir } => import_dir(dedup, &dir).await,
        Commands::Count => {
            println!("{}", dedup.count().await);
            Ok(true)
        }
        Commands::List { limit } => {
            let snapshot = dedup.store().scan().await;
            for record in snapshot.iter().take(limit.unwrap_or(usize::MAX)) {
                println!(
                    "{}",
                    json!({ "id": record.id(), "metadata": record.metadata() })
                );
            }
            Ok(true)
        }
        Commands::Config => {
            print_json(&json!({ "config": config, "store_records": dedup.count().await }))?;
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // before parsing so .env can supply FACEDEDUP_CONFIG
    load_dotenv_from_project_root();

    let cli = Cli::parse();

    let config = load_config(&cli.overrides)?;

    logger::setup_from_config(&config)?;

    let dedup = open_coordinator(&config).await?;
    tracing::debug!("Store: {}", dedup.store().location());
    let outcome = run(cli.command, &config, &dedup).await;

    // close even when the command failed
    dedup.store().close().await?;

    if !outcome? {
        std::process::exit(2);
    }
    Ok(())
}
