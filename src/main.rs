//! Issue Graph Ingest - CLI
//!
//! Loads issue-tracker CSV exports into Neo4j.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use issue_graph_ingest::embeddings::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
use issue_graph_ingest::ingest::{ColumnSchema, CsvLoader, IngestPipeline, LogProgress};
use issue_graph_ingest::neo4j::{GraphStore, Neo4jClient};
use issue_graph_ingest::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "issue-ingest")]
#[command(about = "Ingest issue-tracker CSV exports into a Neo4j knowledge graph")]
struct Cli {
    /// YAML config file (defaults to ./ingest.yaml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a CSV export (plain or .gz)
    Ingest {
        csv: PathBuf,

        /// Namespace reported with progress and in the run report
        #[arg(short, long, default_value = "default")]
        namespace: String,

        /// Rows per embedding request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent graph writers
        #[arg(long)]
        workers: Option<usize>,

        /// Multi-value delimiter (repeatable)
        #[arg(long = "delimiter")]
        delimiters: Vec<char>,

        /// Use deterministic hash embeddings instead of the embedding service
        #[arg(long)]
        mock_embeddings: bool,

        /// Log progress every N rows
        #[arg(long, default_value = "500")]
        progress_interval: usize,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Declare the constraints a CSV export needs, without ingesting it
    Constraints { csv: PathBuf },

    /// Show how a CSV header maps onto the graph
    Inspect { csv: PathBuf },

    /// Print node and relationship counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,issue_graph_ingest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            csv,
            namespace,
            batch_size,
            workers,
            delimiters,
            mock_embeddings,
            progress_interval,
            json,
        } => {
            if let Some(batch_size) = batch_size {
                config.embedding.batch_size = batch_size;
            }
            if let Some(workers) = workers {
                config.ingest.workers = workers;
            }
            if !delimiters.is_empty() {
                config.ingest.delimiters = delimiters;
            }
            run_ingest(config, &csv, &namespace, mock_embeddings, progress_interval, json).await
        }
        Commands::Constraints { csv } => run_constraints(config, &csv).await,
        Commands::Inspect { csv } => run_inspect(&config, &csv),
        Commands::Stats => run_stats(&config).await,
    }
}

async fn connect(config: &Config) -> Result<Arc<Neo4jClient>> {
    let client = Neo4jClient::new(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
        .await
        .with_context(|| format!("Cannot reach Neo4j at {}", config.neo4j_uri))?;
    tracing::info!("Connected to Neo4j at {}", config.neo4j_uri);
    Ok(Arc::new(client))
}

fn embedding_provider(config: &Config, mock: bool) -> Result<Arc<dyn EmbeddingProvider>> {
    if mock {
        tracing::warn!("Using mock embeddings; vectors carry no semantics");
        return Ok(Arc::new(MockEmbeddingProvider::new(config.embedding.dimensions)));
    }
    Ok(Arc::new(HttpEmbeddingProvider::from_config(&config.embedding)?))
}

async fn run_ingest(
    config: Config,
    csv: &Path,
    namespace: &str,
    mock_embeddings: bool,
    progress_interval: usize,
    json: bool,
) -> Result<()> {
    let provider = embedding_provider(&config, mock_embeddings)?;
    let store: Arc<dyn GraphStore> = connect(&config).await?;
    let pipeline = IngestPipeline::from_config(store, provider, &config)
        .with_progress(Arc::new(LogProgress::new(progress_interval)));

    let report = pipeline.ingest_path(csv, namespace).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
        for failure in &report.failures {
            println!(
                "  line {:>6}  {:<12} {}: {}",
                failure.line,
                failure.key.as_deref().unwrap_or("-"),
                failure.reason,
                failure.message
            );
        }
    }
    Ok(())
}

async fn run_constraints(config: Config, csv: &Path) -> Result<()> {
    // Only the header matters; the embedding provider is never called
    let provider = Arc::new(MockEmbeddingProvider::new(config.embedding.dimensions));
    let store: Arc<dyn GraphStore> = connect(&config).await?;
    let pipeline = IngestPipeline::from_config(store, provider, &config);

    let loaded = pipeline.loader().load_path(csv)?;
    let schema = pipeline.classify(&loaded.columns)?;
    let outcome = pipeline.prepare(&schema).await?;

    for (label, property) in &outcome.constraints {
        println!("UNIQUE {}.{}", label, property);
    }
    if outcome.vector_index {
        println!("VECTOR INDEX Issue.embedding ({} dimensions)", config.embedding.dimensions);
    }
    Ok(())
}

fn run_inspect(config: &Config, csv: &Path) -> Result<()> {
    let loaded = CsvLoader::new(&config.ingest.columns).load_path(csv)?;
    let schema = ColumnSchema::classify(&loaded.columns, &config.ingest)?;

    println!("{}: {} rows, {} unreadable", loaded.source, loaded.records.len(), loaded.rejected.len());
    println!("\nCore columns:");
    for column in schema.core_columns(&loaded.columns) {
        println!("  {}", column);
    }
    println!("\nScalar attributes:");
    for scalar in &schema.scalars {
        let state = if scalar.index.is_some() { "" } else { "  (absent)" };
        println!("  {:<24} -> {}{}", scalar.column, scalar.property, state);
    }
    println!("\nDynamic columns:");
    for column in &schema.dynamic {
        println!(
            "  {:<24} -> (:{}) via [:{}]",
            column.name, column.naming.label, column.naming.relationship
        );
    }
    for column in &schema.ignored {
        println!("  {:<24} -> ignored", format!("{:?}", column));
    }
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let store = connect(config).await?;
    let stats = store.graph_stats().await?;

    println!("Issues: {}", stats.issues);
    println!("Satellites: {}", stats.satellite_total());
    for (label, count) in &stats.satellites {
        println!("  {:<24} {}", label, count);
    }
    println!("Relationships: {}", stats.relationship_total());
    for (rel, count) in &stats.relationships {
        println!("  {:<24} {}", rel, count);
    }
    Ok(())
}
