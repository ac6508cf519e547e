//! Issue Graph Ingest
//!
//! Turns issue-tracker CSV exports into a Neo4j property graph:
//! - one `Issue` node per row, carrying scalar attributes and an embedding
//! - satellite nodes for every distinct value of the open-ended columns
//!   (assignees, labels, versions…), with labels derived from column names
//! - idempotent MERGE-based upserts under uniqueness constraints

pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod neo4j;

pub use error::{
    EmbeddingError, GraphWriteError, IngestError, RowIngestError, TransientStoreError,
    ValidationError,
};

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub neo4j: Neo4jYamlConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
}

/// Neo4j configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: "password".into(),
        }
    }
}

/// Embedding service configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible `/v1/embeddings` endpoint
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Vector length produced by `model`
    pub dimensions: usize,
    /// Maximum number of rows sent in one service call
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/embeddings".into(),
            model: "text-embedding-ada-002".into(),
            api_key: None,
            dimensions: 1536,
            batch_size: 64,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// A static column copied verbatim onto the Issue node as `property`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScalarColumn {
    pub column: String,
    pub property: String,
}

impl ScalarColumn {
    pub fn new(column: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            property: property.into(),
        }
    }
}

/// The static column set. Everything outside it is a dynamic column.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub scalars: Vec<ScalarColumn>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            key: "Issue key".into(),
            summary: "Summary".into(),
            description: "Description".into(),
            scalars: vec![
                ScalarColumn::new("Issue Type", "type"),
                ScalarColumn::new("Status", "status"),
                ScalarColumn::new("Original Estimate", "original_estimate"),
                ScalarColumn::new("Story Points", "story_points"),
                ScalarColumn::new("Time Spent", "time_spent"),
            ],
        }
    }
}

/// Ingestion behaviour section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub columns: ColumnConfig,
    /// Columns excluded from the dynamic set without being written anywhere
    pub extra_static_columns: Vec<String>,
    /// Characters separating values inside a multi-value cell
    pub delimiters: Vec<char>,
    /// Written for static scalar attributes whose cell is empty or absent
    pub missing_value: String,
    /// Joins summary and description into the embedded text
    pub text_separator: String,
    /// Concurrent row writers (1 = strictly sequential)
    pub workers: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub write_timeout_secs: u64,
    /// Also declare `name` uniqueness for every satellite label
    pub constrain_satellites: bool,
    /// Declare a cosine vector index on `Issue.embedding`
    pub vector_index: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            columns: ColumnConfig::default(),
            extra_static_columns: vec!["combined".into(), "embedding".into()],
            delimiters: vec![','],
            missing_value: "Unknown".into(),
            text_separator: ". ".into(),
            workers: 4,
            max_retries: 3,
            retry_backoff_ms: 200,
            write_timeout_secs: 30,
            constrain_satellites: true,
            vector_index: true,
        }
    }
}

impl IngestConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "ingest.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let mut embedding = yaml.embedding;
        if let Ok(url) = std::env::var("EMBEDDING_URL") {
            embedding.url = url;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            embedding.model = model;
        }
        if let Some(key) = std::env::var("EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty())
        {
            embedding.api_key = Some(key);
        }
        if let Some(dimensions) = env_parse("EMBEDDING_DIMENSIONS") {
            embedding.dimensions = dimensions;
        }
        if let Some(batch_size) = env_parse("EMBEDDING_BATCH_SIZE") {
            embedding.batch_size = batch_size;
        }

        let mut ingest = yaml.ingest;
        if let Some(workers) = env_parse("INGEST_WORKERS") {
            ingest.workers = workers;
        }

        Ok(Self {
            neo4j_uri: std::env::var("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: std::env::var("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            embedding,
            ingest,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("ingest.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

// ============================================================================
// Tests
// ============================================================================
