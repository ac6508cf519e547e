//! GraphStore trait definition
//!
//! Defines the abstract interface for the graph operations the ingestion
//! engine needs, enabling tests against an in-memory store and future
//! backend swaps.

use crate::neo4j::models::{GraphStats, IssueWrite};
use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface for the issue graph store.
///
/// Implementations attach [`TransientStoreError`](crate::TransientStoreError)
/// to failures that are safe to retry (connection loss, deadlocks).
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Declare `property` unique for nodes labelled `label`.
    ///
    /// Must be idempotent: an existing equivalent constraint is a no-op.
    async fn ensure_unique_constraint(&self, label: &str, property: &str) -> Result<()>;

    /// Declare a cosine vector index over `label.property`.
    async fn ensure_vector_index(&self, label: &str, property: &str, dimensions: usize)
        -> Result<()>;

    /// Write one issue and its satellite links as a single transaction.
    ///
    /// Every node and relationship is merged, never created blindly, so
    /// replaying the same write leaves the graph unchanged.
    async fn write_issue(&self, write: &IssueWrite) -> Result<()>;

    /// Count issues, satellites per label and relationships per type.
    async fn graph_stats(&self) -> Result<GraphStats>;
}
