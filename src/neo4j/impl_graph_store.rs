//! `GraphStore` implementation for `Neo4jClient`.
//!
//! Every method simply delegates to the corresponding inherent method on `Neo4jClient`.

use async_trait::async_trait;

use super::client::Neo4jClient;
use super::models::{GraphStats, IssueWrite};
use super::traits::GraphStore;

#[async_trait]
impl GraphStore for Neo4jClient {
    async fn ensure_unique_constraint(&self, label: &str, property: &str) -> anyhow::Result<()> {
        self.ensure_unique_constraint(label, property).await
    }

    async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> anyhow::Result<()> {
        self.ensure_vector_index(label, property, dimensions).await
    }

    async fn write_issue(&self, write: &IssueWrite) -> anyhow::Result<()> {
        self.write_issue(write).await
    }

    async fn graph_stats(&self) -> anyhow::Result<GraphStats> {
        self.graph_stats().await
    }
}
