//! In-memory mock implementation of GraphStore for testing.
//!
//! Applies the same MERGE semantics as the Cypher the real client sends:
//! issues keyed by `key`, satellites keyed by (label, name), relationships
//! keyed by (issue, type, satellite). Failures can be injected per issue key.
//! Conditionally compiled with `#[cfg(test)]`.

use crate::error::TransientStoreError;
use crate::neo4j::models::*;
use crate::neo4j::traits::GraphStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::RwLock;

/// (issue key, relationship type, satellite label, satellite name)
pub type RelationshipKey = (String, String, String, String);

/// In-memory mock implementation of GraphStore for testing.
#[derive(Default)]
pub struct MockGraphStore {
    pub issues: RwLock<HashMap<String, IssueNode>>,
    /// (label, name)
    pub satellites: RwLock<BTreeSet<(String, String)>>,
    pub relationships: RwLock<BTreeSet<RelationshipKey>>,
    /// (label, property)
    pub constraints: RwLock<BTreeSet<(String, String)>>,
    pub vector_indexes: RwLock<BTreeMap<(String, String), usize>>,
    /// Issue keys in commit order
    pub write_log: RwLock<Vec<String>>,

    write_attempts: AtomicUsize,
    schema_calls: AtomicUsize,
    transient_failures: Mutex<HashMap<String, u32>>,
    rejected_keys: HashSet<String>,
    write_delays: HashMap<String, Duration>,
    vector_index_unsupported: bool,
}

impl MockGraphStore {
    /// Create a new empty MockGraphStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` writes of `key` with a transient error.
    pub fn with_transient_failures(self, key: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
        self
    }

    /// Reject every write of `key` with a non-transient error.
    pub fn rejecting(mut self, key: &str) -> Self {
        self.rejected_keys.insert(key.to_string());
        self
    }

    /// Delay every write of `key`.
    pub fn with_write_delay(mut self, key: &str, delay: Duration) -> Self {
        self.write_delays.insert(key.to_string(), delay);
        self
    }

    /// Behave like a server without vector index support.
    pub fn without_vector_indexes(mut self) -> Self {
        self.vector_index_unsupported = true;
        self
    }

    /// Number of `write_issue` calls, including failed attempts.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Number of constraint / index declarations received.
    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    /// Satellite names linked from `key` through `relationship`, sorted.
    pub async fn linked(&self, key: &str, relationship: &str) -> Vec<String> {
        self.relationships
            .read()
            .await
            .iter()
            .filter(|(k, r, _, _)| k == key && r == relationship)
            .map(|(_, _, _, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl GraphStore for MockGraphStore {
    async fn ensure_unique_constraint(&self, label: &str, property: &str) -> Result<()> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.constraints
            .write()
            .await
            .insert((label.to_string(), property.to_string()));
        Ok(())
    }

    async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> Result<()> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        if self.vector_index_unsupported {
            anyhow::bail!("Invalid input 'VECTOR': expected 'INDEX'");
        }
        self.vector_indexes
            .write()
            .await
            .insert((label.to_string(), property.to_string()), dimensions);
        Ok(())
    }

    async fn write_issue(&self, write: &IssueWrite) -> Result<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let key = &write.issue.key;

        if let Some(delay) = self.write_delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        if self.rejected_keys.contains(key) {
            anyhow::bail!(
                "Neo.ClientError.Schema.ConstraintValidationFailed: issue {}",
                key
            );
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransientStoreError(format!("connection reset writing {}", key)).into());
                }
            }
        }

        // All locks are taken together so a write is applied atomically
        let mut issues = self.issues.write().await;
        let mut satellites = self.satellites.write().await;
        let mut relationships = self.relationships.write().await;

        issues.insert(key.clone(), write.issue.clone());
        for link in &write.links {
            for name in &link.names {
                satellites.insert((link.label.clone(), name.clone()));
                relationships.insert((
                    key.clone(),
                    link.relationship.clone(),
                    link.label.clone(),
                    name.clone(),
                ));
            }
        }
        self.write_log.write().await.push(key.clone());
        Ok(())
    }

    async fn graph_stats(&self) -> Result<GraphStats> {
        let mut stats = GraphStats {
            issues: self.issues.read().await.len(),
            ..GraphStats::default()
        };
        for (label, _) in self.satellites.read().await.iter() {
            *stats.satellites.entry(label.clone()).or_default() += 1;
        }
        for (_, rel, _, _) in self.relationships.read().await.iter() {
            *stats.relationships.entry(rel.clone()).or_default() += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_transient;

    fn write(key: &str, assignees: &[&str]) -> IssueWrite {
        IssueWrite {
            issue: IssueNode {
                key: key.to_string(),
                summary: "s".into(),
                description: "d".into(),
                embedding: vec![0.5],
                attributes: vec![],
            },
            links: vec![SatelliteLink {
                label: "Assignee".into(),
                relationship: "ASSIGNEE".into(),
                names: assignees.iter().map(|s| s.to_string()).collect(),
            }],
        }
    }

    #[tokio::test]
    async fn test_merge_semantics() {
        let store = MockGraphStore::new();
        store.write_issue(&write("A-1", &["Alice"])).await.unwrap();
        store.write_issue(&write("A-1", &["Alice"])).await.unwrap();
        store.write_issue(&write("A-2", &["Alice"])).await.unwrap();

        let stats = store.graph_stats().await.unwrap();
        assert_eq!(stats.issues, 2);
        assert_eq!(stats.satellites["Assignee"], 1);
        assert_eq!(stats.relationships["ASSIGNEE"], 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_consumed() {
        let store = MockGraphStore::new().with_transient_failures("A-1", 1);
        let err = store.write_issue(&write("A-1", &[])).await.unwrap_err();
        assert!(is_transient(&err));
        store.write_issue(&write("A-1", &[])).await.unwrap();
        assert_eq!(store.write_attempts(), 2);
    }
}
