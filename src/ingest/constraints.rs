//! Uniqueness constraints and the embedding vector index.
//!
//! Declared before the first row is written. Every declaration is
//! conditional on the store side, so running this on an already prepared
//! database changes nothing.

use crate::error::GraphWriteError;
use crate::ingest::engine::RetryPolicy;
use crate::ingest::schema::ColumnSchema;
use crate::neo4j::{GraphStore, EMBEDDING_PROPERTY, ISSUE_KEY_PROPERTY, ISSUE_LABEL, SATELLITE_NAME_PROPERTY};
use crate::IngestConfig;
use std::sync::Arc;

/// What [`ConstraintManager::ensure`] declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOutcome {
    /// (label, property) uniqueness constraints, in declaration order
    pub constraints: Vec<(String, String)>,
    pub vector_index: bool,
}

pub struct ConstraintManager {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    constrain_satellites: bool,
    /// Embedding dimension, when the vector index is wanted
    vector_dimensions: Option<usize>,
}

impl ConstraintManager {
    pub fn new(store: Arc<dyn GraphStore>, config: &IngestConfig, dimensions: usize) -> Self {
        Self {
            store,
            retry: RetryPolicy::from_config(config),
            constrain_satellites: config.constrain_satellites,
            vector_dimensions: config.vector_index.then_some(dimensions),
        }
    }

    /// Declare `Issue.key` unique, then `name` unique for every satellite
    /// label of `schema`, then the vector index.
    ///
    /// A failing constraint aborts the run. A failing vector index is only
    /// logged: older servers do not support them.
    pub async fn ensure(&self, schema: &ColumnSchema) -> Result<SchemaOutcome, GraphWriteError> {
        let mut targets = vec![(ISSUE_LABEL.to_string(), ISSUE_KEY_PROPERTY.to_string())];
        if self.constrain_satellites {
            targets.extend(
                schema
                    .satellite_labels()
                    .into_iter()
                    .filter(|label| *label != ISSUE_LABEL)
                    .map(|label| (label.to_string(), SATELLITE_NAME_PROPERTY.to_string())),
            );
        }

        for (label, property) in &targets {
            let operation = format!("constraint {}.{}", label, property);
            self.retry
                .run(&operation, || {
                    self.store.ensure_unique_constraint(label, property)
                })
                .await?;
            tracing::debug!(label = %label, property = %property, "Constraint ensured");
        }

        let mut vector_index = false;
        if let Some(dimensions) = self.vector_dimensions {
            let operation = format!("vector index {}.{}", ISSUE_LABEL, EMBEDDING_PROPERTY);
            match self
                .retry
                .run(&operation, || {
                    self.store
                        .ensure_vector_index(ISSUE_LABEL, EMBEDDING_PROPERTY, dimensions)
                })
                .await
            {
                Ok(()) => vector_index = true,
                Err(e) => tracing::warn!("Skipping vector index: {}", e),
            }
        }

        tracing::info!(
            constraints = targets.len(),
            vector_index,
            "Graph schema ready"
        );
        Ok(SchemaOutcome {
            constraints: targets,
            vector_index,
        })
    }
}
