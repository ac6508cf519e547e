//! Neo4j client for the issue knowledge graph

use super::models::*;
use crate::error::TransientStoreError;
use anyhow::{Context, Result};
use neo4rs::{query, Graph, Query};
use std::sync::Arc;

/// Client for Neo4j operations.
///
/// Holds one connection pool for the whole run; every row write borrows a
/// connection for the duration of its transaction only.
pub struct Neo4jClient {
    graph: Arc<Graph>,
}

/// Build the Issue upsert statement for the given scalar attribute properties.
///
/// Attribute values are bound as `$attr_0..$attr_n`, in the same order.
pub(crate) fn issue_merge_cypher(attribute_properties: &[&str]) -> String {
    let mut sets = vec![
        "i.summary = $summary".to_string(),
        "i.description = $description".to_string(),
        format!("i.{} = $embedding", quote_identifier(EMBEDDING_PROPERTY)),
    ];
    for (idx, property) in attribute_properties.iter().enumerate() {
        sets.push(format!("i.{} = $attr_{}", quote_identifier(property), idx));
    }
    format!(
        "MERGE (i:{} {{{}: $key}})\nSET {}",
        quote_identifier(ISSUE_LABEL),
        quote_identifier(ISSUE_KEY_PROPERTY),
        sets.join(",\n    ")
    )
}

/// Build the satellite fan-out statement for one (label, relationship type).
pub(crate) fn link_merge_cypher(label: &str, relationship: &str) -> String {
    format!(
        "MATCH (i:{issue} {{{key}: $key}})\n\
         UNWIND $names AS name\n\
         MERGE (n:{label} {{{name_prop}: name}})\n\
         MERGE (i)-[:{rel}]->(n)",
        issue = quote_identifier(ISSUE_LABEL),
        key = quote_identifier(ISSUE_KEY_PROPERTY),
        label = quote_identifier(label),
        name_prop = quote_identifier(SATELLITE_NAME_PROPERTY),
        rel = quote_identifier(relationship),
    )
}

pub(crate) fn unique_constraint_cypher(label: &str, property: &str) -> String {
    format!(
        "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
        quote_identifier(label),
        quote_identifier(property)
    )
}

pub(crate) fn vector_index_cypher(label: &str, property: &str, dimensions: usize) -> String {
    let name = format!("{}_{}_vector", label, property)
        .to_lowercase()
        .replace(|c: char| !c.is_ascii_alphanumeric(), "_");
    format!(
        r#"CREATE VECTOR INDEX {name} IF NOT EXISTS
           FOR (n:{label}) ON (n.{property})
           OPTIONS {{indexConfig: {{
               `vector.dimensions`: {dimensions},
               `vector.similarity_function`: 'cosine'
           }}}}"#,
        name = quote_identifier(&name),
        label = quote_identifier(label),
        property = quote_identifier(property),
        dimensions = dimensions,
    )
}

/// Whether a schema error only says the declaration is already in place.
fn is_already_present(message: &str) -> bool {
    message.contains("EquivalentSchemaRuleAlreadyExists")
        || message.contains("already exists")
        || message.contains("An equivalent")
}

/// Wrap a driver error, marking connection-level and transient server
/// failures as retryable.
fn classify(err: neo4rs::Error, operation: &str) -> anyhow::Error {
    let message = err.to_string();
    let transient = matches!(
        err,
        neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError
    ) || message.contains("TransientError")
        || message.contains("DeadlockDetected");

    if transient {
        anyhow::Error::new(TransientStoreError(message)).context(operation.to_string())
    } else {
        anyhow::Error::new(err).context(operation.to_string())
    }
}

impl Neo4jClient {
    /// Create a new Neo4j client
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;

        Ok(Self {
            graph: Arc::new(graph),
        })
    }

    /// Declare a uniqueness constraint, treating an existing one as success.
    pub async fn ensure_unique_constraint(&self, label: &str, property: &str) -> Result<()> {
        let cypher = unique_constraint_cypher(label, property);
        match self.graph.run(query(&cypher)).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_present(&e.to_string()) => {
                tracing::debug!(label, property, "Constraint already present: {}", e);
                Ok(())
            }
            Err(e) => Err(classify(
                e,
                &format!("create constraint on {}.{}", label, property),
            )),
        }
    }

    /// Declare a cosine vector index (requires Neo4j 5.13+).
    pub async fn ensure_vector_index(
        &self,
        label: &str,
        property: &str,
        dimensions: usize,
    ) -> Result<()> {
        let cypher = vector_index_cypher(label, property, dimensions);
        match self.graph.run(query(&cypher)).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_present(&e.to_string()) => Ok(()),
            Err(e) => Err(classify(
                e,
                &format!("create vector index on {}.{}", label, property),
            )),
        }
    }

    fn issue_query(issue: &IssueNode) -> Query {
        let properties: Vec<&str> = issue.attributes.iter().map(|(p, _)| p.as_str()).collect();
        // Neo4j stores floats as 64-bit
        let embedding_f64: Vec<f64> = issue.embedding.iter().map(|&x| x as f64).collect();

        let mut q = query(&issue_merge_cypher(&properties))
            .param("key", issue.key.clone())
            .param("summary", issue.summary.clone())
            .param("description", issue.description.clone())
            .param("embedding", embedding_f64);
        for (idx, (_, value)) in issue.attributes.iter().enumerate() {
            q = q.param(&format!("attr_{}", idx), value.clone());
        }
        q
    }

    fn link_query(key: &str, link: &SatelliteLink) -> Query {
        query(&link_merge_cypher(&link.label, &link.relationship))
            .param("key", key.to_string())
            .param("names", link.names.clone())
    }

    /// Upsert an issue and merge its satellites in one transaction.
    ///
    /// On any failure the transaction is rolled back before returning so the
    /// locks it holds are released immediately.
    pub async fn write_issue(&self, write: &IssueWrite) -> Result<()> {
        let operation = format!("write issue {}", write.issue.key);

        let mut queries = Vec::with_capacity(write.links.len() + 1);
        queries.push(Self::issue_query(&write.issue));
        for link in write.links.iter().filter(|l| !l.names.is_empty()) {
            queries.push(Self::link_query(&write.issue.key, link));
        }

        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| classify(e, &operation))?;

        for q in queries {
            if let Err(e) = txn.run(q).await {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(
                        key = %write.issue.key,
                        "Rollback after failed write also failed: {}",
                        rollback_err
                    );
                }
                return Err(classify(e, &operation));
            }
        }

        txn.commit().await.map_err(|e| classify(e, &operation))?;
        Ok(())
    }

    /// Count issues, satellites per label and relationships per type.
    pub async fn graph_stats(&self) -> Result<GraphStats> {
        let issue = quote_identifier(ISSUE_LABEL);
        let mut stats = GraphStats::default();

        let mut result = self
            .graph
            .execute(query(&format!("MATCH (i:{}) RETURN count(i) AS count", issue)))
            .await?;
        if let Some(row) = result.next().await? {
            stats.issues = row.get::<i64>("count")? as usize;
        }

        let mut result = self
            .graph
            .execute(query(&format!(
                "MATCH (:{issue})-[r]->(n) WHERE NOT n:{issue}
                 RETURN type(r) AS rel_type, count(r) AS count",
                issue = issue
            )))
            .await?;
        while let Some(row) = result.next().await? {
            let rel_type: String = row.get("rel_type")?;
            stats
                .relationships
                .insert(rel_type, row.get::<i64>("count")? as usize);
        }

        let mut result = self
            .graph
            .execute(query(&format!(
                "MATCH (:{issue})-->(n) WHERE NOT n:{issue}
                 WITH DISTINCT n
                 UNWIND labels(n) AS label
                 RETURN label, count(n) AS count",
                issue = issue
            )))
            .await?;
        while let Some(row) = result.next().await? {
            let label: String = row.get("label")?;
            stats
                .satellites
                .insert(label, row.get::<i64>("count")? as usize);
        }

        Ok(stats)
    }
}
