//! Graph upsert engine.
//!
//! Turns a loaded row into a fully resolved [`IssueWrite`] and hands it to the
//! [`GraphStore`] as one transaction, retrying transient store failures with
//! bounded exponential backoff.

use crate::error::{is_transient, GraphWriteError, RowIngestError};
use crate::ingest::loader::CsvRecord;
use crate::ingest::schema::ColumnSchema;
use crate::neo4j::{GraphStore, IssueNode, IssueWrite, SatelliteLink};
use crate::IngestConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Split a multi-value cell on any of `delimiters`.
///
/// Tokens are trimmed; empty tokens and repeats are dropped, keeping the
/// first occurrence order.
pub fn split_multi_value(cell: &str, delimiters: &[char]) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in cell.split(delimiters).map(str::trim) {
        if !token.is_empty() && !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// A row resolved against the schema, waiting for its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRecord {
    pub line: u64,
    pub key: String,
    pub summary: String,
    pub description: String,
    pub attributes: Vec<(String, String)>,
    pub links: Vec<SatelliteLink>,
}

impl IssueRecord {
    /// Resolve one loaded row.
    ///
    /// Missing static cells take `missing_value`; empty dynamic cells
    /// contribute no links.
    pub fn resolve(
        record: &CsvRecord,
        schema: &ColumnSchema,
        config: &IngestConfig,
    ) -> Result<Self, RowIngestError> {
        let key = record
            .cell(schema.key)
            .ok_or(RowIngestError::EmptyKey)?
            .to_string();
        let static_cell = |index: Option<usize>| {
            index
                .and_then(|i| record.cell(i))
                .unwrap_or(config.missing_value.as_str())
                .to_string()
        };

        let attributes = schema
            .scalars
            .iter()
            .map(|s| (s.property.clone(), static_cell(s.index)))
            .collect();

        let mut links: Vec<SatelliteLink> = Vec::new();
        for column in &schema.dynamic {
            let Some(cell) = record.cell(column.index) else {
                continue;
            };
            let tokens = split_multi_value(cell, &config.delimiters);
            if tokens.is_empty() {
                continue;
            }
            // Duplicate headers land in the same link
            let position = links.iter().position(|l| {
                l.label == column.naming.label && l.relationship == column.naming.relationship
            });
            let link = match position {
                Some(idx) => &mut links[idx],
                None => {
                    links.push(SatelliteLink {
                        label: column.naming.label.clone(),
                        relationship: column.naming.relationship.clone(),
                        names: Vec::new(),
                    });
                    let last = links.len() - 1;
                    &mut links[last]
                }
            };
            for token in tokens {
                if !link.names.contains(&token) {
                    link.names.push(token);
                }
            }
        }

        Ok(Self {
            line: record.line,
            key,
            summary: static_cell(Some(schema.summary)),
            description: static_cell(Some(schema.description)),
            attributes,
            links,
        })
    }

    /// Text sent to the embedding service.
    pub fn embedding_text(&self, separator: &str) -> String {
        format!("{}{}{}", self.summary, separator, self.description)
    }

    pub fn into_write(self, embedding: Vec<f32>) -> IssueWrite {
        IssueWrite {
            issue: IssueNode {
                key: self.key,
                summary: self.summary,
                description: self.description,
                embedding,
                attributes: self.attributes,
            },
            links: self.links,
        }
    }
}

/// Bounded retry with exponential backoff and a per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: config.retry_backoff(),
            timeout: config.write_timeout(),
        }
    }

    /// Sleep before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Run `attempt` until it succeeds, fails permanently or the budget runs out.
    ///
    /// A timed-out attempt counts as transient.
    pub async fn run<F, Fut>(&self, operation: &str, mut attempt: F) -> Result<(), GraphWriteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut tries: u32 = 0;
        loop {
            tries += 1;
            let message = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if !is_transient(&e) => {
                    return Err(GraphWriteError::Rejected {
                        operation: operation.to_string(),
                        message: format!("{:#}", e),
                    });
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => format!("timed out after {:?}", self.timeout),
            };

            if tries > self.max_retries {
                return Err(GraphWriteError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: tries,
                    message,
                });
            }
            let delay = self.backoff(tries);
            tracing::warn!(
                operation,
                attempt = tries,
                delay_ms = delay.as_millis() as u64,
                "Transient graph store failure, retrying: {}",
                message
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Writes resolved issues to the graph store.
pub struct UpsertEngine {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
}

impl UpsertEngine {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Merge the issue and all of its satellite links.
    pub async fn upsert(&self, write: &IssueWrite) -> Result<(), GraphWriteError> {
        let operation = format!("write issue {}", write.issue.key);
        self.retry
            .run(&operation, || self.store.write_issue(write))
            .await?;
        tracing::debug!(
            key = %write.issue.key,
            links = write.link_count(),
            "Issue upserted"
        );
        Ok(())
    }
}
