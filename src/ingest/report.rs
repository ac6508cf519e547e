//! Run report: what was ingested, what was skipped and why.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Why a row was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// More cells than header columns
    FieldCount,
    /// Unparseable record (quoting, encoding)
    MalformedRecord,
    /// Key cell empty
    EmptyKey,
    EmbeddingService,
    EmbeddingTimeout,
    EmbeddingDimension,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::FieldCount => "field_count",
            SkipReason::MalformedRecord => "malformed_record",
            SkipReason::EmptyKey => "empty_key",
            SkipReason::EmbeddingService => "embedding_service",
            SkipReason::EmbeddingTimeout => "embedding_timeout",
            SkipReason::EmbeddingDimension => "embedding_dimension",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row-scoped error that can be recorded as a skip.
pub trait SkipCause: fmt::Display {
    fn reason(&self) -> SkipReason;
}

/// One skipped row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub line: u64,
    pub key: Option<String>,
    pub reason: SkipReason,
    pub message: String,
}

impl RowFailure {
    pub fn new(line: u64, key: Option<String>, cause: &impl SkipCause) -> Self {
        Self {
            line,
            key,
            reason: cause.reason(),
            message: cause.to_string(),
        }
    }
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub namespace: String,
    pub document: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Data rows read from the input, including skipped ones
    pub rows_total: usize,
    pub rows_ingested: usize,
    pub rows_skipped: usize,
    /// Issue → satellite relationship merges issued
    pub links_merged: usize,
    /// Uniqueness constraints declared before ingestion
    pub constraints_ensured: usize,
    pub skipped_by_reason: BTreeMap<SkipReason, usize>,
    pub failures: Vec<RowFailure>,
}

impl IngestReport {
    pub fn new(namespace: &str, document: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            namespace: namespace.to_string(),
            document: document.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            rows_total: 0,
            rows_ingested: 0,
            rows_skipped: 0,
            links_merged: 0,
            constraints_ensured: 0,
            skipped_by_reason: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    pub fn record_ingested(&mut self, links: usize) {
        self.rows_ingested += 1;
        self.links_merged += links;
    }

    pub fn record_skip(&mut self, failure: RowFailure) {
        self.rows_skipped += 1;
        *self.skipped_by_reason.entry(failure.reason).or_default() += 1;
        self.failures.push(failure);
    }

    /// Stamp the duration; failures are ordered by line for stable output.
    pub fn finish(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        self.failures.sort_by_key(|f| f.line);
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Ingested {} of {} rows from {} ({} skipped, {} relationships merged) in {} ms",
            self.rows_ingested,
            self.rows_total,
            self.document,
            self.rows_skipped,
            self.links_merged,
            self.duration_ms
        )?;
        for (reason, count) in &self.skipped_by_reason {
            writeln!(f, "  skipped {:>6}  {}", count, reason)?;
        }
        Ok(())
    }
}
