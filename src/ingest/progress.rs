//! Per-row progress notifications.

use crate::ingest::report::SkipReason;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Ingested,
    Skipped(SkipReason),
}

/// Emitted once per data row, after the row has been written or skipped.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate<'a> {
    pub namespace: &'a str,
    /// Identifier of the input document (file path or caller-supplied name)
    pub document: &'a str,
    pub key: Option<&'a str>,
    pub line: u64,
    pub status: RowStatus,
}

/// Receives row progress. Called concurrently from the writer pool.
pub trait ProgressReporter: Send + Sync {
    fn on_row(&self, update: &ProgressUpdate<'_>);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressUpdate<'_>) + Send + Sync,
{
    fn on_row(&self, update: &ProgressUpdate<'_>) {
        self(update)
    }
}

/// Discards all updates.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_row(&self, _update: &ProgressUpdate<'_>) {}
}

/// Logs a summary line every `interval` rows and every skipped row.
pub struct LogProgress {
    interval: usize,
    seen: AtomicUsize,
    skipped: AtomicUsize,
}

impl LogProgress {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            seen: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }

    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for LogProgress {
    fn on_row(&self, update: &ProgressUpdate<'_>) {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if let RowStatus::Skipped(reason) = update.status {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                namespace = update.namespace,
                document = update.document,
                key = update.key.unwrap_or("-"),
                line = update.line,
                %reason,
                "Row skipped"
            );
        }
        if seen % self.interval == 0 {
            tracing::info!(
                namespace = update.namespace,
                document = update.document,
                rows = seen,
                skipped = self.skipped.load(Ordering::Relaxed),
                "Ingestion progress"
            );
        }
    }
}
