//! Error taxonomy for an ingestion run.
//!
//! Fatal errors (`ValidationError`, exhausted `GraphWriteError`) abort the run
//! through [`IngestError`]. Row-scoped errors (`RowIngestError`,
//! `EmbeddingError`) never leave the pipeline: they are folded into the
//! [`IngestReport`](crate::ingest::IngestReport) as skip reasons.

use crate::ingest::report::{SkipCause, SkipReason};
use std::time::Duration;
use thiserror::Error;

/// The input file cannot be ingested at all. Raised before any graph write.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A required column (key, summary or description) is absent from the header
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// The file could not be opened or its header could not be parsed
    #[error("Failed to read CSV {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// A single row is malformed; the row is skipped and the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowIngestError {
    #[error("row has {found} fields but the header declares {expected}")]
    FieldCount { expected: usize, found: usize },

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("issue key is empty")]
    EmptyKey,
}

impl SkipCause for RowIngestError {
    fn reason(&self) -> SkipReason {
        match self {
            RowIngestError::FieldCount { .. } => SkipReason::FieldCount,
            RowIngestError::Malformed(_) => SkipReason::MalformedRecord,
            RowIngestError::EmptyKey => SkipReason::EmptyKey,
        }
    }
}

/// The embedding service failed for one row's text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding service error: {0}")]
    Service(String),

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding has {found} dimensions, expected {expected}")]
    Dimension { expected: usize, found: usize },
}

impl SkipCause for EmbeddingError {
    fn reason(&self) -> SkipReason {
        match self {
            EmbeddingError::Service(_) => SkipReason::EmbeddingService,
            EmbeddingError::Timeout(_) => SkipReason::EmbeddingTimeout,
            EmbeddingError::Dimension { .. } => SkipReason::EmbeddingDimension,
        }
    }
}

/// The graph store refused or could not complete a write.
#[derive(Error, Debug)]
pub enum GraphWriteError {
    /// Transient failures (connection loss, timeouts, deadlocks) persisted
    /// past the retry budget
    #[error("{operation} failed after {attempts} attempt(s): {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// A non-transient failure, e.g. an unexpected constraint violation
    #[error("{operation} rejected by the graph store: {message}")]
    Rejected { operation: String, message: String },
}

/// Run-level failure: the ingestion was aborted.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    GraphWrite(#[from] GraphWriteError),
}

/// Marker attached by `GraphStore` implementations to failures worth retrying.
///
/// Store methods return `anyhow::Result`; the ingest layer inspects the error
/// chain for this type via [`is_transient`].
#[derive(Error, Debug)]
#[error("transient store failure: {0}")]
pub struct TransientStoreError(pub String);

/// Whether the error, or anything in its chain, is a [`TransientStoreError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TransientStoreError>().is_some()
        || err.chain().any(|cause| cause.is::<TransientStoreError>())
}
