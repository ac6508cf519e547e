//! CSV → property graph ingestion
//!
//! Stages, leaves first:
//! - `loader`: reads and validates the export, normalizes cells
//! - `schema`: splits the header into core and dynamic columns
//! - `naming`: column name → (satellite label, relationship type)
//! - `attacher`: embedding per issue, batched, failures isolated per row
//! - `engine`: resolves rows and upserts them with bounded retries
//! - `constraints`: uniqueness constraints and the vector index
//! - `pipeline`: runs the stages and produces the [`IngestReport`]

pub mod attacher;
pub mod constraints;
pub mod engine;
pub mod loader;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod schema;

pub use attacher::EmbeddingAttacher;
pub use constraints::{ConstraintManager, SchemaOutcome};
pub use engine::{split_multi_value, IssueRecord, RetryPolicy, UpsertEngine};
pub use loader::{CsvLoader, CsvRecord, IssueCsv};
pub use naming::{derive_naming, GraphNaming, NamingCache};
pub use pipeline::IngestPipeline;
pub use progress::{LogProgress, NoProgress, ProgressReporter, ProgressUpdate, RowStatus};
pub use report::{IngestReport, RowFailure, SkipReason};
pub use schema::{ColumnSchema, DynamicColumn, ScalarBinding};
