//! Run orchestration: load → classify → constrain → embed → upsert.
//!
//! Rows are processed in embedding-sized chunks. Inside a chunk, writes are
//! grouped into per-key lanes: lanes run concurrently on up to `workers`
//! writers while the rows of one lane are written in file order, so the last
//! row for a key always wins.

use crate::embeddings::EmbeddingProvider;
use crate::error::{GraphWriteError, IngestError, ValidationError};
use crate::ingest::attacher::EmbeddingAttacher;
use crate::ingest::constraints::{ConstraintManager, SchemaOutcome};
use crate::ingest::engine::{IssueRecord, RetryPolicy, UpsertEngine};
use crate::ingest::loader::{CsvLoader, IssueCsv};
use crate::ingest::progress::{NoProgress, ProgressReporter, ProgressUpdate, RowStatus};
use crate::ingest::report::{IngestReport, RowFailure};
use crate::ingest::schema::ColumnSchema;
use crate::neo4j::{GraphStore, IssueWrite};
use crate::{Config, EmbeddingConfig, IngestConfig};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub struct IngestPipeline {
    config: IngestConfig,
    attacher: EmbeddingAttacher,
    engine: UpsertEngine,
    constraints: ConstraintManager,
    progress: Arc<dyn ProgressReporter>,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        provider: Arc<dyn EmbeddingProvider>,
        embedding: &EmbeddingConfig,
        config: &IngestConfig,
    ) -> Self {
        let mut config = config.clone();
        if !config.constrain_satellites && config.workers > 1 {
            // Without a uniqueness constraint two concurrent MERGEs can both
            // create the same satellite node
            tracing::warn!(
                workers = config.workers,
                "Satellite constraints are disabled, writing with a single worker"
            );
            config.workers = 1;
        }
        Self {
            attacher: EmbeddingAttacher::new(provider, embedding),
            engine: UpsertEngine::new(store.clone(), RetryPolicy::from_config(&config)),
            constraints: ConstraintManager::new(store, &config, embedding.dimensions),
            progress: Arc::new(NoProgress),
            config,
        }
    }

    pub fn from_config(
        store: Arc<dyn GraphStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self::new(store, provider, &config.embedding, &config.ingest)
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Number of key lanes written concurrently.
    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    pub fn loader(&self) -> CsvLoader<'_> {
        CsvLoader::new(&self.config.columns)
    }

    pub fn classify(&self, columns: &[String]) -> Result<ColumnSchema, ValidationError> {
        ColumnSchema::classify(columns, &self.config)
    }

    /// Declare constraints and the vector index for `schema`.
    pub async fn prepare(&self, schema: &ColumnSchema) -> Result<SchemaOutcome, IngestError> {
        Ok(self.constraints.ensure(schema).await?)
    }

    /// Load `path` and ingest it.
    pub async fn ingest_path(
        &self,
        path: &Path,
        namespace: &str,
    ) -> Result<IngestReport, IngestError> {
        let csv = self.loader().load_path(path)?;
        self.ingest(&csv, namespace).await
    }

    /// Ingest a loaded export.
    ///
    /// Validation and constraint failures abort before the first row is
    /// written. Row-scoped failures are recorded in the report. A graph write
    /// that still fails after retries aborts the run.
    pub async fn ingest(&self, csv: &IssueCsv, namespace: &str) -> Result<IngestReport, IngestError> {
        let schema = self.classify(&csv.columns)?;
        let mut report = IngestReport::new(namespace, &csv.source);
        report.rows_total = csv.row_count();

        tracing::info!(
            run_id = %report.run_id,
            namespace,
            document = %csv.source,
            rows = report.rows_total,
            dynamic_columns = schema.dynamic.len(),
            model = self.attacher.model_name(),
            "Starting ingestion"
        );

        let outcome = self.prepare(&schema).await?;
        report.constraints_ensured = outcome.constraints.len();

        for failure in &csv.rejected {
            self.skip(&mut report, failure.clone());
        }

        let mut pending = Vec::with_capacity(csv.records.len());
        for record in &csv.records {
            match IssueRecord::resolve(record, &schema, &self.config) {
                Ok(issue) => pending.push(issue),
                Err(e) => self.skip(&mut report, RowFailure::new(record.line, None, &e)),
            }
        }

        let mut pending = pending.into_iter().peekable();
        while pending.peek().is_some() {
            let chunk: Vec<IssueRecord> = pending.by_ref().take(self.attacher.batch_size()).collect();
            if let Err(e) = self.ingest_chunk(chunk, &mut report).await {
                tracing::error!(
                    run_id = %report.run_id,
                    namespace,
                    document = %csv.source,
                    ingested = report.rows_ingested,
                    "Ingestion aborted: {}",
                    e
                );
                return Err(e.into());
            }
        }

        report.finish();
        tracing::info!(
            run_id = %report.run_id,
            namespace,
            document = %csv.source,
            ingested = report.rows_ingested,
            skipped = report.rows_skipped,
            links = report.links_merged,
            duration_ms = report.duration_ms,
            "Ingestion complete"
        );
        Ok(report)
    }

    /// Embed one chunk, then write it.
    async fn ingest_chunk(
        &self,
        chunk: Vec<IssueRecord>,
        report: &mut IngestReport,
    ) -> Result<(), GraphWriteError> {
        let texts: Vec<String> = chunk
            .iter()
            .map(|issue| issue.embedding_text(&self.config.text_separator))
            .collect();
        let embeddings = self.attacher.embed_all(&texts).await;

        let mut lanes: Vec<Vec<(u64, IssueWrite)>> = Vec::new();
        let mut lane_of: HashMap<String, usize> = HashMap::new();
        for (issue, embedding) in chunk.into_iter().zip(embeddings) {
            match embedding {
                Ok(vector) => {
                    let line = issue.line;
                    let write = issue.into_write(vector);
                    let lane = *lane_of.entry(write.issue.key.clone()).or_insert_with(|| {
                        lanes.push(Vec::new());
                        lanes.len() - 1
                    });
                    lanes[lane].push((line, write));
                }
                Err(e) => {
                    let failure = RowFailure::new(issue.line, Some(issue.key), &e);
                    self.skip(report, failure);
                }
            }
        }

        let namespace = report.namespace.clone();
        let document = report.document.clone();
        let mut writers = stream::iter(lanes)
            .map(|lane| self.write_lane(lane, &namespace, &document))
            .buffer_unordered(self.workers());

        while let Some(written) = writers.next().await {
            for links in written? {
                report.record_ingested(links);
            }
        }
        Ok(())
    }

    /// Write one key's rows in order. Returns the link count of each row.
    async fn write_lane(
        &self,
        lane: Vec<(u64, IssueWrite)>,
        namespace: &str,
        document: &str,
    ) -> Result<Vec<usize>, GraphWriteError> {
        let mut written = Vec::with_capacity(lane.len());
        for (line, write) in lane {
            self.engine.upsert(&write).await?;
            self.progress.on_row(&ProgressUpdate {
                namespace,
                document,
                key: Some(&write.issue.key),
                line,
                status: RowStatus::Ingested,
            });
            written.push(write.link_count());
        }
        Ok(written)
    }

    fn skip(&self, report: &mut IngestReport, failure: RowFailure) {
        tracing::debug!(
            line = failure.line,
            key = failure.key.as_deref().unwrap_or("-"),
            reason = %failure.reason,
            "Skipping row: {}",
            failure.message
        );
        self.progress.on_row(&ProgressUpdate {
            namespace: &report.namespace,
            document: &report.document,
            key: failure.key.as_deref(),
            line: failure.line,
            status: RowStatus::Skipped(failure.reason),
        });
        report.record_skip(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::ingest::report::SkipReason;
    use crate::neo4j::mock::MockGraphStore;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    const DIMENSIONS: usize = 8;
    const HEADER: &str = "Issue key,Summary,Description,Assignee,Status,Labels\n";

    fn embedding_config() -> EmbeddingConfig {
        EmbeddingConfig {
            dimensions: DIMENSIONS,
            batch_size: 2,
            ..EmbeddingConfig::default()
        }
    }

    fn ingest_config() -> IngestConfig {
        IngestConfig {
            retry_backoff_ms: 1,
            ..IngestConfig::default()
        }
    }

    fn pipeline_with(
        store: Arc<MockGraphStore>,
        provider: MockEmbeddingProvider,
        config: &IngestConfig,
    ) -> IngestPipeline {
        IngestPipeline::new(store, Arc::new(provider), &embedding_config(), config)
    }

    fn pipeline(store: Arc<MockGraphStore>) -> IngestPipeline {
        pipeline_with(store, MockEmbeddingProvider::new(DIMENSIONS), &ingest_config())
    }

    fn load(pipeline: &IngestPipeline, body: &str) -> IssueCsv {
        pipeline
            .loader()
            .load_reader("export.csv", body.as_bytes())
            .unwrap()
    }

    async fn run(pipeline: &IngestPipeline, body: &str) -> IngestReport {
        let csv = load(pipeline, body);
        pipeline.ingest(&csv, "jira").await.unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_single_issue() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let report = run(
            &pipeline,
            &format!("{}PROJ-1,Login bug,Cannot log in,\"Alice, Bob\",Open,\n", HEADER),
        )
        .await;

        assert_eq!(report.rows_ingested, 1);
        assert_eq!(report.rows_skipped, 0);
        assert_eq!(report.links_merged, 2);

        let issues = store.issues.read().await;
        let issue = &issues["PROJ-1"];
        assert_eq!(issue.summary, "Login bug");
        assert_eq!(issue.embedding.len(), DIMENSIONS);
        assert!(issue
            .attributes
            .contains(&("status".to_string(), "Open".to_string())));
        drop(issues);

        assert_eq!(store.linked("PROJ-1", "ASSIGNEE").await, vec!["Alice", "Bob"]);
        let stats = store.graph_stats().await.unwrap();
        assert_eq!(stats.issues, 1);
        assert_eq!(stats.satellites["Assignee"], 2);
        assert_eq!(stats.relationships["ASSIGNEE"], 2);
        // Status is a scalar attribute, never a satellite
        assert!(!stats.satellites.contains_key("Statu"));
    }

    #[tokio::test]
    async fn test_ingesting_twice_is_idempotent() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let body = format!(
            "{}PROJ-1,a,b,\"Alice, Bob\",Open,ui\nPROJ-2,c,d,Alice,Done,\"ui, api\"\nPROJ-3,e,f,,Open,\n",
            HEADER
        );

        run(&pipeline, &body).await;
        let first = store.graph_stats().await.unwrap();
        let first_issue = store.issues.read().await["PROJ-2"].clone();

        run(&pipeline, &body).await;
        let second = store.graph_stats().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.issues, 3);
        assert_eq!(first.satellite_total(), 4);
        assert_eq!(first.relationship_total(), 6);
        assert_eq!(store.issues.read().await["PROJ-2"], first_issue);
    }

    #[tokio::test]
    async fn test_duplicate_key_updates_in_file_order() {
        let store = Arc::new(
            MockGraphStore::new().with_write_delay("PROJ-1", Duration::from_millis(20)),
        );
        let config = IngestConfig {
            workers: 4,
            ..ingest_config()
        };
        let embedding = EmbeddingConfig {
            batch_size: 4,
            ..embedding_config()
        };
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(MockEmbeddingProvider::new(DIMENSIONS)),
            &embedding,
            &config,
        );
        let report = run(
            &pipeline,
            &format!(
                "{}PROJ-1,first,x,,Open,\nPROJ-2,other,z,,Open,\nPROJ-1,second,y,,Done,\n",
                HEADER
            ),
        )
        .await;

        assert_eq!(report.rows_ingested, 3);
        // PROJ-2 overtakes the slow PROJ-1 lane, whose rows stay in file order
        assert_eq!(
            *store.write_log.read().await,
            vec!["PROJ-2", "PROJ-1", "PROJ-1"]
        );
        let issues = store.issues.read().await;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues["PROJ-1"].summary, "second");
        assert!(issues["PROJ-1"]
            .attributes
            .contains(&("status".to_string(), "Done".to_string())));
    }

    #[tokio::test]
    async fn test_unconstrained_satellites_force_single_writer() {
        let delay = Duration::from_millis(50);
        let store = Arc::new(
            MockGraphStore::new()
                .with_write_delay("A-1", delay)
                .with_write_delay("A-2", delay),
        );
        let config = IngestConfig {
            workers: 4,
            constrain_satellites: false,
            ..ingest_config()
        };
        let embedding = EmbeddingConfig {
            batch_size: 4,
            ..embedding_config()
        };
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(MockEmbeddingProvider::new(DIMENSIONS)),
            &embedding,
            &config,
        );
        assert_eq!(pipeline.workers(), 1);

        let started = std::time::Instant::now();
        let report = run(
            &pipeline,
            &format!("{}A-1,a,x,Alice,Open,\nA-2,b,y,Alice,Open,\n", HEADER),
        )
        .await;

        assert_eq!(report.rows_ingested, 2);
        assert!(started.elapsed() >= delay * 2);
        assert_eq!(*store.write_log.read().await, vec!["A-1", "A-2"]);
        assert_eq!(store.graph_stats().await.unwrap().satellites["Assignee"], 1);
    }

    #[test]
    fn test_constrained_satellites_keep_configured_workers() {
        let config = IngestConfig {
            workers: 4,
            ..ingest_config()
        };
        let pipeline = pipeline_with(
            Arc::new(MockGraphStore::new()),
            MockEmbeddingProvider::new(DIMENSIONS),
            &config,
        );
        assert_eq!(pipeline.workers(), 4);
    }

    #[tokio::test]
    async fn test_repeated_tokens_collapse() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        run(&pipeline, &format!("{}PROJ-1,s,d,,Open,\"A, B, B\"\n", HEADER)).await;

        let stats = store.graph_stats().await.unwrap();
        assert_eq!(stats.satellites["Label"], 2);
        assert_eq!(stats.relationships["LABEL"], 2);
        assert_eq!(store.linked("PROJ-1", "LABEL").await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_missing_description_fails_before_any_write() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let result = pipeline
            .loader()
            .load_reader("bad.csv", "Issue key,Summary,Assignee\nPROJ-1,a,Alice\n".as_bytes());
        assert!(matches!(result, Err(ValidationError::MissingColumn(ref c)) if c == "Description"));

        // A header that only loses the column after loading is caught again
        let csv = IssueCsv {
            source: "bad.csv".into(),
            columns: vec!["Issue key".into(), "Summary".into()],
            records: vec![],
            rejected: vec![],
        };
        let err = pipeline.ingest(&csv, "jira").await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(ValidationError::MissingColumn(_))));
        assert_eq!(store.schema_calls(), 0);
        assert_eq!(store.write_attempts(), 0);
    }

    #[tokio::test]
    async fn test_shrinking_cell_keeps_previous_relationships() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        run(
            &pipeline,
            &format!("{}PROJ-1,Login bug,Cannot log in,\"Alice, Bob\",Open,\n", HEADER),
        )
        .await;
        run(
            &pipeline,
            &format!("{}PROJ-1,Login bug,Still broken,Alice,In Progress,\n", HEADER),
        )
        .await;

        assert_eq!(store.linked("PROJ-1", "ASSIGNEE").await, vec!["Alice", "Bob"]);
        let issues = store.issues.read().await;
        assert_eq!(issues["PROJ-1"].description, "Still broken");
        assert!(issues["PROJ-1"]
            .attributes
            .contains(&("status".to_string(), "In Progress".to_string())));
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_only_that_row() {
        let store = Arc::new(MockGraphStore::new());
        let provider = MockEmbeddingProvider::new(DIMENSIONS).failing_on("poison");
        let pipeline = pipeline_with(store.clone(), provider, &ingest_config());
        let report = run(
            &pipeline,
            &format!(
                "{}PROJ-1,ok,ok,,Open,\nPROJ-2,poison,bad,,Open,\nPROJ-3,ok,ok,,Open,\n",
                HEADER
            ),
        )
        .await;

        assert_eq!(report.rows_ingested, 2);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.skipped_by_reason[&SkipReason::EmbeddingService], 1);
        assert_eq!(report.failures[0].key.as_deref(), Some("PROJ-2"));
        assert_eq!(report.failures[0].line, 3);
        assert!(!store.issues.read().await.contains_key("PROJ-2"));
    }

    #[tokio::test]
    async fn test_bad_rows_are_reported_and_skipped() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let report = run(
            &pipeline,
            &format!(
                "{},no key,x,,Open,\nPROJ-2,a,b,c,d,e,too many\nPROJ-3,ok,ok,,Open,\n",
                HEADER
            ),
        )
        .await;

        assert_eq!(report.rows_total, 3);
        assert_eq!(report.rows_ingested, 1);
        assert_eq!(report.skipped_by_reason[&SkipReason::EmptyKey], 1);
        assert_eq!(report.skipped_by_reason[&SkipReason::FieldCount], 1);
        let lines: Vec<u64> = report.failures.iter().map(|f| f.line).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let store = Arc::new(MockGraphStore::new().with_transient_failures("PROJ-1", 2));
        let pipeline = pipeline(store.clone());
        let report = run(&pipeline, &format!("{}PROJ-1,a,b,Alice,Open,\n", HEADER)).await;

        assert_eq!(report.rows_ingested, 1);
        assert_eq!(store.write_attempts(), 3);
        assert_eq!(store.linked("PROJ-1", "ASSIGNEE").await, vec!["Alice"]);
    }

    #[tokio::test]
    async fn test_rejected_write_aborts_run() {
        let store = Arc::new(MockGraphStore::new().rejecting("PROJ-2"));
        let config = IngestConfig {
            workers: 1,
            ..ingest_config()
        };
        let pipeline = pipeline_with(store.clone(), MockEmbeddingProvider::new(DIMENSIONS), &config);
        let csv = load(
            &pipeline,
            &format!("{}PROJ-1,a,b,,Open,\nPROJ-2,c,d,,Open,\n", HEADER),
        );

        let err = pipeline.ingest(&csv, "jira").await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::GraphWrite(GraphWriteError::Rejected { .. })
        ));
        assert!(!store.issues.read().await.contains_key("PROJ-2"));
    }

    #[tokio::test]
    async fn test_constraints_declared_before_writes() {
        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let report = run(&pipeline, &format!("{}PROJ-1,a,b,Alice,Open,ui\n", HEADER)).await;

        // Issue.key, Assignee.name, Label.name
        assert_eq!(report.constraints_ensured, 3);
        let constraints = store.constraints.read().await;
        assert!(constraints.contains(&("Issue".to_string(), "key".to_string())));
        assert!(constraints.contains(&("Label".to_string(), "name".to_string())));
    }

    #[tokio::test]
    async fn test_progress_reported_per_row() {
        let store = Arc::new(MockGraphStore::new());
        let seen: Arc<Mutex<Vec<(String, Option<String>, RowStatus)>>> = Arc::default();
        let sink = seen.clone();
        let pipeline = pipeline(store).with_progress(Arc::new(move |u: &ProgressUpdate<'_>| {
            sink.lock().unwrap().push((
                u.namespace.to_string(),
                u.key.map(str::to_string),
                u.status,
            ));
        }));
        run(
            &pipeline,
            &format!("{}PROJ-1,a,b,,Open,\n,x,y,,Open,\n", HEADER),
        )
        .await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|(_, key, _)| key.clone());
        assert_eq!(
            seen,
            vec![
                ("jira".to_string(), None, RowStatus::Skipped(SkipReason::EmptyKey)),
                ("jira".to_string(), Some("PROJ-1".to_string()), RowStatus::Ingested),
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}PROJ-7,a,b,Carol,Open,", HEADER).unwrap();

        let store = Arc::new(MockGraphStore::new());
        let pipeline = pipeline(store.clone());
        let report = pipeline.ingest_path(&path, "files").await.unwrap();
        assert_eq!(report.namespace, "files");
        assert!(report.document.ends_with("export.csv"));
        assert_eq!(store.linked("PROJ-7", "ASSIGNEE").await, vec!["Carol"]);
    }
}
