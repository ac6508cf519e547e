//! Mock embedding provider for tests
//!
//! Produces deterministic embeddings from text hashes, ensuring:
//! - Same text → same embedding (idempotent re-ingestion is testable)
//! - Different texts → different embeddings
//! - Configurable dimensions (match the real provider's config)
//!
//! Failures can be injected per text to exercise row-scoped error handling.

use super::traits::EmbeddingProvider;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic mock embedding provider.
///
/// # Example
///
/// ```rust
/// use issue_graph_ingest::embeddings::MockEmbeddingProvider;
/// use issue_graph_ingest::embeddings::EmbeddingProvider;
///
/// # tokio_test::block_on(async {
/// let provider = MockEmbeddingProvider::new(1536);
/// let embedding = provider.embed_text("Login bug").await.unwrap();
/// assert_eq!(embedding.len(), 1536);
///
/// // Same text → same embedding
/// let embedding2 = provider.embed_text("Login bug").await.unwrap();
/// assert_eq!(embedding, embedding2);
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    /// Texts containing any of these fragments fail to embed
    fail_on: Vec<String>,
    /// Artificial latency per call
    delay: Option<Duration>,
    batch_calls: Arc<AtomicUsize>,
    single_calls: Arc<AtomicUsize>,
}

impl MockEmbeddingProvider {
    /// Create a new mock provider with the given embedding dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    /// Fail every text containing `fragment`.
    pub fn failing_on(mut self, fragment: impl Into<String>) -> Self {
        self.fail_on.push(fragment.into());
        self
    }

    /// Sleep for `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `embed_batch` calls served so far.
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Number of `embed_text` calls served so far.
    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    fn check(&self, text: &str) -> Result<()> {
        if let Some(fragment) = self.fail_on.iter().find(|f| text.contains(f.as_str())) {
            anyhow::bail!("mock embedding failure for text containing {:?}", fragment);
        }
        Ok(())
    }

    /// Generate a deterministic embedding from text using hash spreading.
    ///
    /// Each dimension rehashes the previous hash; values are mapped to
    /// [-1.0, 1.0] and the vector is L2-normalized.
    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            let value = (hash as f64 / u64::MAX as f64) * 2.0 - 1.0;
            embedding.push(value as f32);

            let mut h = DefaultHasher::new();
            hash.hash(&mut h);
            hash = h.finish();
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.check(text)?;
        Ok(self.hash_to_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        for text in texts {
            self.check(text)?;
        }
        Ok(texts.iter().map(|t| self.hash_to_embedding(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mock-hash-embedding"
    }
}
