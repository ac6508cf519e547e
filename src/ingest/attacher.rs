//! Embedding attachment.
//!
//! Texts are sent to the provider in batches of `batch_size`. When a batch
//! fails, its texts are retried one by one so that a single bad text only
//! costs its own row.

use crate::embeddings::EmbeddingProvider;
use crate::error::EmbeddingError;
use crate::EmbeddingConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub struct EmbeddingAttacher {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    dimensions: usize,
    timeout: Duration,
}

impl EmbeddingAttacher {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            batch_size: config.batch_size.max(1),
            dimensions: config.dimensions,
            timeout: config.timeout(),
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Vector length every embedding must have.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed every text. Result `i` belongs to `texts[i]`.
    pub async fn embed_all(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            results.extend(self.embed_chunk(chunk).await);
        }
        results
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        match self.call(self.provider.embed_batch(chunk)).await {
            Ok(vectors) if vectors.len() == chunk.len() => {
                return vectors.into_iter().map(|v| self.check(v)).collect();
            }
            Ok(vectors) => {
                tracing::warn!(
                    expected = chunk.len(),
                    received = vectors.len(),
                    "Embedding batch returned the wrong number of vectors, embedding rows individually"
                );
            }
            Err(e) if chunk.len() == 1 => return vec![Err(e)],
            Err(e) => {
                tracing::warn!(
                    size = chunk.len(),
                    "Embedding batch failed, embedding rows individually: {}",
                    e
                );
            }
        }

        let mut results = Vec::with_capacity(chunk.len());
        for text in chunk {
            results.push(self.embed_one(text).await);
        }
        results
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.call(self.provider.embed_text(text)).await?;
        self.check(vector)
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, EmbeddingError> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EmbeddingError::Service(format!("{:#}", e))),
            Err(_) => Err(EmbeddingError::Timeout(self.timeout)),
        }
    }

    fn check(&self, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if vector.len() != self.dimensions {
            return Err(EmbeddingError::Dimension {
                expected: self.dimensions,
                found: vector.len(),
            });
        }
        Ok(vector)
    }
}
