//! EmbeddingProvider trait definition
//!
//! Async trait + Send + Sync, shared across the pipeline as
//! `Arc<dyn EmbeddingProvider>`, following the same pattern as `GraphStore`.

use anyhow::Result;
use async_trait::async_trait;

/// Abstract interface for generating vector embeddings from text.
///
/// # Implementations
///
/// - [`HttpEmbeddingProvider`](super::HttpEmbeddingProvider): HTTP client for any
///   OpenAI-compatible `/v1/embeddings` endpoint
/// - [`MockEmbeddingProvider`](super::MockEmbeddingProvider): deterministic
///   hash-derived vectors, no network
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a vector embedding for a single text input.
    ///
    /// Returns a vector of `f32` with length equal to [`dimensions()`](Self::dimensions).
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate vector embeddings for multiple texts in a single call.
    ///
    /// Returns one embedding per input text, in the same order. A failure
    /// fails the whole batch; callers that need per-text isolation fall back
    /// to [`embed_text`](Self::embed_text).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the vectors produced by this provider.
    ///
    /// Must match the `Issue.embedding` vector index configuration.
    fn dimensions(&self) -> usize;

    /// The name of the embedding model being used.
    fn model_name(&self) -> &str;
}
