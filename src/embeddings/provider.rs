//! HTTP embedding provider implementation
//!
//! Implements `EmbeddingProvider` using any OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! Supported providers:
//! - **OpenAI** (default): `https://api.openai.com/v1/embeddings` with `text-embedding-ada-002`
//! - **Ollama**: `http://localhost:11434/v1/embeddings` with `nomic-embed-text`
//! - **LiteLLM / vLLM / any OpenAI-compatible**: just set the URL
//!
//! Configured through [`EmbeddingConfig`] (YAML `embedding:` section or the
//! `EMBEDDING_*` environment variables, see [`Config`](crate::Config)).

use super::traits::EmbeddingProvider;
use crate::EmbeddingConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP-based embedding provider using the OpenAI `/v1/embeddings` API format.
///
/// Thread-safe and cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

/// OpenAI-compatible embedding request
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

/// OpenAI-compatible embedding response
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI-compatible error response
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl HttpEmbeddingProvider {
    /// Create a new HTTP embedding provider with explicit configuration.
    ///
    /// `timeout` bounds every request; an expired request surfaces as an error
    /// instead of hanging the ingestion run.
    pub fn new(
        url: String,
        model: String,
        api_key: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            model,
            api_key,
            dimensions,
        })
    }

    /// Create a provider from the `embedding:` configuration section.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.url.clone(),
            config.model.clone(),
            config.api_key.clone().filter(|k| !k.is_empty()),
            config.dimensions,
            config.timeout(),
        )
    }

    /// Send an embedding request and parse the response.
    async fn request_embeddings(
        &self,
        input: EmbeddingInput<'_>,
        expected: usize,
    ) -> Result<Vec<Vec<f32>>> {
        let request_body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut req = self.client.post(&self.url).json(&request_body);

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Failed to connect to embedding API at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Try to parse OpenAI-style error
            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
                if let Some(detail) = err.error {
                    anyhow::bail!(
                        "Embedding API error ({}): {}",
                        status.as_u16(),
                        detail.message
                    );
                }
            }
            anyhow::bail!("Embedding API returned {}: {}", status.as_u16(), body);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding API response")?;

        // Sort by index to ensure correct ordering
        let mut data = resp.data;
        data.sort_by_key(|d| d.index);

        if data.len() != expected {
            anyhow::bail!(
                "Embedding API returned {} vectors for {} inputs",
                data.len(),
                expected
            );
        }

        // Vector length is checked by `EmbeddingAttacher`
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .request_embeddings(EmbeddingInput::Single(text), 1)
            .await?;

        embeddings
            .into_iter()
            .next()
            .context("Embedding API returned empty response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request_embeddings(EmbeddingInput::Batch(texts), texts.len())
            .await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
