//! Embedding generation module
//!
//! Provides the semantic vectors attached to every Issue node for later
//! similarity retrieval.
//!
//! - `EmbeddingProvider` trait: async interface for embedding generation
//! - `HttpEmbeddingProvider`: any OpenAI-compatible `/v1/embeddings` API
//!   (OpenAI, Ollama, LiteLLM, vLLM, etc.)
//! - `MockEmbeddingProvider`: deterministic provider for tests and dry runs

pub mod mock;
pub mod provider;
pub mod traits;

pub use mock::MockEmbeddingProvider;
pub use provider::HttpEmbeddingProvider;
pub use traits::EmbeddingProvider;
