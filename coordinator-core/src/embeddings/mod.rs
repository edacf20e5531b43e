//! # Embeddings
//!
//! The [`EmbeddingProvider`] trait abstracts over embedding backends: the
//! dedicated embeddings service, the local LLM's `/v1/embeddings` endpoint,
//! and a deterministic mock for tests. Similarity math lives alongside.

mod mock;
mod provider;
mod service;
pub mod similarity;

pub use mock::MockEmbedding;
pub use provider::EmbeddingProvider;
pub use service::HttpEmbeddingService;
