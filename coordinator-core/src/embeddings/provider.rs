//! Embedding provider trait.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for embedding providers that convert text to vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in batch.
    ///
    /// Default implementation calls [`EmbeddingProvider::embed_text`] per
    /// text; backends with a batch endpoint override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    /// Embedding dimension produced by this provider.
    fn dimension(&self) -> usize;

    /// Model name or identifier.
    fn model_name(&self) -> &str;
}
