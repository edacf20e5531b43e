//! Deterministic embedding provider for tests and offline operation.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::provider::EmbeddingProvider;

/// Hash-seeded embedding generator.
///
/// Produces stable, normalized vectors from text content so similarity-based
/// behavior (cache hits, pattern merges, reranking) can be exercised without
/// a model. Identical texts embed identically; unrelated texts are close to
/// orthogonal in expectation.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() >= self.dimension {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to [-1, 1].
                values.push((f64::from(raw) / f64::from(u32::MAX) * 2.0 - 1.0) as f32);
            }
            counter += 1;
        }

        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::similarity::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embeddings_are_deterministic_and_normalized() {
        let provider = MockEmbedding::new(64);
        let a = provider.embed_text("NixOS keyring error").await.expect("embed");
        let b = provider.embed_text("NixOS keyring error").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_distinct_texts_are_not_identical() {
        let provider = MockEmbedding::new(64);
        let a = provider.embed_text("first text").await.expect("embed");
        let b = provider.embed_text("second text").await.expect("embed");
        assert!(cosine_similarity(&a, &b) < 0.99);
    }
}
