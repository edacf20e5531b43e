//! HTTP client for the dedicated embeddings service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::resilience::{CircuitBreaker, RetryPolicy};

use super::provider::EmbeddingProvider;

/// Client for the embeddings service (`POST /embed` with `{"inputs": [..]}`).
///
/// Every call traverses the retry policy wrapped around the service breaker.
pub struct HttpEmbeddingService {
    base_url: String,
    model_name: String,
    dimension: usize,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl HttpEmbeddingService {
    /// Create a client against the embeddings service.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        dimension: usize,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Configuration(format!("embeddings client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            model_name: "ai-embeddings".to_string(),
            dimension,
            client,
            breaker,
            retry,
        })
    }

    async fn post_embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "inputs": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Upstream {
                service: "ai-embeddings".to_string(),
                message: format!("embed returned {}", response.status()),
            });
        }

        let embeddings: Vec<Vec<f32>> = response.json().await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Upstream {
                service: "ai-embeddings".to_string(),
                message: format!(
                    "embeddings response length {} does not match input {}",
                    embeddings.len(),
                    texts.len()
                ),
            });
        }
        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(Error::Validation(format!(
                    "embedding dimension {} does not match configured {}",
                    embedding.len(),
                    self.dimension
                )));
            }
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingService {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| Error::Internal("empty embedding batch".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry
            .execute(|| self.breaker.call(|| self.post_embed(texts)))
            .await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
