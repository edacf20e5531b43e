//! Client for the local LLM engine (OpenAI-compatible surface).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::resilience::{CircuitBreaker, RetryPolicy};

const SERVICE: &str = "llama-cpp";

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Health snapshot of the local engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmHealth {
    pub status: String,
    #[serde(default)]
    pub model_loaded: bool,
}

impl LlmHealth {
    /// Whether the engine reported it is still loading the model.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == "loading"
    }

    /// Whether the engine is ready to serve.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == "ok"
    }
}

/// Chat-capable model seam.
///
/// Pattern extraction, query expansion, and suggestion generation only need
/// a chat/completion call; the trait keeps them testable without a running
/// engine.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Chat completion returning the assistant message content.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    /// Plain text completion.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[&str],
    ) -> Result<String>;
}

/// OpenAI-compatible client for the local inference engine.
pub struct LlmClient {
    base_url: String,
    model_name: String,
    embedding_dimension: usize,
    client: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl LlmClient {
    /// Create a client against the local engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        embedding_dimension: usize,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Configuration(format!("llm client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            model_name: "local".to_string(),
            embedding_dimension,
            client,
            breaker,
            retry,
        })
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(Error::Upstream {
                service: SERVICE.to_string(),
                message: format!("{path} returned {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }

    /// Chat completion via `/v1/chat/completions`.
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = json!({
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        let result = self
            .retry
            .execute(|| {
                self.breaker
                    .call(|| self.post_json("/v1/chat/completions", body.clone()))
            })
            .await?;
        result["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Upstream {
                service: SERVICE.to_string(),
                message: "chat completion missing content".to_string(),
            })
    }

    /// Text completion via `/v1/completions`.
    pub async fn completion(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[&str],
    ) -> Result<String> {
        let body = json!({
            "prompt": prompt,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "stop": stop,
        });
        let result = self
            .retry
            .execute(|| {
                self.breaker
                    .call(|| self.post_json("/v1/completions", body.clone()))
            })
            .await?;
        result["choices"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Upstream {
                service: SERVICE.to_string(),
                message: "completion missing text".to_string(),
            })
    }

    /// Probe `/health`; `status=loading` means the model is not ready yet.
    ///
    /// Deliberately unprotected: health probes must observe the engine even
    /// while its breaker is open.
    pub async fn health(&self) -> Result<LlmHealth> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Upstream {
                service: SERVICE.to_string(),
                message: format!("health returned {}", response.status()),
            });
        }
        let body: serde_json::Value = response.json().await?;
        let status = body["status"].as_str().unwrap_or("unknown").to_string();
        let model_loaded = body["model_loaded"]
            .as_bool()
            .or_else(|| body["checkpoint_loaded"].as_bool())
            .unwrap_or(false);
        Ok(LlmHealth {
            status,
            model_loaded,
        })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        self.chat_completion(messages, temperature, max_tokens).await
    }

    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        stop: &[&str],
    ) -> Result<String> {
        self.completion(prompt, max_tokens, temperature, stop).await
    }
}

#[async_trait]
impl EmbeddingProvider for LlmClient {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "input": text });
        let result = self
            .retry
            .execute(|| {
                self.breaker
                    .call(|| self.post_json("/v1/embeddings", body.clone()))
            })
            .await?;
        let embedding: Vec<f32> = result["data"][0]["embedding"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(serde_json::Value::as_f64)
                    .map(|v| v as f32)
                    .collect()
            })
            .ok_or_else(|| Error::Upstream {
                service: SERVICE.to_string(),
                message: "embeddings response missing data".to_string(),
            })?;
        if embedding.len() != self.embedding_dimension {
            return Err(Error::Validation(format!(
                "embedding dimension {} does not match configured {}",
                embedding.len(),
                self.embedding_dimension
            )));
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
