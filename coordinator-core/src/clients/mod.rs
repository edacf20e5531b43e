//! # Outbound Clients
//!
//! HTTP clients for the external collaborators: the local LLM engine
//! (OpenAI-compatible), the vector store (REST), and the session KV cache.
//! Every network call traverses retry-with-backoff wrapped around the
//! service's circuit breaker.

mod kv;
mod llm;
mod vector;

pub use kv::{InMemorySessionStore, RedisSessionStore, SessionStore};
pub use llm::{ChatMessage, ChatModel, LlmClient, LlmHealth};
pub use vector::{HttpVectorStore, InMemoryVectorStore, PointRecord, SearchHit, VectorStore};
