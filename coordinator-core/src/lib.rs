#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::float_cmp)]

//! # Coordinator Core
//!
//! Coordination, resilience, and learning substrate for the hybrid AI plane.
//!
//! The plane fronts a local LLM inference engine and a vector store, adds
//! retrieval-augmented generation, protects every external call with
//! resilience primitives, and learns from every interaction to improve
//! future answers.
//!
//! ## Core Concepts
//!
//! - **Interactions**: recorded query/response exchanges, scored for value
//! - **Patterns**: generalized knowledge extracted from high-value
//!   interactions and merged into a retrieval catalog
//! - **Sessions**: multi-turn conversation state with cross-turn context
//!   deduplication
//! - **Ralph tasks**: re-entrant agent loops with adaptive iteration budgets
//! - **Proposals**: telemetry-derived optimization suggestions
//!
//! ## Module Organization
//!
//! ### Primary APIs
//! - [`pipeline`]: query expansion, hybrid search, reranking, routing
//! - [`session`]: multi-turn progressive context disclosure
//! - [`tracker`]: interaction recording, value scoring, pattern promotion
//! - [`ralph`]: the autonomous loop engine
//! - [`learning`]: the checkpointed telemetry-learning pipeline
//!
//! ### Support Modules
//! - [`resilience`]: circuit breakers, retry-with-backoff, rate limiting
//! - [`cache`]: the semantic response cache
//! - [`health`]: liveness/readiness/startup/dependency/performance probes
//! - [`clients`]: outbound LLM, vector-store, and KV clients
//! - [`embeddings`]: embedding providers and similarity math
//! - [`registry`]: tool catalog, skill import, audit logging
//! - [`telemetry`]: metrics and the JSONL event log
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use coordinator_core::clients::{InMemoryVectorStore, VectorStore};
//! use coordinator_core::embeddings::{EmbeddingProvider, MockEmbedding};
//! use coordinator_core::pipeline::QueryPipeline;
//! use coordinator_core::types::RoutingConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> coordinator_core::Result<()> {
//! let vector = Arc::new(InMemoryVectorStore::new());
//! let embeddings = Arc::new(MockEmbedding::new(384));
//!
//! let pipeline = QueryPipeline::new(
//!     vector as Arc<dyn VectorStore>,
//!     embeddings as Arc<dyn EmbeddingProvider>,
//!     None,
//!     RoutingConfig::default(),
//! );
//!
//! let outcome = pipeline
//!     .route("How to fix GNOME keyring error?", true, false, 5, 0.7, 2_000)
//!     .await?;
//! println!("confidence {:.2}, llm {}", outcome.confidence, outcome.llm_used);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod clients;
pub mod embeddings;
pub mod error;
pub mod health;
pub mod learning;
pub mod pipeline;
pub mod ralph;
pub mod registry;
pub mod resilience;
pub mod session;
pub mod telemetry;
pub mod tracker;
pub mod types;

pub use error::{Error, Result};
pub use types::CoordinatorConfig;
