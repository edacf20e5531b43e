//! The service container wiring every component together.
//!
//! Process-wide state (breaker registry, rate limiter, caches, engines)
//! lives here and is passed by reference into handlers; there are no
//! module-level globals beyond configuration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use coordinator_core::cache::SemanticCache;
use coordinator_core::clients::{
    ChatModel, HttpVectorStore, InMemorySessionStore, InMemoryVectorStore, LlmClient,
    RedisSessionStore, SessionStore, VectorStore,
};
use coordinator_core::embeddings::{EmbeddingProvider, HttpEmbeddingService, MockEmbedding};
use coordinator_core::error::{Error, Result};
use coordinator_core::health::{DependencyCheck, HealthChecker};
use coordinator_core::learning::{LearningPipeline, ProposalSink};
use coordinator_core::pipeline::QueryPipeline;
use coordinator_core::ralph::{AgentBackend, IterationResult, RalphEngine};
use coordinator_core::registry::{AuditLogger, FederationStore, SkillRepository, ToolRegistry};
use coordinator_core::resilience::{BreakerConfig, BreakerRegistry, RetryPolicy, SlidingWindowLimiter};
use coordinator_core::session::MultiTurnSessionManager;
use coordinator_core::telemetry::{EventLog, Telemetry};
use coordinator_core::tracker::InteractionTracker;
use coordinator_core::types::{
    Collection, CoordinatorConfig, MODEL_QUEUE_MAX, MODEL_WAIT_TIMEOUT_SECS,
};

/// Supervisor seam for `/reload-model`.
#[async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Restart a managed service unit.
    async fn restart(&self, unit: &str) -> Result<()>;
}

/// `systemctl`-backed supervisor.
pub struct SystemctlSupervisor;

#[async_trait]
impl ServiceSupervisor for SystemctlSupervisor {
    async fn restart(&self, unit: &str) -> Result<()> {
        let output = tokio::process::Command::new("systemctl")
            .arg("restart")
            .arg(unit)
            .output()
            .await
            .map_err(|e| Error::Internal(format!("systemctl spawn: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Upstream {
                service: "systemd".to_string(),
                message: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }
}

/// Supervisor that only records the request (tests, unmanaged hosts).
#[derive(Default)]
pub struct NoopSupervisor {
    pub restarted: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceSupervisor for NoopSupervisor {
    async fn restart(&self, unit: &str) -> Result<()> {
        self.restarted.lock().push(unit.to_string());
        Ok(())
    }
}

/// Bounded wait queue used while the local model loads.
pub struct ModelLoadQueue {
    depth: AtomicUsize,
    max: usize,
}

impl ModelLoadQueue {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            max,
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Wait until the engine reports ready, up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoading`] on queue overflow or timeout, carrying
    /// the current queue depth.
    pub async fn wait_for_model(&self, llm: &LlmClient) -> Result<()> {
        let current = self.depth.fetch_add(1, Ordering::AcqRel);
        if current >= self.max {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::ModelLoading {
                queue_depth: current,
                queue_max: self.max,
            });
        }

        let result = self.poll_ready(llm).await;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        result
    }

    async fn poll_ready(&self, llm: &LlmClient) -> Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(MODEL_WAIT_TIMEOUT_SECS);
        loop {
            match llm.health().await {
                Ok(health) if health.is_ready() => return Ok(()),
                Ok(_) | Err(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ModelLoading {
                    queue_depth: self.depth(),
                    queue_max: self.max,
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// Rolling harness evaluation counters.
#[derive(Debug, Default)]
pub struct HarnessStats {
    inner: Mutex<HarnessCounters>,
}

#[derive(Debug, Default, Clone)]
struct HarnessCounters {
    total_evals: u64,
    passed: u64,
    total_latency_ms: u64,
}

impl HarnessStats {
    pub fn record(&self, passed: bool, latency_ms: u64) {
        let mut inner = self.inner.lock();
        inner.total_evals += 1;
        if passed {
            inner.passed += 1;
        }
        inner.total_latency_ms += latency_ms;
    }

    #[must_use]
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock().clone();
        json!({
            "total_evals": inner.total_evals,
            "passed": inner.passed,
            "pass_rate": if inner.total_evals == 0 { 0.0 } else { inner.passed as f64 / inner.total_evals as f64 },
            "avg_latency_ms": if inner.total_evals == 0 { 0.0 } else { inner.total_latency_ms as f64 / inner.total_evals as f64 },
        })
    }
}

/// Everything the handlers need, built once at startup.
pub struct AppState {
    pub config: CoordinatorConfig,
    pub telemetry: Arc<Telemetry>,
    pub breakers: Arc<BreakerRegistry>,
    pub cache: Arc<SemanticCache>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub health: Arc<HealthChecker>,
    pub vector: Arc<dyn VectorStore>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub chat: Option<Arc<dyn ChatModel>>,
    pub llm: Option<Arc<LlmClient>>,
    pub pipeline: Arc<QueryPipeline>,
    pub sessions: Arc<MultiTurnSessionManager>,
    pub tracker: Arc<InteractionTracker>,
    pub tools: Arc<ToolRegistry>,
    pub skills: Arc<SkillRepository>,
    pub federation: Arc<FederationStore>,
    pub audit: Arc<AuditLogger>,
    pub ralph: Arc<RalphEngine>,
    pub learning: Arc<LearningPipeline>,
    pub events: Arc<EventLog>,
    pub model_queue: Arc<ModelLoadQueue>,
    pub supervisor: Arc<dyn ServiceSupervisor>,
    pub harness: Arc<HarnessStats>,
}

impl AppState {
    /// Build the production container from configuration.
    ///
    /// External collaborators that cannot be reached at startup degrade to
    /// in-memory fallbacks; readiness reports them until they recover.
    pub async fn from_config(config: CoordinatorConfig) -> Result<Arc<Self>> {
        let telemetry = Arc::new(Telemetry::new(config.service_name.clone()));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        breakers.set_override("llama-cpp", BreakerConfig::inference());
        let retry = RetryPolicy::default();

        let llm = Arc::new(LlmClient::new(
            config.llama_cpp_url.clone(),
            config.embedding_dimension,
            breakers.get("llama-cpp"),
            retry.clone(),
        )?);
        let chat: Arc<dyn ChatModel> = Arc::clone(&llm) as Arc<dyn ChatModel>;

        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingService::new(
            config.embedding_service_url.clone(),
            config.embedding_dimension,
            breakers.get("ai-embeddings"),
            retry.clone(),
        )?);

        let vector: Arc<dyn VectorStore> = Arc::new(HttpVectorStore::new(
            config.qdrant_url.clone(),
            breakers.get("qdrant"),
            retry,
        )?);

        let sessions_store: Arc<dyn SessionStore> =
            match RedisSessionStore::connect(&config.redis_url).await {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    warn!(error = %err, "redis unreachable, sessions fall back to process memory");
                    Arc::new(InMemorySessionStore::new())
                }
            };

        Ok(Self::assemble(
            config,
            telemetry,
            breakers,
            vector,
            embeddings,
            Some(chat),
            Some(llm),
            sessions_store,
            Arc::new(SystemctlSupervisor),
        ))
    }

    /// Build a fully in-process container (tests, offline development).
    #[must_use]
    pub fn in_memory(config: CoordinatorConfig) -> Arc<Self> {
        let telemetry = Arc::new(Telemetry::new(config.service_name.clone()));
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let store = Arc::new(InMemoryVectorStore::new());
        store.create_collections(&[
            Collection::CodebaseContext.name(),
            Collection::SkillsPatterns.name(),
            Collection::ErrorSolutions.name(),
            Collection::BestPractices.name(),
            Collection::InteractionHistory.name(),
        ]);
        Self::assemble(
            config.clone(),
            telemetry,
            breakers,
            store,
            Arc::new(MockEmbedding::new(config.embedding_dimension)),
            None,
            None,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(NoopSupervisor::default()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        config: CoordinatorConfig,
        telemetry: Arc<Telemetry>,
        breakers: Arc<BreakerRegistry>,
        vector: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        chat: Option<Arc<dyn ChatModel>>,
        llm: Option<Arc<LlmClient>>,
        sessions_store: Arc<dyn SessionStore>,
        supervisor: Arc<dyn ServiceSupervisor>,
    ) -> Arc<Self> {
        let events = Arc::new(EventLog::new(
            config.data_root.join("telemetry").join("hybrid-events.jsonl"),
        ));

        let pipeline = Arc::new(QueryPipeline::new(
            Arc::clone(&vector),
            Arc::clone(&embeddings),
            chat.clone(),
            config.routing.clone(),
        ));

        let sessions = Arc::new(MultiTurnSessionManager::new(
            Arc::clone(&pipeline),
            sessions_store,
            chat.clone(),
            config.session.clone(),
        ));

        let tracker = match &chat {
            Some(chat) => Arc::new(InteractionTracker::new(
                Arc::clone(&vector),
                Arc::clone(&embeddings),
                Arc::clone(chat),
                Arc::clone(&events),
                &config.data_root,
            )),
            None => Arc::new(
                InteractionTracker::new(
                    Arc::clone(&vector),
                    Arc::clone(&embeddings),
                    Arc::new(UnavailableChat),
                    Arc::clone(&events),
                    &config.data_root,
                )
                .without_pattern_extraction(),
            ),
        };

        let ralph_events = Arc::new(EventLog::new(config.ralph.telemetry_path.clone()));
        let ralph = Arc::new(RalphEngine::new(
            config.ralph.clone(),
            Arc::new(UnconfiguredBackend),
            ralph_events,
        ));

        let learning = Arc::new(LearningPipeline::new(
            config.learning.clone(),
            Arc::clone(&vector),
            Arc::clone(&embeddings),
            Some(Arc::clone(&ralph) as Arc<dyn ProposalSink>),
        ));

        let health = Arc::new(HealthChecker::new(
            config.service_name.clone(),
            Arc::clone(&telemetry),
        ));
        health.set_breaker_registry(Arc::clone(&breakers), vec!["llama-cpp".to_string()]);
        Self::register_health_checks(&health, &vector, llm.as_ref());

        let tools = Arc::new(ToolRegistry::new(
            config.data_root.join("tool-cache.json"),
            config.api_key.clone(),
        ));
        let audit = Arc::new(AuditLogger::new(
            config.audit_log_path.clone(),
            config.service_name.clone(),
        ));

        Arc::new(Self {
            cache: Arc::new(SemanticCache::new(config.cache.clone())),
            limiter: Arc::new(SlidingWindowLimiter::new(config.rate_limit.clone())),
            model_queue: Arc::new(ModelLoadQueue::new(MODEL_QUEUE_MAX)),
            skills: Arc::new(SkillRepository::new()),
            federation: Arc::new(FederationStore::new(
                config.data_root.join("federation").join("servers.json"),
            )),
            harness: Arc::new(HarnessStats::default()),
            config,
            telemetry,
            breakers,
            health,
            vector,
            embeddings,
            chat,
            llm,
            pipeline,
            sessions,
            tracker,
            tools,
            audit,
            ralph,
            learning,
            events,
            supervisor,
        })
    }

    fn register_health_checks(
        health: &HealthChecker,
        vector: &Arc<dyn VectorStore>,
        llm: Option<&Arc<LlmClient>>,
    ) {
        let store = Arc::clone(vector);
        health.register_dependency_check(DependencyCheck::new("qdrant", true, move || {
            let store = Arc::clone(&store);
            async move { store.healthz().await.unwrap_or(false) }
        }));

        if let Some(llm) = llm {
            let llm = Arc::clone(llm);
            health.register_dependency_check(DependencyCheck::new("llama-cpp", false, move || {
                let llm = Arc::clone(&llm);
                async move { llm.health().await.map(|h| h.is_ready()).unwrap_or(false) }
            }));
        }

        let store = Arc::clone(vector);
        health.register_startup_check(DependencyCheck::new("collections", true, move || {
            let store = Arc::clone(&store);
            async move {
                match store.list_collections().await {
                    // Bootstrap provisions the fixed collections; an empty
                    // listing means provisioning has not run yet.
                    Ok(collections) => !collections.is_empty(),
                    Err(_) => false,
                }
            }
        }));
    }

    /// Spawn the background engines and return their join handles.
    pub fn spawn_background(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let ralph = Arc::clone(&self.ralph);
        handles.push(tokio::spawn(async move { ralph.run().await }));

        let learning = Arc::clone(&self.learning);
        handles.push(tokio::spawn(async move { learning.run().await }));

        info!("background engines started");
        handles
    }

    /// Graceful shutdown: stop engines, flush the tool cache.
    pub async fn shutdown(&self) {
        self.ralph.shutdown();
        self.learning.shutdown();
        if let Err(err) = self.tools.persist_cache().await {
            warn!(error = %err, "tool cache flush failed during shutdown");
        }
        info!("coordinator state shut down");
    }
}

/// Chat seam used when no local engine is configured.
struct UnavailableChat;

#[async_trait]
impl ChatModel for UnavailableChat {
    async fn chat(
        &self,
        _: &[coordinator_core::clients::ChatMessage],
        _: f32,
        _: u32,
    ) -> Result<String> {
        Err(Error::Upstream {
            service: "llama-cpp".to_string(),
            message: "no local model configured".to_string(),
        })
    }

    async fn complete(&self, _: &str, _: u32, _: f32, _: &[&str]) -> Result<String> {
        Err(Error::Upstream {
            service: "llama-cpp".to_string(),
            message: "no local model configured".to_string(),
        })
    }
}

/// Placeholder backend until an agent runner is wired in deployment.
struct UnconfiguredBackend;

#[async_trait]
impl AgentBackend for UnconfiguredBackend {
    async fn execute(
        &self,
        backend: &str,
        _prompt: &str,
        _context: &Value,
        _iteration: u32,
    ) -> Result<IterationResult> {
        Ok(IterationResult {
            exit_code: 1,
            output: String::new(),
            error: Some(format!("agent backend {backend} not configured")),
            completed: false,
        })
    }
}
