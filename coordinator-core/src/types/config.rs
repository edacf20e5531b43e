// ============================================================================
// Configuration
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::DEFAULT_EMBEDDING_DIMENSION;

/// Query-routing configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Top rerank score at or above which a query is answered locally.
    pub confidence_threshold: f32,
    /// When disabled, low-confidence queries return context only instead of
    /// escalating.
    pub escalation_enabled: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            escalation_enabled: true,
        }
    }
}

/// Semantic-cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime; expired entries are swept lazily.
    pub ttl: Duration,
    /// Minimum cosine similarity for a semantic hit.
    pub similarity_threshold: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600),
            similarity_threshold: 0.95,
        }
    }
}

/// Multi-turn session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session lifetime, refreshed on every access.
    pub ttl: Duration,
    /// Default token budget per turn when the request does not set one.
    pub default_max_tokens: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            default_max_tokens: 2_000,
        }
    }
}

/// Per-client request rate limiting over a sliding 60-second window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client per minute.
    pub rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpm: 60,
        }
    }
}

/// Ralph loop engine configuration.
#[derive(Debug, Clone)]
pub struct RalphConfig {
    /// Exit code that forces loop re-entry regardless of output.
    pub exit_code_block: i32,
    /// Whether adaptive iteration budgets are computed from history.
    pub adaptive_enabled: bool,
    /// Budget used when adaptive calculation is disabled.
    pub default_iterations: u32,
    pub min_iterations: u32,
    pub max_iterations_cap: u32,
    /// How long an approval gate waits before rejecting.
    pub approval_timeout: Duration,
    /// Poll interval while waiting for approval.
    pub approval_poll: Duration,
    /// Whether recovery hooks run after a blocked exit code.
    pub context_recovery: bool,
    /// Append-only JSONL event stream consumed by the learning pipeline.
    pub telemetry_path: PathBuf,
}

impl RalphConfig {
    /// Build a config rooted at a data directory.
    #[must_use]
    pub fn with_data_root(data_root: &Path) -> Self {
        Self {
            telemetry_path: data_root.join("telemetry").join("ralph-events.jsonl"),
            ..Self::default()
        }
    }
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            exit_code_block: 2,
            adaptive_enabled: true,
            default_iterations: 10,
            min_iterations: 1,
            max_iterations_cap: 100,
            approval_timeout: Duration::from_secs(300),
            approval_poll: Duration::from_secs(1),
            context_recovery: true,
            telemetry_path: PathBuf::from("telemetry/ralph-events.jsonl"),
        }
    }
}

/// Continuous-learning pipeline configuration.
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Append-only telemetry streams tailed by the pipeline, one per source
    /// service.
    pub telemetry_paths: Vec<PathBuf>,
    pub checkpoint_dir: PathBuf,
    pub dataset_path: PathBuf,
    pub stats_path: PathBuf,
    pub proposals_path: PathBuf,
    /// Checkpoint every N processed events.
    pub checkpoint_interval: u64,
    /// Pause processing when unprocessed telemetry exceeds this size.
    pub backpressure_threshold_mb: u64,
    /// Sleep between successful processing cycles.
    pub process_interval: Duration,
    /// Sleep after a failed cycle or while paused for backpressure.
    pub error_backoff: Duration,
    pub proposals_enabled: bool,
    pub proposal_submission_enabled: bool,
    /// Cap on new proposals per batch.
    pub proposal_batch_limit: usize,
}

impl LearningConfig {
    /// Build a config rooted at a data directory.
    #[must_use]
    pub fn with_data_root(data_root: &Path) -> Self {
        let telemetry = data_root.join("telemetry");
        Self {
            telemetry_paths: vec![
                telemetry.join("ralph-events.jsonl"),
                telemetry.join("aidb-events.jsonl"),
                telemetry.join("hybrid-events.jsonl"),
            ],
            checkpoint_dir: data_root.join("checkpoints"),
            dataset_path: data_root.join("fine-tuning").join("dataset.jsonl"),
            stats_path: telemetry.join("continuous_learning_stats.json"),
            proposals_path: telemetry.join("optimization_proposals.jsonl"),
            ..Self::default()
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            telemetry_paths: Vec::new(),
            checkpoint_dir: PathBuf::from("checkpoints"),
            dataset_path: PathBuf::from("fine-tuning/dataset.jsonl"),
            stats_path: PathBuf::from("telemetry/continuous_learning_stats.json"),
            proposals_path: PathBuf::from("telemetry/optimization_proposals.jsonl"),
            checkpoint_interval: 100,
            backpressure_threshold_mb: 100,
            process_interval: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(300),
            proposals_enabled: true,
            proposal_submission_enabled: true,
            proposal_batch_limit: 5,
        }
    }
}

/// Top-level configuration for the coordination plane.
///
/// Endpoints are discovered from environment variables; API keys are read
/// from the environment or from secret files (`*_API_KEY_FILE` takes
/// precedence when both are set).
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub service_name: String,
    pub llama_cpp_url: String,
    pub embedding_service_url: String,
    pub qdrant_url: String,
    pub redis_url: String,
    pub ralph_url: String,
    pub api_key: Option<String>,
    pub embedding_dimension: usize,
    pub data_root: PathBuf,
    pub audit_log_path: PathBuf,
    pub routing: RoutingConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub ralph: RalphConfig,
    pub learning: LearningConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let data_root = PathBuf::from(".local/share/ai-stack/hybrid");
        Self {
            service_name: "hybrid-coordinator".to_string(),
            llama_cpp_url: "http://localhost:8080".to_string(),
            embedding_service_url: "http://localhost:8081".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            ralph_url: "http://localhost:8004".to_string(),
            api_key: None,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            ralph: RalphConfig::with_data_root(&data_root),
            learning: LearningConfig::with_data_root(&data_root),
            audit_log_path: PathBuf::from("/var/log/nixos-ai-stack/tool-audit.jsonl"),
            data_root,
            routing: RoutingConfig::default(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let data_root = env_var("DATA_DIR")
            .map_or_else(|| CoordinatorConfig::default().data_root, PathBuf::from);

        let mut routing = RoutingConfig::default();
        if let Some(threshold) = env_parse::<f32>("ROUTING_CONFIDENCE_THRESHOLD") {
            routing.confidence_threshold = threshold;
        }

        let mut rate_limit = RateLimitConfig::default();
        if let Some(rpm) = env_parse::<u32>("RATE_LIMIT_RPM") {
            rate_limit.rpm = rpm;
        }

        let mut learning = LearningConfig::with_data_root(&data_root);
        if let Some(mb) = env_parse::<u64>("BACKPRESSURE_THRESHOLD_MB") {
            learning.backpressure_threshold_mb = mb;
        }

        Self {
            service_name: env_or("SERVICE_NAME", "hybrid-coordinator"),
            llama_cpp_url: env_or("LLAMA_CPP_URL", "http://localhost:8080"),
            embedding_service_url: env_or("EMBEDDING_SERVICE_URL", "http://localhost:8081"),
            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379"),
            ralph_url: env_or("RALPH_URL", "http://localhost:8004"),
            api_key: resolve_secret("API_KEY"),
            embedding_dimension: env_parse("EMBEDDING_DIMENSIONS")
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSION),
            audit_log_path: env_var("TOOL_AUDIT_LOG_PATH").map_or_else(
                || PathBuf::from("/var/log/nixos-ai-stack/tool-audit.jsonl"),
                PathBuf::from,
            ),
            ralph: RalphConfig::with_data_root(&data_root),
            learning,
            data_root,
            routing,
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
            rate_limit,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

/// Resolve an API key from `<NAME>_FILE` (preferred) or `<NAME>`.
fn resolve_secret(name: &str) -> Option<String> {
    if let Some(path) = env_var(&format!("{name}_FILE")) {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    env_var(name)
}
