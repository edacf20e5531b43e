// ============================================================================
// Core Data Structures
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::constants::{PATTERN_VALUE_EMA_ALPHA, SUCCESS_RATE_EMA_ALPHA};
use super::enums::{
    AgentClass, Collection, Outcome, ProposalStatus, ProposalType, SkillStatus,
};

/// A recorded query/response exchange, the plane's core entity.
///
/// Created by the coordinator when a query completes; mutated only by outcome
/// and feedback updates. High-value interactions are promoted to the pattern
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub query: String,
    pub response: String,
    pub agent_type: AgentClass,
    pub model_used: String,
    /// Ordered ids of the context items injected into the prompt.
    pub context_provided: Vec<String>,
    pub outcome: Outcome,
    /// User feedback scalar in {-1, 0, +1}.
    pub user_feedback: i8,
    pub tokens_used: u32,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
    /// Computed value score in [0, 1].
    pub value_score: f32,
}

impl Interaction {
    /// Create a freshly tracked interaction with an unknown outcome.
    #[must_use]
    pub fn new(
        query: String,
        response: String,
        agent_type: AgentClass,
        model_used: String,
        context_provided: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            query,
            response,
            agent_type,
            model_used,
            context_provided,
            outcome: Outcome::Unknown,
            user_feedback: 0,
            tokens_used: 0,
            latency_ms: 0,
            created_at: Utc::now(),
            value_score: 0.0,
        }
    }
}

/// Usage accounting carried by every context item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageCounters {
    pub access_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Exponential moving average of observed successes.
    pub success_rate: f32,
}

impl UsageCounters {
    /// Record one access with the given outcome.
    ///
    /// The success rate follows `r' = 0.9 * r + 0.1 * s`.
    pub fn record(&mut self, success: bool) {
        self.access_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let observed = if success { 1.0 } else { 0.0 };
        self.success_rate =
            self.success_rate * (1.0 - SUCCESS_RATE_EMA_ALPHA) + observed * SUCCESS_RATE_EMA_ALPHA;
    }
}

/// A retrieval hit stored in one of the fixed collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub collection: Collection,
    pub content: String,
    /// Typed payload; shape depends on the collection (e.g. error-solutions
    /// carry `error_pattern`/`solution`/`confidence_score`).
    pub payload: Value,
    #[serde(default)]
    pub usage: UsageCounters,
    pub last_accessed: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

/// Generalized knowledge extracted from a high-value interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub problem_type: String,
    pub solution_approach: String,
    pub skills_used: Vec<String>,
    pub generalizable_pattern: String,
    /// At least one example is required for a pattern to be stored.
    pub success_examples: Vec<String>,
    #[serde(default)]
    pub failure_examples: Vec<String>,
    pub value_score: f32,
    pub last_updated: DateTime<Utc>,
    /// One-way pointers to representative interactions. Interactions never
    /// point back at patterns.
    #[serde(default)]
    pub source_interaction_ids: Vec<Uuid>,
}

impl Pattern {
    /// Fold a newly extracted pattern into this one.
    ///
    /// Appends the incoming success example and moves the value score by an
    /// EMA step instead of duplicating the record.
    pub fn merge_from(&mut self, incoming: &Pattern) {
        if let Some(example) = incoming.success_examples.first() {
            self.success_examples.push(example.clone());
        }
        self.value_score = self.value_score * (1.0 - PATTERN_VALUE_EMA_ALPHA)
            + incoming.value_score * PATTERN_VALUE_EMA_ALPHA;
        self.last_updated = incoming.last_updated;
        for id in &incoming.source_interaction_ids {
            if !self.source_interaction_ids.contains(id) {
                self.source_interaction_ids.push(*id);
            }
        }
    }
}

/// Multi-turn conversation state, held in the KV cache under a TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub queries: Vec<String>,
    /// Append-only list of context item ids already sent this session.
    #[serde(default)]
    pub context_item_ids_sent: Vec<String>,
    #[serde(default)]
    pub total_tokens_sent: u32,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub metadata: Value,
}

impl SessionState {
    /// Create a fresh session.
    #[must_use]
    pub fn new(session_id: String, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_accessed: now,
            queries: Vec::new(),
            context_item_ids_sent: Vec::new(),
            total_tokens_sent: 0,
            turn_count: 0,
            metadata,
        }
    }
}

/// A telemetry-derived optimization suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub proposal_type: ProposalType,
    pub title: String,
    pub rationale: String,
    pub recommended_action: String,
    pub evidence: Value,
    #[serde(default)]
    pub status: ProposalStatus,
    #[serde(default = "default_true")]
    pub approval_required: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub submitted_as_task: bool,
}

fn default_true() -> bool {
    true
}

impl Proposal {
    /// Stable hash over `(type, title, recommended_action)` for dedup.
    #[must_use]
    pub fn dedup_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let content = format!(
            "{}:{}:{}",
            self.proposal_type.as_str(),
            self.title,
            self.recommended_action
        );
        let digest = Sha256::digest(content.as_bytes());
        format!("{digest:x}")
    }
}

/// Correction-style or rating-style user feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: Uuid,
    pub interaction_id: Option<String>,
    pub query: String,
    /// Rating in {-1, 0, +1}.
    pub rating: i8,
    #[serde(default)]
    pub note: String,
    pub correction: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub model: Option<String>,
    pub variant: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Error-taxonomy record, deduplicated by normalized error hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub severity: String,
    pub category: String,
    pub component: String,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Hash over the error message with timestamps, UUIDs, and integers
    /// scrubbed, so recurring errors collapse to one record.
    pub error_hash: String,
    #[serde(default)]
    pub suggested_fixes: Vec<String>,
    #[serde(default)]
    pub system_changes_needed: Vec<String>,
    pub status: String,
}

impl Issue {
    /// Normalize an error message and hash it for deduplication.
    #[must_use]
    pub fn hash_error(message: &str) -> String {
        use sha2::{Digest, Sha256};
        let normalized = normalize_error_message(message);
        let digest = Sha256::digest(normalized.as_bytes());
        format!("{digest:x}")
    }
}

/// Scrub volatile fragments (timestamps, UUIDs, bare integers) from an error
/// message so textual noise does not defeat deduplication.
#[allow(clippy::unwrap_used)] // patterns are literals, validated by tests
fn normalize_error_message(message: &str) -> String {
    static SCRUBBERS: std::sync::OnceLock<[regex::Regex; 3]> = std::sync::OnceLock::new();
    let scrubbers = SCRUBBERS.get_or_init(|| {
        [
            regex::Regex::new(
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?",
            )
            .unwrap(),
            regex::Regex::new(
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
            )
            .unwrap(),
            regex::Regex::new(r"\b\d+\b").unwrap(),
        ]
    });
    let mut out = message.to_lowercase();
    for scrubber in scrubbers {
        out = scrubber.replace_all(&out, "<*>").into_owned();
    }
    out.trim().to_string()
}

/// Semantic-cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    pub query_hash: String,
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    pub response: String,
    pub llm_used: String,
    pub tokens_saved: u32,
    pub hit_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_hit_at: Option<DateTime<Utc>>,
}

/// Low-confidence query recorded for later knowledge-gap mining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryGap {
    pub query_hash: String,
    pub query_text: String,
    pub score: f32,
    pub collection: String,
}

/// An imported skill document parsed from markdown front-matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: Value,
    pub source_url: Option<String>,
    pub managed_by: String,
    #[serde(default)]
    pub status: SkillStatus,
    pub updated_at: DateTime<Utc>,
}

/// A tool manifest held in the registry catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub manifest: Value,
    #[serde(default = "default_cost_estimate")]
    pub cost_estimate_tokens: u32,
}

fn default_cost_estimate() -> u32 {
    2_000
}
