// ============================================================================
// Validation Constants
// ============================================================================

/// Maximum size for stored context content (1 MB).
///
/// Prevents storage bloat and memory exhaustion from unbounded payloads.
pub const MAX_CONTENT_SIZE: usize = 1_000_000;

/// Maximum size for imported skill documents (100 KB).
pub const MAX_SKILL_SIZE: usize = 100_000;

/// Maximum note length accepted on simple feedback.
pub const MAX_FEEDBACK_NOTE_LEN: usize = 1_000;

/// Maximum query length persisted with feedback records.
pub const MAX_FEEDBACK_QUERY_LEN: usize = 500;

// ============================================================================
// Scoring Constants
// ============================================================================

/// Interactions at or above this value score are promoted to the pattern
/// catalog.
pub const HIGH_VALUE_THRESHOLD: f32 = 0.7;

/// Cosine similarity at or above which an extracted pattern is merged into
/// an existing one instead of inserted.
pub const PATTERN_MERGE_THRESHOLD: f32 = 0.9;

/// EMA weight applied to the incoming observation when updating a context
/// item's success rate: `r' = 0.9 * r + 0.1 * s`.
pub const SUCCESS_RATE_EMA_ALPHA: f32 = 0.1;

/// EMA weight applied to the incoming value score when merging patterns:
/// `v' = 0.8 * v_old + 0.2 * v_new`.
pub const PATTERN_VALUE_EMA_ALPHA: f32 = 0.2;

/// Placeholder novelty factor until similarity-derived novelty is wired.
pub const NOVELTY_PLACEHOLDER: f32 = 0.5;

// ============================================================================
// Pipeline Constants
// ============================================================================

/// Rough token estimate per whitespace-separated word.
pub const TOKENS_PER_WORD: f32 = 1.3;

/// MMR diversity weight used during reranking.
pub const MMR_DIVERSITY_WEIGHT: f32 = 0.3;

/// Default embedding dimension when not configured.
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

// ============================================================================
// Model-loading Queue
// ============================================================================

/// Maximum seconds a request waits for the local model to finish loading.
pub const MODEL_WAIT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of requests queued while the local model loads.
pub const MODEL_QUEUE_MAX: usize = 32;
