// ============================================================================
// Enumerations
// ============================================================================

use serde::{Deserialize, Serialize};

/// Logical collection in the vector store.
///
/// The plane operates over a fixed set of collections; free-form collection
/// names are rejected at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collection {
    CodebaseContext,
    SkillsPatterns,
    ErrorSolutions,
    BestPractices,
    InteractionHistory,
}

impl Collection {
    /// All collections, in disclosure order.
    pub const ALL: [Collection; 5] = [
        Collection::ErrorSolutions,
        Collection::BestPractices,
        Collection::CodebaseContext,
        Collection::SkillsPatterns,
        Collection::InteractionHistory,
    ];

    /// Wire name of the collection.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Collection::CodebaseContext => "codebase-context",
            Collection::SkillsPatterns => "skills-patterns",
            Collection::ErrorSolutions => "error-solutions",
            Collection::BestPractices => "best-practices",
            Collection::InteractionHistory => "interaction-history",
        }
    }

    /// Parse a wire name back into a collection tag.
    #[must_use]
    pub fn parse(name: &str) -> Option<Collection> {
        Collection::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a completed interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Partial,
    Failure,
    #[default]
    Unknown,
}

/// Class of the agent issuing a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    Local,
    #[default]
    Remote,
}

/// How a semantic-cache lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheHitKind {
    /// Query text matched byte-for-byte.
    Exact,
    /// Query embedding cleared the similarity threshold.
    Semantic,
}

/// Lifecycle status of a Ralph task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Rejected,
    Stopped,
    Failed,
}

impl TaskStatus {
    /// Whether the task can still advance.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

/// How the iteration budget for a Ralph task was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IterationMode {
    #[default]
    Adaptive,
    Infinite,
    Fixed,
}

/// Why a Ralph task reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Success,
    MaxIterations,
}

/// Progressive-disclosure depth for multi-turn context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextLevel {
    #[default]
    Standard,
    Detailed,
    Comprehensive,
}

/// How much of each context hit is rendered during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Concise,
    Full,
    Verbose,
}

/// Tool-catalog disclosure tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisclosureMode {
    /// Names and descriptions only; public.
    #[default]
    Minimal,
    /// Entire manifests; requires a valid API key when one is configured.
    Full,
}

/// Query-expansion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionStrategy {
    /// Synonym and domain maps; no model call.
    #[default]
    Keyword,
    /// 2-3 paraphrases generated by the local LLM.
    Llm,
}

/// Category of a generated optimization proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    IterationLimitIncrease,
    DependencyCheckAddition,
    TimeoutAdjustment,
}

impl ProposalType {
    /// Stable string form used in proposal hashes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalType::IterationLimitIncrease => "iteration_limit_increase",
            ProposalType::DependencyCheckAddition => "dependency_check_addition",
            ProposalType::TimeoutAdjustment => "timeout_adjustment",
        }
    }
}

/// Lifecycle status of an optimization proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Applied,
    Rejected,
}

/// Lifecycle status of an imported skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    /// Awaiting operator approval.
    #[default]
    Pending,
    Approved,
    Rejected,
}
