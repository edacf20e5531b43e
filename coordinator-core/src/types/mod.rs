//! Common types shared across the coordination plane.
//!
//! The data model follows the layout of the plane's collections: interactions
//! and context items live in the vector store, sessions in the KV cache, Ralph
//! tasks in engine memory, and proposals/feedback in append-only logs.

mod config;
mod constants;
mod enums;
mod structs;

#[cfg(test)]
mod tests;

pub use config::{
    CacheConfig, CoordinatorConfig, LearningConfig, RalphConfig, RateLimitConfig, RoutingConfig,
    SessionConfig,
};
pub use constants::*;
pub use enums::{
    AgentClass, CacheHitKind, Collection, CompletionReason, ContextLevel, DetailLevel,
    DisclosureMode, ExpansionStrategy, IterationMode, Outcome, ProposalStatus, ProposalType,
    SkillStatus, TaskStatus,
};
pub use structs::{
    CacheEntry, ContextItem, FeedbackRecord, Interaction, Issue, Pattern, Proposal, QueryGap,
    SessionState, SkillRecord, ToolDefinition, UsageCounters,
};
