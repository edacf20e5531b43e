//! # Ralph Loop Engine
//!
//! A re-entrant task engine that keeps a chosen backend agent iterating on a
//! goal until completion or limit. Iteration outcomes are encoded as exit
//! codes plus a completion predicate; hooks are structured callbacks. The
//! engine is deliberately sequential: one task advances at a time so side
//! effects stay serializable.

mod adaptive;
mod engine;
mod types;

pub use adaptive::{
    analyze_prompt_complexity, calculate_adaptive_limit, extract_task_type, history_adjustment,
    Complexity,
};
pub use engine::{EngineStats, RalphEngine};
pub use types::{
    AgentBackend, HistoryRecord, HookKind, IterationRecord, IterationResult, LoopHook, RalphTask,
};
