//! # Tool and Skill Registry
//!
//! Persistent tool catalog with two-tier progressive disclosure, curated
//! execution dispatch, authenticated skill import, and JSONL audit logging.
//! Audit failures never propagate to the caller.

mod audit;
mod federation;
mod skills;
mod tools;

pub use audit::{AuditLogger, AuditRecord};
pub use federation::{FederatedServer, FederationStore, FederationUpsert};
pub use skills::{SkillImportRequest, SkillRepository};
pub use tools::{ToolPayload, ToolRegistry};
