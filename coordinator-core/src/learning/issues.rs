//! Error-taxonomy issue log with hash deduplication.
//!
//! Recurring errors observed in telemetry collapse into one issue record per
//! normalized error hash; repeats bump the occurrence count and last-seen
//! timestamp instead of creating new records.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::Issue;

/// In-memory issue catalog keyed by normalized error hash.
#[derive(Debug, Default)]
pub struct IssueLog {
    issues: Mutex<HashMap<String, Issue>>,
}

impl IssueLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error observation, deduplicating by normalized hash.
    ///
    /// Returns the issue id and whether the observation created a new issue.
    pub fn record(
        &self,
        severity: &str,
        category: &str,
        component: &str,
        message: &str,
    ) -> (Uuid, bool) {
        let hash = Issue::hash_error(message);
        let now = Utc::now();
        let mut issues = self.issues.lock();

        if let Some(existing) = issues.get_mut(&hash) {
            existing.occurrence_count += 1;
            existing.last_seen = now;
            return (existing.id, false);
        }

        let issue = Issue {
            id: Uuid::new_v4(),
            severity: severity.to_string(),
            category: category.to_string(),
            component: component.to_string(),
            occurrence_count: 1,
            first_seen: now,
            last_seen: now,
            error_hash: hash.clone(),
            suggested_fixes: Vec::new(),
            system_changes_needed: Vec::new(),
            status: "open".to_string(),
        };
        let id = issue.id;
        issues.insert(hash, issue);
        (id, true)
    }

    /// All issues, most-seen first.
    #[must_use]
    pub fn list(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self.issues.lock().values().cloned().collect();
        issues.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));
        issues
    }

    /// Number of distinct issues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.lock().len()
    }

    /// Whether any issues are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_errors_collapse_into_one_issue() {
        let log = IssueLog::new();
        let (first_id, created) = log.record(
            "high",
            "dependency",
            "learning-pipeline",
            "connection to 10.0.0.17 refused at 2026-07-01T10:00:00Z (attempt 3)",
        );
        assert!(created);

        // Same error modulo scrubbed volatile fragments.
        let (second_id, created) = log.record(
            "high",
            "dependency",
            "learning-pipeline",
            "connection to 10.0.0.99 refused at 2026-07-02T11:30:00Z (attempt 8)",
        );
        assert!(!created);
        assert_eq!(first_id, second_id);

        let issues = log.list();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].occurrence_count, 2);
    }

    #[test]
    fn test_distinct_errors_stay_distinct() {
        let log = IssueLog::new();
        log.record("high", "dependency", "svc", "connection refused");
        log.record("low", "storage", "svc", "disk full on /var");
        assert_eq!(log.len(), 2);
    }
}
