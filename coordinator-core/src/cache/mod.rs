//! # Semantic Cache
//!
//! Exact + similarity-based response cache with TTL and hit accounting.
//!
//! Exact matches (SHA-256 over the query text) take precedence; on miss the
//! unexpired entries are scanned and the highest-cosine entry is returned when
//! it clears the configured similarity threshold. Entries expire after a TTL
//! and are swept lazily.

use std::collections::HashMap;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::embeddings::similarity::cosine_similarity;
use crate::error::{Error, Result};
use crate::types::{CacheConfig, CacheEntry, CacheHitKind};

/// A cache lookup result.
#[derive(Debug, Clone, Serialize)]
pub struct CacheHit {
    pub response: String,
    pub llm_used: String,
    pub cache_hit: CacheHitKind,
    /// Present on semantic hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub hit_count: u32,
}

/// Aggregate cache statistics over unexpired entries.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_hits: u64,
    pub total_tokens_saved: u64,
    pub avg_hits_per_entry: f64,
}

/// In-memory semantic response cache keyed by query hash.
pub struct SemanticCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SemanticCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn query_hash(query: &str) -> String {
        let digest = Sha256::digest(query.as_bytes());
        format!("{digest:x}")
    }

    /// Look up a cached response, exact match first, then by similarity.
    ///
    /// A hit atomically increments the entry's `hit_count` and stamps
    /// `last_hit_at`. Entries past their `expires_at` are never returned.
    pub fn get(&self, query: &str, query_embedding: &[f32]) -> Option<CacheHit> {
        let now = Utc::now();
        let hash = Self::query_hash(query);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&hash) {
            if entry.expires_at > now {
                entry.hit_count += 1;
                entry.last_hit_at = Some(now);
                return Some(CacheHit {
                    response: entry.response.clone(),
                    llm_used: entry.llm_used.clone(),
                    cache_hit: CacheHitKind::Exact,
                    similarity: None,
                    hit_count: entry.hit_count,
                });
            }
        }

        let mut best: Option<(String, f32)> = None;
        for entry in entries.values() {
            if entry.expires_at <= now {
                continue;
            }
            let score = cosine_similarity(query_embedding, &entry.query_embedding);
            if score >= self.config.similarity_threshold
                && best.as_ref().is_none_or(|(_, s)| score > *s)
            {
                best = Some((entry.query_hash.clone(), score));
            }
        }

        let (best_hash, score) = best?;
        let entry = entries.get_mut(&best_hash)?;
        entry.hit_count += 1;
        entry.last_hit_at = Some(now);
        Some(CacheHit {
            response: entry.response.clone(),
            llm_used: entry.llm_used.clone(),
            cache_hit: CacheHitKind::Semantic,
            similarity: Some(score),
            hit_count: entry.hit_count,
        })
    }

    /// Cache a response.
    ///
    /// # Errors
    ///
    /// Rejects empty responses; a cached empty answer would shadow real ones
    /// for the cache TTL.
    pub fn set(
        &self,
        query: &str,
        query_embedding: Vec<f32>,
        response: &str,
        llm_used: &str,
        tokens_saved: u32,
    ) -> Result<()> {
        if response.trim().is_empty() {
            return Err(Error::Validation(
                "refusing to cache an empty response".to_string(),
            ));
        }
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.config.ttl)
            .map_err(|e| Error::Configuration(format!("cache ttl: {e}")))?;
        let hash = Self::query_hash(query);
        let entry = CacheEntry {
            id: Uuid::new_v4(),
            query_hash: hash.clone(),
            query_text: query.to_string(),
            query_embedding,
            response: response.to_string(),
            llm_used: llm_used.to_string(),
            tokens_saved,
            hit_count: 0,
            created_at: now,
            expires_at: now + ttl,
            last_hit_at: None,
        };
        self.entries.lock().insert(hash, entry);
        Ok(())
    }

    /// Remove expired entries.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Aggregate statistics over unexpired entries.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.lock();
        let live: Vec<&CacheEntry> = entries.values().filter(|e| e.expires_at > now).collect();
        let total_entries = live.len();
        let total_hits: u64 = live.iter().map(|e| u64::from(e.hit_count)).sum();
        let total_tokens_saved: u64 = live
            .iter()
            .map(|e| u64::from(e.tokens_saved) * u64::from(e.hit_count))
            .sum();
        let avg_hits_per_entry = if total_entries == 0 {
            0.0
        } else {
            total_hits as f64 / total_entries as f64
        };
        CacheStats {
            total_entries,
            total_hits,
            total_tokens_saved,
            avg_hits_per_entry,
        }
    }
}
