//! Match/result cache
//!
//! Memoizes pattern evaluations keyed by (pattern id, pattern digest,
//! fingerprint) and rule decisions keyed by (ruleset hash, fingerprint). Both
//! keys cover the content that decides the result, so a stale entry can only
//! go unused; eviction just reclaims memory. Losing entries never changes
//! results.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::models::Fingerprint;
use crate::pattern::MatchResult;
use crate::rules::EffectiveRuleDecision;

/// Default bound on the number of entries per map
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    pattern_id: String,
    digest: String,
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionKey {
    ruleset_hash: String,
    fingerprint: Fingerprint,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub match_entries: usize,
    pub decision_entries: usize,
}

/// Concurrent cache shared by every organize pass of an engine
pub struct MatchCache {
    matches: DashMap<MatchKey, MatchResult>,
    decisions: DashMap<DecisionKey, EffectiveRuleDecision>,
    max_entries: usize,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MatchCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            matches: DashMap::new(),
            decisions: DashMap::new(),
            max_entries: max_entries.max(1),
            enabled: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything
    pub fn disabled() -> Self {
        let cache = Self::new(1);
        cache.set_enabled(false);
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Disabling also drops every entry
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn get_match(
        &self,
        pattern_id: &str,
        digest: &str,
        fingerprint: &Fingerprint,
    ) -> Option<MatchResult> {
        if !self.is_enabled() {
            return None;
        }
        let key = MatchKey {
            pattern_id: pattern_id.to_string(),
            digest: digest.to_string(),
            fingerprint: fingerprint.clone(),
        };
        let found = self.matches.get(&key).map(|entry| entry.value().clone());
        self.record(found.is_some());
        found
    }

    pub fn insert_match(&self, digest: &str, result: &MatchResult) {
        if !self.is_enabled() {
            return;
        }
        let Some(pattern_id) = result.pattern_id.clone() else {
            return;
        };
        if self.matches.len() >= self.max_entries {
            tracing::debug!(entries = self.matches.len(), "Match cache full, clearing");
            self.matches.clear();
        }
        let key = MatchKey {
            pattern_id,
            digest: digest.to_string(),
            fingerprint: result.fingerprint.clone(),
        };
        self.matches.insert(key, result.clone());
    }

    pub fn get_decision(
        &self,
        ruleset_hash: &str,
        fingerprint: &Fingerprint,
    ) -> Option<EffectiveRuleDecision> {
        if !self.is_enabled() {
            return None;
        }
        let key = DecisionKey {
            ruleset_hash: ruleset_hash.to_string(),
            fingerprint: fingerprint.clone(),
        };
        let found = self.decisions.get(&key).map(|entry| entry.value().clone());
        self.record(found.is_some());
        found
    }

    pub fn insert_decision(&self, ruleset_hash: &str, decision: &EffectiveRuleDecision) {
        if !self.is_enabled() {
            return;
        }
        if self.decisions.len() >= self.max_entries {
            tracing::debug!(entries = self.decisions.len(), "Decision cache full, clearing");
            self.decisions.clear();
        }
        let key = DecisionKey {
            ruleset_hash: ruleset_hash.to_string(),
            fingerprint: decision.fingerprint.clone(),
        };
        self.decisions.insert(key, decision.clone());
    }

    /// Drop the entries of a pattern except those for `keep_digest`
    pub fn evict_pattern(&self, pattern_id: &str, keep_digest: Option<&str>) {
        self.matches
            .retain(|key, _| key.pattern_id != pattern_id || Some(key.digest.as_str()) == keep_digest);
    }

    pub fn clear(&self) {
        self.matches.clear();
        self.decisions.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            match_entries: self.matches.len(),
            decision_entries: self.decisions.len(),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
