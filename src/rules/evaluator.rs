//! Rule evaluation
//!
//! For each file the evaluator collects every enabled rule whose pattern
//! matches and whose extra conditions pass, then selects the one with the
//! lowest `(priority, insertion_index)`. Evaluation is a pure function of the
//! ruleset, the pattern library and the file; the cache only short-circuits it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::cache::MatchCache;
use crate::models::{FileDescriptor, Fingerprint};
use crate::pattern::{evaluate_all, MatchResult, Pattern, PatternLibrary};

use super::ruleset::{Rule, Ruleset};

/// Why a rule was (or was not) chosen for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Exactly one rule matched
    SingleMatch,
    /// Several rules matched; the lowest (priority, insertion index) won
    PriorityWin,
    NoMatch,
}

/// The rule chosen for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveRuleDecision {
    pub fingerprint: Fingerprint,
    pub rule_id: Option<String>,
    pub reason: DecisionReason,
    /// Pattern and condition captures of the winning rule
    pub captures: BTreeMap<String, String>,
    /// Rules that also matched but lost, in evaluation order
    pub shadowed: Vec<String>,
}

/// A rule that can never win because an earlier rule matches everything
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowWarning {
    pub rule_id: String,
    pub rule_name: String,
    pub shadowed_by_id: String,
    pub shadowed_by_name: String,
    pub message: String,
}

/// Evaluates files against one ruleset snapshot
pub struct RuleEvaluator<'a> {
    library: &'a PatternLibrary,
    ordered: Vec<&'a Rule>,
    cache: Option<&'a MatchCache>,
    ruleset_hash: String,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(ruleset: &'a Ruleset, library: &'a PatternLibrary) -> Self {
        Self {
            library,
            ordered: ruleset.ordered(),
            cache: None,
            ruleset_hash: ruleset_hash(ruleset, library),
        }
    }

    pub fn with_cache(mut self, cache: &'a MatchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Content hash of the ruleset and the revisions of its patterns
    pub fn ruleset_hash(&self) -> &str {
        &self.ruleset_hash
    }

    /// Collect and select the effective rule for `file`
    pub fn evaluate(&self, file: &FileDescriptor) -> EffectiveRuleDecision {
        if let Some(decision) = self
            .cache
            .and_then(|c| c.get_decision(&self.ruleset_hash, &file.fingerprint))
        {
            return decision;
        }

        let matched = self.collect(file);
        let decision = select(&file.fingerprint, matched);

        if let Some(cache) = self.cache {
            cache.insert_decision(&self.ruleset_hash, &decision);
        }
        decision
    }

    /// Every enabled rule that matches `file`, in evaluation order, with its captures
    pub fn collect(&self, file: &FileDescriptor) -> Vec<(&'a Rule, BTreeMap<String, String>)> {
        let mut matched = Vec::new();
        for rule in &self.ordered {
            if !rule.is_enabled() {
                continue;
            }
            let Some(pattern) = self.library.get(rule.pattern_id()) else {
                continue;
            };

            let result = self.match_pattern(pattern, file);
            if !result.matched {
                continue;
            }

            let Some(extra) = evaluate_all(rule.conditions(), file) else {
                continue;
            };
            let mut captures = result.captures;
            captures.extend(extra);
            matched.push((*rule, captures));
        }
        matched
    }

    fn match_pattern(&self, pattern: &Pattern, file: &FileDescriptor) -> MatchResult {
        if let Some(cache) = self.cache {
            if let Some(hit) = cache.get_match(pattern.id(), pattern.digest(), &file.fingerprint) {
                return hit;
            }
            let result = pattern.evaluate(file);
            cache.insert_match(pattern.digest(), &result);
            return result;
        }
        pattern.evaluate(file)
    }
}

fn select(
    fingerprint: &Fingerprint,
    matched: Vec<(&Rule, BTreeMap<String, String>)>,
) -> EffectiveRuleDecision {
    let reason = match matched.len() {
        0 => DecisionReason::NoMatch,
        1 => DecisionReason::SingleMatch,
        _ => DecisionReason::PriorityWin,
    };

    // `matched` is already in (priority, insertion_index) order
    let mut iter = matched.into_iter();
    let winner = iter.next();
    let shadowed = iter.map(|(rule, _)| rule.id().to_string()).collect();

    match winner {
        Some((rule, captures)) => EffectiveRuleDecision {
            fingerprint: fingerprint.clone(),
            rule_id: Some(rule.id().to_string()),
            reason,
            captures,
            shadowed,
        },
        None => EffectiveRuleDecision {
            fingerprint: fingerprint.clone(),
            rule_id: None,
            reason,
            captures: BTreeMap::new(),
            shadowed: Vec::new(),
        },
    }
}

/// Report enabled rules placed after an unconditional catch-all rule
pub fn shadow_warnings(ruleset: &Ruleset, library: &PatternLibrary) -> Vec<ShadowWarning> {
    let is_catch_all = |rule: &Rule| {
        !rule.has_conditions()
            && library
                .get(rule.pattern_id())
                .is_some_and(Pattern::is_catch_all)
    };

    let enabled: Vec<&Rule> = ruleset
        .ordered()
        .into_iter()
        .filter(|r| r.is_enabled() && library.contains(r.pattern_id()))
        .collect();

    let Some(position) = enabled.iter().position(|r| is_catch_all(*r)) else {
        return Vec::new();
    };
    let blocker = enabled[position];

    enabled[position + 1..]
        .iter()
        .filter(|r| !is_catch_all(**r))
        .map(|rule| ShadowWarning {
            rule_id: rule.id().to_string(),
            rule_name: rule.name().to_string(),
            shadowed_by_id: blocker.id().to_string(),
            shadowed_by_name: blocker.name().to_string(),
            message: format!(
                "Rule '{}' can never apply: catch-all rule '{}' (priority {}) is evaluated first",
                rule.name(),
                blocker.name(),
                blocker.priority()
            ),
        })
        .collect()
}

/// Hash of everything that influences evaluation: the rule records in
/// evaluation order and the content digest of every referenced pattern
pub fn ruleset_hash(ruleset: &Ruleset, library: &PatternLibrary) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ruleset.id().as_bytes());
    hasher.update([u8::from(library.default_case_sensitive())]);

    for rule in ruleset.ordered() {
        let record = rule.record();
        hasher.update([0u8]);
        hasher.update(record.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(record.pattern_id.as_bytes());
        hasher.update(record.priority.to_le_bytes());
        hasher.update(rule.insertion_index().to_le_bytes());
        hasher.update([u8::from(record.enabled)]);
        for condition in &record.extra_conditions {
            hasher.update([1u8]);
            hasher.update(condition.as_bytes());
        }
        match library.get(rule.pattern_id()) {
            Some(pattern) => {
                hasher.update(pattern.revision().to_le_bytes());
                hasher.update(pattern.digest().as_bytes());
            }
            None => hasher.update(b"missing"),
        }
    }

    format!("{:x}", hasher.finalize())
}
