//! Organize requests and plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::conflict::{BatchMode, ConflictDecision, ConflictError, ConflictStrategy, ResolvedAction};
use crate::error::TemplateError;
use crate::rules::ShadowWarning;

/// What to organize and how
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeRequest {
    pub source_dir: PathBuf,
    /// Base for relative destination templates; defaults to `source_dir`
    #[serde(default)]
    pub destination_root: Option<PathBuf>,
    /// Ruleset to apply; defaults to the active one
    #[serde(default)]
    pub ruleset_id: Option<String>,
    #[serde(default)]
    pub strategy: Option<ConflictStrategy>,
    #[serde(default)]
    pub batch_mode: Option<BatchMode>,
}

impl OrganizeRequest {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_destination_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.destination_root = Some(root.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_batch_mode(mut self, batch_mode: BatchMode) -> Self {
        self.batch_mode = Some(batch_mode);
        self
    }

    pub fn with_ruleset(mut self, ruleset_id: &str) -> Self {
        self.ruleset_id = Some(ruleset_id.to_string());
        self
    }
}

/// A matched file whose destination could not be rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedDestination {
    pub source: PathBuf,
    pub relative_path: String,
    pub rule_id: String,
    pub error: TemplateError,
}

/// Rules that matched a file but lost to the winner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowedMatch {
    pub relative_path: String,
    pub winner: String,
    pub shadowed: Vec<String>,
}

/// Counts per outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub scanned: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub unresolved: usize,
    pub proceed: usize,
    pub renamed: usize,
    pub skipped: usize,
    pub aborted: usize,
}

impl PlanSummary {
    pub(crate) fn tally(&mut self, decisions: &[ConflictDecision]) {
        for decision in decisions {
            match decision.action {
                ResolvedAction::Proceed => self.proceed += 1,
                ResolvedAction::RenameTo(_) => self.renamed += 1,
                ResolvedAction::Skip => self.skipped += 1,
                ResolvedAction::Abort => self.aborted += 1,
            }
        }
    }
}

/// Result of planning: one decision per routed file, plus everything that
/// was not routed. Nothing on disk has changed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizePlan {
    pub id: String,
    pub ruleset_id: String,
    /// Content hash of the ruleset the plan was built from
    pub ruleset_hash: String,
    pub snapshot_version: u64,
    pub source_dir: PathBuf,
    pub destination_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub strategy: ConflictStrategy,
    pub batch_mode: BatchMode,
    /// Sorted by source relative path
    pub decisions: Vec<ConflictDecision>,
    /// Relative paths of files no rule matched
    pub unmatched: Vec<String>,
    pub unresolved: Vec<UnresolvedDestination>,
    pub errors: Vec<ConflictError>,
    pub shadow_warnings: Vec<ShadowWarning>,
    pub shadowed: Vec<ShadowedMatch>,
    pub summary: PlanSummary,
}

impl OrganizePlan {
    /// Decisions that will touch the filesystem
    pub fn actionable(&self) -> impl Iterator<Item = &ConflictDecision> {
        self.decisions.iter().filter(|d| d.final_destination().is_some())
    }

    pub fn has_aborts(&self) -> bool {
        self.summary.aborted > 0
    }

    pub fn decision_for(&self, relative_path: &str) -> Option<&ConflictDecision> {
        self.decisions.iter().find(|d| d.relative_path == relative_path)
    }
}
