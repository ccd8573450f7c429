//! Organizer engine
//!
//! [`EngineContext`] is the explicit entry point: it owns the configuration,
//! the current workspace snapshot and the match cache. Edits run on a copy of
//! the workspace and replace the snapshot only when they succeed, so a pass
//! that already holds a snapshot keeps seeing a consistent ruleset.

pub mod plan;
mod planner;

pub use plan::{OrganizePlan, OrganizeRequest, PlanSummary, ShadowedMatch, UnresolvedDestination};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::cache::{CacheStats, MatchCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, ParseError};
use crate::execution::{CommitExecutor, CommitReport, FileOperations};
use crate::pattern::{parse_with, test_samples, ExpressionKind, MatchSpec, ParseOptions, PatternLibrary, SampleResult, SpecSummary};
use crate::rules::Workspace;

use planner::Planner;

/// Cooperative cancellation shared between a caller and a running pass
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Immutable view of the workspace used by one organize pass
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    /// Incremented on every successful edit
    pub version: u64,
    pub workspace: Workspace,
}

pub struct EngineContext {
    config: EngineConfig,
    snapshot: RwLock<Arc<EngineSnapshot>>,
    edit_lock: Mutex<()>,
    cache: MatchCache,
}

impl EngineContext {
    /// Engine with an empty workspace
    pub fn new(config: EngineConfig) -> Self {
        let workspace = Workspace::new(PatternLibrary::new(config.case_sensitive()));
        Self::with_workspace(config, workspace)
    }

    pub fn with_workspace(config: EngineConfig, workspace: Workspace) -> Self {
        let cache = MatchCache::new(config.cache_max_entries);
        cache.set_enabled(config.cache_enabled);
        Self {
            config,
            snapshot: RwLock::new(Arc::new(EngineSnapshot { version: 0, workspace })),
            edit_lock: Mutex::new(()),
            cache,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The current snapshot; holding it pins that version
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply an edit to a copy of the workspace; the snapshot is replaced
    /// only when `f` succeeds. Edits are serialized.
    pub fn edit<T, E>(&self, f: impl FnOnce(&mut Workspace) -> Result<T, E>) -> Result<T, E> {
        let _guard = self.edit_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut workspace = current.workspace.clone();
        let value = f(&mut workspace)?;

        self.evict_changed(current.workspace.library(), workspace.library());
        let next = Arc::new(EngineSnapshot {
            version: current.version + 1,
            workspace,
        });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
        tracing::debug!(version = current.version + 1, "Workspace snapshot replaced");
        Ok(value)
    }

    /// Reclaim match entries of patterns whose content changed or that are gone
    fn evict_changed(&self, before: &PatternLibrary, after: &PatternLibrary) {
        for pattern in before.iter() {
            let kept = after.get(pattern.id()).map(|p| p.digest());
            if kept != Some(pattern.digest()) {
                self.cache.evict_pattern(pattern.id(), kept);
            }
        }
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Parse an expression without storing it
    pub fn validate_pattern(&self, raw: &str, kind: ExpressionKind) -> Result<SpecSummary, ParseError> {
        self.compile(raw, kind).map(|spec| spec.summary())
    }

    /// Run an expression against sample relative paths
    pub fn test_pattern<S: AsRef<str>>(
        &self,
        raw: &str,
        kind: ExpressionKind,
        samples: &[S],
    ) -> Result<Vec<SampleResult>, ParseError> {
        let spec = self.compile(raw, kind)?;
        Ok(test_samples(&spec, samples))
    }

    /// Build a plan against the current snapshot. Nothing on disk changes.
    pub fn plan_organize(
        &self,
        request: &OrganizeRequest,
        cancel: &CancellationFlag,
    ) -> Result<OrganizePlan, EngineError> {
        let snapshot = self.snapshot();
        let planner = Planner {
            config: &self.config,
            snapshot: &snapshot,
            cache: Some(&self.cache),
        };
        planner.plan(request, cancel)
    }

    /// Carry out a plan exactly as decided
    pub async fn commit_organize(
        &self,
        plan: &OrganizePlan,
        operations: Arc<dyn FileOperations>,
        cancel: &CancellationFlag,
    ) -> CommitReport {
        if plan.snapshot_version != self.snapshot().version {
            tracing::warn!(
                plan_version = plan.snapshot_version,
                "Committing a plan built from an older snapshot"
            );
        }
        CommitExecutor::new(operations, self.config.commit_concurrency)
            .commit(plan, cancel)
            .await
    }

    fn compile(&self, raw: &str, kind: ExpressionKind) -> Result<MatchSpec, ParseError> {
        let options = ParseOptions {
            case_sensitive: self.config.case_sensitive(),
        };
        parse_with(raw, kind, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::{ConflictStrategy, ResolvedAction};
    use crate::error::{LibraryError, RulesetError};
    use crate::execution::LocalFileOperations;
    use crate::pattern::PatternDraft;
    use crate::rules::RuleDraft;
    use std::fs;
    use tempfile::tempdir;

    fn config() -> EngineConfig {
        EngineConfig {
            case_sensitivity: crate::config::CaseSensitivity::Sensitive,
            workers: 2,
            ..Default::default()
        }
    }

    fn engine_with_rule(pattern: &str, template: &str) -> EngineContext {
        let engine = EngineContext::new(config());
        engine
            .edit(|ws| -> Result<(), EngineError> {
                let ruleset = ws.create_ruleset("Default", "");
                let pattern = ws.create_pattern(PatternDraft::glob("p", pattern))?;
                ws.add_rule(&ruleset, RuleDraft::new("r", &pattern, template, 1))?;
                Ok(())
            })
            .unwrap();
        engine
    }

    #[test]
    fn test_cancellation_flag() {
        let flag = CancellationFlag::new();
        let shared = flag.clone();
        assert!(!flag.is_cancelled());
        shared.cancel();
        assert!(flag.is_cancelled());
        flag.reset();
        assert!(!shared.is_cancelled());
    }

    #[test]
    fn test_failed_edit_keeps_snapshot() {
        let engine = EngineContext::new(config());
        let before = engine.snapshot();

        let result = engine.edit(|ws| ws.create_pattern(PatternDraft::glob("bad", "{unclosed")));
        assert!(matches!(result, Err(LibraryError::Parse(_))));
        assert_eq!(engine.snapshot().version, before.version);

        engine
            .edit(|ws| ws.create_pattern(PatternDraft::glob("good", "*.txt")))
            .unwrap();
        assert_eq!(engine.snapshot().version, before.version + 1);
        // The old snapshot is untouched
        assert!(before.workspace.library().is_empty());
    }

    #[test]
    fn test_pattern_edit_evicts_stale_matches() {
        let engine = engine_with_rule("*.txt", "Text");
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.md"), "b").unwrap();

        let request = OrganizeRequest::new(dir.path());
        engine.plan_organize(&request, &CancellationFlag::new()).unwrap();
        assert_eq!(engine.cache_stats().match_entries, 2);

        let pattern = engine.snapshot().workspace.library().iter().next().unwrap().id().to_string();
        engine
            .edit(|ws| {
                ws.update_pattern(
                    &pattern,
                    crate::pattern::PatternEdit {
                        expression: Some("*.md".to_string()),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(engine.cache_stats().match_entries, 0);

        let plan = engine.plan_organize(&request, &CancellationFlag::new()).unwrap();
        assert_eq!(plan.unmatched, vec!["a.txt".to_string()]);
        assert!(plan.decision_for("b.md").is_some());
    }

    #[test]
    fn test_validate_and_test_pattern() {
        let engine = EngineContext::new(config());
        let summary = engine.validate_pattern("IMG_{n}.jpg", ExpressionKind::Glob).unwrap();
        assert_eq!(summary.capture_names, vec!["n".to_string()]);

        assert_eq!(
            engine.validate_pattern("  ", ExpressionKind::Glob),
            Err(ParseError::EmptyExpression)
        );

        let results = engine
            .test_pattern("*.jpg", ExpressionKind::Glob, &["a.jpg", "b.png"])
            .unwrap();
        assert!(results[0].matched);
        assert!(!results[1].matched);
    }

    #[test]
    fn test_plan_requires_directory() {
        let engine = engine_with_rule("*.txt", "Text");
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = engine
            .plan_organize(&OrganizeRequest::new(&missing), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotADirectory(_)));
    }

    #[test]
    fn test_plan_without_ruleset() {
        let engine = EngineContext::new(config());
        let dir = tempdir().unwrap();
        let err = engine
            .plan_organize(&OrganizeRequest::new(dir.path()), &CancellationFlag::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Ruleset(RulesetError::RulesetNotFound(_))));
    }

    #[test]
    fn test_cancelled_plan() {
        let engine = engine_with_rule("*.txt", "Text");
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = engine
            .plan_organize(&OrganizeRequest::new(dir.path()), &cancel)
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_plan_reports_unmatched_and_unresolved() {
        let engine = EngineContext::new(config());
        engine
            .edit(|ws| -> Result<(), EngineError> {
                let ruleset = ws.create_ruleset("Default", "");
                let any = ws.create_pattern(PatternDraft::glob("notes", "notes*"))?;
                ws.add_rule(&ruleset, RuleDraft::new("by ext", &any, "{ext}", 1))?;
                Ok(())
            })
            .unwrap();

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();
        fs::write(dir.path().join("notes"), "").unwrap();
        fs::write(dir.path().join("other.md"), "").unwrap();

        let plan = engine
            .plan_organize(&OrganizeRequest::new(dir.path()), &CancellationFlag::new())
            .unwrap();

        assert_eq!(plan.summary.scanned, 3);
        assert_eq!(plan.unmatched, vec!["other.md".to_string()]);
        assert_eq!(plan.unresolved.len(), 1);
        assert_eq!(plan.unresolved[0].relative_path, "notes");
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.decisions[0].proposed_destination, dir.path().join("md/notes.md"));
        assert_eq!(plan.summary.matched, 2);
    }

    #[test]
    fn test_hidden_files_skipped_by_default() {
        let engine = engine_with_rule("*", "All");
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".hidden"), "").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), "").unwrap();
        fs::write(dir.path().join("visible.txt"), "").unwrap();

        let plan = engine
            .plan_organize(&OrganizeRequest::new(dir.path()), &CancellationFlag::new())
            .unwrap();
        assert_eq!(plan.summary.scanned, 1);
        assert_eq!(plan.decisions[0].relative_path, "visible.txt");
    }

    #[tokio::test]
    async fn test_plan_and_commit() {
        let engine = engine_with_rule("*.txt", "Text");
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let plan = engine
            .plan_organize(
                &OrganizeRequest::new(dir.path()).with_strategy(ConflictStrategy::Skip),
                &CancellationFlag::new(),
            )
            .unwrap();
        assert_eq!(plan.decisions[0].action, ResolvedAction::Proceed);

        let report = engine
            .commit_organize(&plan, Arc::new(LocalFileOperations), &CancellationFlag::new())
            .await;
        assert!(report.success());
        assert!(dir.path().join("Text/a.txt").exists());
        assert!(!dir.path().join("a.txt").exists());
    }
}
