//! Organize planning
//!
//! Scan the source directory, evaluate every file against one snapshot,
//! render destinations, then resolve the whole batch at once. Evaluation runs
//! on a bounded set of scoped threads; results are put back in scan order
//! before resolution so the plan never depends on scheduling.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::cache::MatchCache;
use crate::config::EngineConfig;
use crate::conflict::{ConflictCandidate, ConflictError, ConflictResolver, ResolvedAction};
use crate::error::{EngineError, RulesetError};
use crate::models::FileDescriptor;
use crate::rules::{shadow_warnings, RuleEvaluator, Ruleset, TemplateContext};
use crate::utils::format_size;

use super::plan::{OrganizePlan, OrganizeRequest, PlanSummary, ShadowedMatch, UnresolvedDestination};
use super::{CancellationFlag, EngineSnapshot};

/// What happened to one scanned file before conflict resolution
enum FileOutcome {
    Routed {
        candidate: ConflictCandidate,
        shadowed: Vec<String>,
    },
    Unmatched(String),
    Unresolved(UnresolvedDestination),
}

pub(crate) struct Planner<'a> {
    pub config: &'a EngineConfig,
    pub snapshot: &'a EngineSnapshot,
    pub cache: Option<&'a MatchCache>,
}

impl Planner<'_> {
    pub fn plan(&self, request: &OrganizeRequest, cancel: &CancellationFlag) -> Result<OrganizePlan, EngineError> {
        let workspace = &self.snapshot.workspace;
        let ruleset = match &request.ruleset_id {
            Some(id) => workspace.ruleset(id),
            None => workspace.active_ruleset(),
        }
        .ok_or_else(|| {
            RulesetError::RulesetNotFound(
                request.ruleset_id.clone().unwrap_or_else(|| "<active>".to_string()),
            )
        })?;
        let library = workspace.library();

        let source_dir = request.source_dir.clone();
        if !source_dir.is_dir() {
            return Err(EngineError::NotADirectory(source_dir));
        }
        let destination_root = request
            .destination_root
            .clone()
            .unwrap_or_else(|| source_dir.clone());
        let strategy = request.strategy.unwrap_or(self.config.strategy);
        let batch_mode = request.batch_mode.unwrap_or(self.config.batch_mode);

        tracing::info!(
            source = %source_dir.display(),
            ruleset_id = %ruleset.id(),
            strategy = ?strategy,
            workers = self.config.workers,
            "Planning organize pass"
        );

        let files = scan(&source_dir, self.config.recursive, self.config.include_hidden, cancel)?;

        let mut evaluator = RuleEvaluator::new(ruleset, library);
        if let Some(cache) = self.cache {
            evaluator = evaluator.with_cache(cache);
        }

        let outcomes = self.evaluate_files(&evaluator, ruleset, &files, &destination_root, cancel)?;

        let mut candidates = Vec::new();
        let mut unmatched = Vec::new();
        let mut unresolved = Vec::new();
        let mut shadowed = Vec::new();
        for outcome in outcomes {
            match outcome {
                FileOutcome::Routed { candidate, shadowed: losers } => {
                    if !losers.is_empty() {
                        shadowed.push(ShadowedMatch {
                            relative_path: candidate.relative_path.clone(),
                            winner: candidate.rule_id.clone(),
                            shadowed: losers,
                        });
                    }
                    candidates.push(candidate);
                }
                FileOutcome::Unmatched(relative_path) => unmatched.push(relative_path),
                FileOutcome::Unresolved(entry) => unresolved.push(entry),
            }
        }

        // Barrier: every proposed destination is known before any is resolved
        let resolver = ConflictResolver {
            strategy,
            max_rename_attempts: self.config.max_rename_attempts,
            skip_identical: self.config.skip_identical,
            case_sensitive: self.config.case_sensitive(),
        };
        let matched = candidates.len() + unresolved.len();
        let decisions = resolver.resolve_batch(candidates, batch_mode);

        let errors: Vec<ConflictError> = decisions
            .iter()
            .filter(|d| d.action == ResolvedAction::Abort)
            .map(|d| ConflictError {
                source: d.source.clone(),
                destination: d.proposed_destination.clone(),
                conflict: d.conflict,
                message: d.detail.clone().unwrap_or_else(|| "aborted".to_string()),
            })
            .collect();

        let mut summary = PlanSummary {
            scanned: files.len(),
            matched,
            unmatched: unmatched.len(),
            unresolved: unresolved.len(),
            ..Default::default()
        };
        summary.tally(&decisions);

        if !errors.is_empty() {
            tracing::warn!(aborted = errors.len(), "Plan contains aborted files");
        }
        tracing::info!(
            scanned = summary.scanned,
            matched = summary.matched,
            unmatched = summary.unmatched,
            unresolved = summary.unresolved,
            proceed = summary.proceed,
            renamed = summary.renamed,
            skipped = summary.skipped,
            aborted = summary.aborted,
            "Plan ready"
        );

        Ok(OrganizePlan {
            id: Uuid::new_v4().to_string(),
            ruleset_id: ruleset.id().to_string(),
            ruleset_hash: evaluator.ruleset_hash().to_string(),
            snapshot_version: self.snapshot.version,
            source_dir,
            destination_root,
            created_at: Utc::now(),
            strategy,
            batch_mode,
            decisions,
            unmatched,
            unresolved,
            errors,
            shadow_warnings: shadow_warnings(ruleset, library),
            shadowed,
            summary,
        })
    }

    fn evaluate_files(
        &self,
        evaluator: &RuleEvaluator<'_>,
        ruleset: &Ruleset,
        files: &[FileDescriptor],
        destination_root: &Path,
        cancel: &CancellationFlag,
    ) -> Result<Vec<FileOutcome>, EngineError> {
        let workers = self.config.workers.clamp(1, files.len().max(1));
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, FileOutcome)>> = Mutex::new(Vec::with_capacity(files.len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(file) = files.get(index) else {
                            break;
                        };
                        local.push((index, route(evaluator, ruleset, file, destination_root)));
                    }
                    results
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend(local);
                });
            }
        });

        if cancel.is_cancelled() {
            tracing::info!("Planning cancelled");
            return Err(EngineError::Cancelled);
        }

        let mut results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, outcome)| outcome).collect())
    }
}

fn route(
    evaluator: &RuleEvaluator<'_>,
    ruleset: &Ruleset,
    file: &FileDescriptor,
    destination_root: &Path,
) -> FileOutcome {
    let decision = evaluator.evaluate(file);
    let Some(rule) = decision.rule_id.as_deref().and_then(|id| ruleset.rule(id)) else {
        return FileOutcome::Unmatched(file.relative_path.clone());
    };

    let ctx = TemplateContext {
        file,
        captures: &decision.captures,
        rule_name: rule.name(),
    };
    match rule.template().destination(destination_root, &ctx) {
        Ok(destination) => FileOutcome::Routed {
            candidate: ConflictCandidate::new(
                file.path.clone(),
                &file.relative_path,
                destination,
                rule.id(),
                rule.action(),
            ),
            shadowed: decision.shadowed,
        },
        Err(error) => {
            tracing::debug!(file = %file.relative_path, rule_id = %rule.id(), %error, "Destination unresolved");
            FileOutcome::Unresolved(UnresolvedDestination {
                source: file.path.clone(),
                relative_path: file.relative_path.clone(),
                rule_id: rule.id().to_string(),
                error,
            })
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Regular files under `root`, sorted by relative path. Hidden entries are
/// skipped (with their subtrees) unless `include_hidden` is set.
pub(crate) fn scan(
    root: &Path,
    recursive: bool,
    include_hidden: bool,
    cancel: &CancellationFlag,
) -> Result<Vec<FileDescriptor>, EngineError> {
    if !root.is_dir() {
        return Err(EngineError::NotADirectory(root.to_path_buf()));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || include_hidden || !is_hidden(e));

    let mut files = Vec::new();
    for entry in walker {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match FileDescriptor::from_path(root, entry.path()) {
            Ok(file) => files.push(file),
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "Skipping file"),
        }
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let total: u64 = files.iter().map(|f| f.size).sum();
    tracing::debug!(
        root = %root.display(),
        files = files.len(),
        total_size = %format_size(total),
        "Scan finished"
    );
    Ok(files)
}
