//! Commit Executor
//!
//! Carries out the decisions of an [`OrganizePlan`] through a
//! [`FileOperations`] collaborator. Decisions are never re-derived here: the
//! plan already guarantees distinct destinations, so operations run
//! concurrently (bounded by a semaphore) and outcomes are reported in plan
//! order. Failures are relayed verbatim and never retried.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::conflict::{ConflictDecision, ResolvedAction};
use crate::engine::{CancellationFlag, OrganizePlan};
use crate::rules::RuleAction;

use super::operations::{FileAction, FileOperations};

/// Final state of one planned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Succeeded,
    Failed,
    /// The decision was skip
    Skipped,
    /// The decision was abort
    Aborted,
    /// Not dispatched because the pass was cancelled
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEntry {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub rule_id: String,
    pub rule_action: RuleAction,
    pub status: CommitStatus,
    pub error: Option<String>,
}

impl CommitEntry {
    fn from_decision(decision: &ConflictDecision, status: CommitStatus, error: Option<String>) -> Self {
        Self {
            source: decision.source.clone(),
            destination: decision.final_destination().map(|p| p.to_path_buf()),
            rule_id: decision.rule_id.clone(),
            rule_action: decision.rule_action,
            status,
            error,
        }
    }
}

/// Outcome of committing a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub batch_id: String,
    pub plan_id: String,
    pub ruleset_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per plan decision, in plan order
    pub entries: Vec<CommitEntry>,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub aborted_count: usize,
    pub cancelled: bool,
}

impl CommitReport {
    /// Whether every dispatched operation succeeded and nothing was cancelled
    pub fn success(&self) -> bool {
        self.failed_count == 0 && !self.cancelled
    }

    /// Collaborator error messages
    pub fn errors(&self) -> Vec<String> {
        self.entries.iter().filter_map(|e| e.error.clone()).collect()
    }

    fn tally(&mut self) {
        for entry in &self.entries {
            match entry.status {
                CommitStatus::Succeeded => self.succeeded_count += 1,
                CommitStatus::Failed => self.failed_count += 1,
                CommitStatus::Skipped => self.skipped_count += 1,
                CommitStatus::Aborted => self.aborted_count += 1,
                CommitStatus::Cancelled => self.cancelled = true,
            }
        }
    }
}

/// Executes plans with bounded concurrency
pub struct CommitExecutor {
    operations: Arc<dyn FileOperations>,
    concurrency: usize,
}

impl CommitExecutor {
    pub fn new(operations: Arc<dyn FileOperations>, concurrency: usize) -> Self {
        Self {
            operations,
            concurrency: concurrency.max(1),
        }
    }

    /// Dispatch every actionable decision. Cancellation is checked before each
    /// dispatch; operations already started run to completion.
    pub async fn commit(&self, plan: &OrganizePlan, cancel: &CancellationFlag) -> CommitReport {
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        tracing::info!(
            plan_id = %plan.id,
            decisions = plan.decisions.len(),
            concurrency = self.concurrency,
            "Committing plan"
        );

        let mut entries: Vec<Option<CommitEntry>> = vec![None; plan.decisions.len()];
        let mut handles = Vec::new();

        for (index, decision) in plan.decisions.iter().enumerate() {
            let (destination, replace) = match &decision.action {
                ResolvedAction::Skip => {
                    entries[index] = Some(CommitEntry::from_decision(decision, CommitStatus::Skipped, None));
                    continue;
                }
                ResolvedAction::Abort => {
                    entries[index] = Some(CommitEntry::from_decision(
                        decision,
                        CommitStatus::Aborted,
                        decision.detail.clone(),
                    ));
                    continue;
                }
                ResolvedAction::Proceed => (decision.proposed_destination.clone(), decision.replaces_existing()),
                ResolvedAction::RenameTo(path) => (path.clone(), false),
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    entries[index] = Some(CommitEntry::from_decision(
                        decision,
                        CommitStatus::Failed,
                        Some(format!("Scheduler closed: {}", e)),
                    ));
                    continue;
                }
            };

            if cancel.is_cancelled() {
                entries[index] = Some(CommitEntry::from_decision(decision, CommitStatus::Cancelled, None));
                continue;
            }

            let operations = Arc::clone(&self.operations);
            let source = decision.source.clone();
            let action = FileAction {
                kind: decision.rule_action,
                replace,
            };

            let handle = tokio::spawn(async move {
                let outcome = operations.execute(&source, &destination, action).await;
                drop(permit);
                outcome
            });
            handles.push((index, handle));
        }

        for (index, handle) in handles {
            let decision = &plan.decisions[index];
            let entry = match handle.await {
                Ok(outcome) if outcome.success => {
                    CommitEntry::from_decision(decision, CommitStatus::Succeeded, None)
                }
                Ok(outcome) => {
                    tracing::warn!(
                        source = %decision.source.display(),
                        error = outcome.error.as_deref().unwrap_or("unknown error"),
                        "File operation failed"
                    );
                    CommitEntry::from_decision(decision, CommitStatus::Failed, outcome.error)
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "File operation task panicked");
                    CommitEntry::from_decision(
                        decision,
                        CommitStatus::Failed,
                        Some(format!("Task panicked: {}", join_err)),
                    )
                }
            };
            entries[index] = Some(entry);
        }

        let mut report = CommitReport {
            batch_id: Uuid::new_v4().to_string(),
            plan_id: plan.id.clone(),
            ruleset_id: plan.ruleset_id.clone(),
            started_at,
            finished_at: Utc::now(),
            entries: entries.into_iter().flatten().collect(),
            succeeded_count: 0,
            failed_count: 0,
            skipped_count: 0,
            aborted_count: 0,
            cancelled: false,
        };
        report.tally();

        tracing::info!(
            batch_id = %report.batch_id,
            succeeded = report.succeeded_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            aborted = report.aborted_count,
            cancelled = report.cancelled,
            "Commit finished"
        );
        report
    }
}
