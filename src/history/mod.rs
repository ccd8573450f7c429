//! Batch history
//!
//! Every committed plan can be recorded as a journal under
//! `<root>/history/<batch-id>.json`. A journal keeps the entries of the
//! commit report so a batch can be rolled back later: successful moves are
//! replayed in reverse order, destination back to source. Copies are left
//! alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{EngineError, PersistenceError};
use crate::execution::{CommitEntry, CommitReport, CommitStatus, FileAction, FileOperations};
use crate::rules::RuleAction;
use crate::store::{self, FORMAT_VERSION};

/// Persisted record of one committed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJournal {
    #[serde(default)]
    pub format_version: u32,
    pub batch_id: String,
    pub plan_id: String,
    pub ruleset_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub undone_at: Option<DateTime<Utc>>,
    pub entries: Vec<CommitEntry>,
}

impl BatchJournal {
    pub fn from_report(report: &CommitReport) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            batch_id: report.batch_id.clone(),
            plan_id: report.plan_id.clone(),
            ruleset_id: report.ruleset_id.clone(),
            created_at: report.finished_at,
            undone_at: None,
            entries: report.entries.clone(),
        }
    }

    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }

    /// Moves that can be reversed, most recent first
    pub fn undoable(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.status == CommitStatus::Succeeded && e.rule_action == RuleAction::Move)
            .filter_map(|e| e.destination.as_deref().map(|dest| (e.source.as_path(), dest)))
    }
}

/// Short listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub ruleset_id: String,
    pub created_at: DateTime<Utc>,
    pub files: usize,
    pub undone: bool,
}

/// Outcome of rolling back a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoReport {
    pub batch_id: String,
    pub restored: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl UndoReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Journals live in `<root>/history`
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join("history"),
        }
    }

    /// `<data dir>/sentinel`
    pub fn default_root() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("sentinel"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Batch ids are UUIDs; anything else never reaches the filesystem
    fn journal_path(&self, batch_id: &str) -> Result<PathBuf, PersistenceError> {
        let id = Uuid::parse_str(batch_id)
            .map_err(|_| PersistenceError::InvalidBatchId(batch_id.to_string()))?;
        Ok(self.dir.join(format!("{}.json", id.hyphenated())))
    }

    /// Write a journal for a commit report
    pub fn record(&self, report: &CommitReport) -> Result<PathBuf, PersistenceError> {
        let path = self.journal_path(&report.batch_id)?;
        std::fs::create_dir_all(&self.dir)?;
        store::save_json(&path, &BatchJournal::from_report(report))?;
        tracing::info!(batch_id = %report.batch_id, entries = report.entries.len(), "Recorded batch");
        Ok(path)
    }

    /// Load a journal; `None` when the batch is unknown
    pub fn load(&self, batch_id: &str) -> Result<Option<BatchJournal>, PersistenceError> {
        let path = self.journal_path(batch_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let journal: BatchJournal = store::load_json(&path)?;
        store::check_version(journal.format_version)?;
        Ok(Some(journal))
    }

    /// All recorded batches, newest first
    pub fn list(&self) -> Result<Vec<BatchSummary>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(batch_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(batch_id) {
                Ok(Some(journal)) => summaries.push(BatchSummary {
                    batch_id: journal.batch_id.clone(),
                    ruleset_id: journal.ruleset_id.clone(),
                    created_at: journal.created_at,
                    files: journal.entries.len(),
                    undone: journal.is_undone(),
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable journal"),
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.batch_id.cmp(&b.batch_id)));
        Ok(summaries)
    }

    /// Move every file of a batch back where it came from. The journal is
    /// marked undone even when some moves fail; failures are reported.
    pub async fn undo_batch(
        &self,
        batch_id: &str,
        operations: &dyn FileOperations,
    ) -> Result<UndoReport, EngineError> {
        let mut journal = self
            .load(batch_id)?
            .ok_or_else(|| EngineError::History(format!("Batch not found: {}", batch_id)))?;
        if journal.is_undone() {
            return Err(EngineError::History(format!("Batch already undone: {}", batch_id)));
        }

        let mut report = UndoReport {
            batch_id: batch_id.to_string(),
            ..Default::default()
        };

        let moves: Vec<(PathBuf, PathBuf)> = journal
            .undoable()
            .map(|(source, dest)| (source.to_path_buf(), dest.to_path_buf()))
            .collect();

        for (source, destination) in moves {
            let outcome = operations
                .execute(&destination, &source, FileAction::new(RuleAction::Move))
                .await;
            if outcome.success {
                report.restored += 1;
            } else {
                report.failed += 1;
                report.errors.push(format!(
                    "{} -> {}: {}",
                    destination.display(),
                    source.display(),
                    outcome.error.unwrap_or_default()
                ));
            }
        }

        journal.undone_at = Some(Utc::now());
        store::save_json(&self.journal_path(batch_id)?, &journal)?;

        tracing::info!(
            batch_id,
            restored = report.restored,
            failed = report.failed,
            "Batch undone"
        );
        Ok(report)
    }
}
