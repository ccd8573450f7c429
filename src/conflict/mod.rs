//! Conflict resolution
//!
//! Decides what happens to each routed file once every proposed destination
//! of a batch is known: proceed, rename to a free sibling, skip, or abort.
//! Two kinds of collision are detected: the destination already exists on
//! disk, or an earlier file of the same batch already claimed it.
//!
//! Proposals are resolved in sorted source order so the outcome never depends
//! on how planning was scheduled.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::hash_file;
use crate::rules::RuleAction;

/// Default number of `stem (n).ext` candidates tried before aborting
pub const DEFAULT_MAX_RENAME_ATTEMPTS: u32 = 99;

/// How a collision is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Skip,
    /// Replace the existing file
    Overwrite,
    /// Pick `stem (n).ext`
    #[default]
    Rename,
    Abort,
}

/// Whether one aborted file aborts the whole batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    #[default]
    Independent,
    AllOrNothing,
}

/// Final action for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "path")]
pub enum ResolvedAction {
    Proceed,
    RenameTo(PathBuf),
    Skip,
    Abort,
}

/// Which collision, if any, the proposed destination ran into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictClass {
    #[default]
    None,
    ExistsOnDisk,
    IntraBatch,
    Both,
}

impl ConflictClass {
    pub fn from_flags(exists_on_disk: bool, claimed_in_batch: bool) -> Self {
        match (exists_on_disk, claimed_in_batch) {
            (false, false) => ConflictClass::None,
            (true, false) => ConflictClass::ExistsOnDisk,
            (false, true) => ConflictClass::IntraBatch,
            (true, true) => ConflictClass::Both,
        }
    }

    pub fn exists_on_disk(&self) -> bool {
        matches!(self, ConflictClass::ExistsOnDisk | ConflictClass::Both)
    }
}

/// A file routed by a rule, waiting for resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCandidate {
    pub source: PathBuf,
    /// Source path relative to the scanned directory; the resolution order key
    pub relative_path: String,
    pub destination: PathBuf,
    pub rule_id: String,
    pub rule_action: RuleAction,
    pub destination_exists: bool,
    pub claimed_in_batch: bool,
}

impl ConflictCandidate {
    pub fn new(
        source: PathBuf,
        relative_path: &str,
        destination: PathBuf,
        rule_id: &str,
        rule_action: RuleAction,
    ) -> Self {
        Self {
            source,
            relative_path: relative_path.to_string(),
            destination,
            rule_id: rule_id.to_string(),
            rule_action,
            destination_exists: false,
            claimed_in_batch: false,
        }
    }
}

/// Resolution of one routed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDecision {
    pub source: PathBuf,
    pub relative_path: String,
    pub proposed_destination: PathBuf,
    pub action: ResolvedAction,
    pub strategy: ConflictStrategy,
    pub conflict: ConflictClass,
    pub rule_id: String,
    pub rule_action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ConflictDecision {
    /// Where the file ends up if the decision is carried out
    pub fn final_destination(&self) -> Option<&Path> {
        match &self.action {
            ResolvedAction::Proceed => Some(&self.proposed_destination),
            ResolvedAction::RenameTo(path) => Some(path),
            ResolvedAction::Skip | ResolvedAction::Abort => None,
        }
    }

    /// Whether carrying out the decision replaces an existing file
    pub fn replaces_existing(&self) -> bool {
        self.action == ResolvedAction::Proceed && self.conflict.exists_on_disk()
    }
}

/// An aborted file, reported in the plan summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictError {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub conflict: ConflictClass,
    pub message: String,
}

/// Destinations claimed so far in the current batch
#[derive(Debug, Clone, Default)]
pub struct BatchLedger {
    claimed: HashSet<String>,
    case_sensitive: bool,
}

impl BatchLedger {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            claimed: HashSet::new(),
            case_sensitive,
        }
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(&self.key(path))
    }

    /// Returns false when the path was already claimed
    pub fn claim(&mut self, path: &Path) -> bool {
        let key = self.key(path);
        self.claimed.insert(key)
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    fn key(&self, path: &Path) -> String {
        let raw = path.to_string_lossy();
        if self.case_sensitive {
            raw.into_owned()
        } else {
            raw.to_lowercase()
        }
    }
}

/// Applies a strategy to collisions
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    pub strategy: ConflictStrategy,
    pub max_rename_attempts: u32,
    /// Skip when the existing destination has the same content as the source
    pub skip_identical: bool,
    pub case_sensitive: bool,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self {
            strategy: ConflictStrategy::default(),
            max_rename_attempts: DEFAULT_MAX_RENAME_ATTEMPTS,
            skip_identical: false,
            case_sensitive: crate::pattern::native_case_sensitive(),
        }
    }
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Resolve one candidate against the disk and the batch ledger, claiming
    /// the final destination when the file will be written
    pub fn resolve(&self, candidate: &ConflictCandidate, ledger: &mut BatchLedger) -> ConflictDecision {
        let conflict =
            ConflictClass::from_flags(candidate.destination_exists, candidate.claimed_in_batch);
        let decision = |action: ResolvedAction, detail: Option<String>| ConflictDecision {
            source: candidate.source.clone(),
            relative_path: candidate.relative_path.clone(),
            proposed_destination: candidate.destination.clone(),
            action,
            strategy: self.strategy,
            conflict,
            rule_id: candidate.rule_id.clone(),
            rule_action: candidate.rule_action,
            detail,
        };

        if same_path(&candidate.source, &candidate.destination, self.case_sensitive) {
            return decision(ResolvedAction::Skip, Some("already in place".to_string()));
        }

        if conflict == ConflictClass::None {
            ledger.claim(&candidate.destination);
            return decision(ResolvedAction::Proceed, None);
        }

        if self.skip_identical && conflict == ConflictClass::ExistsOnDisk && self.identical(candidate) {
            return decision(ResolvedAction::Skip, Some("identical file already at destination".to_string()));
        }

        match self.strategy {
            ConflictStrategy::Skip => decision(ResolvedAction::Skip, None),
            ConflictStrategy::Abort => decision(
                ResolvedAction::Abort,
                Some(format!("destination {} is taken", candidate.destination.display())),
            ),
            ConflictStrategy::Overwrite => {
                if candidate.claimed_in_batch {
                    decision(
                        ResolvedAction::Skip,
                        Some("destination claimed by an earlier file in this batch".to_string()),
                    )
                } else {
                    ledger.claim(&candidate.destination);
                    decision(ResolvedAction::Proceed, None)
                }
            }
            ConflictStrategy::Rename => match self.free_sibling(&candidate.destination, ledger) {
                Some(path) => {
                    ledger.claim(&path);
                    decision(ResolvedAction::RenameTo(path), None)
                }
                None => decision(
                    ResolvedAction::Abort,
                    Some(format!(
                        "no free name after {} rename attempts",
                        self.max_rename_attempts
                    )),
                ),
            },
        }
    }

    /// Resolve a whole batch. Candidates are sorted by source relative path,
    /// disk existence and intra-batch claims are filled in, and in
    /// all-or-nothing mode one abort turns every decision into an abort.
    pub fn resolve_batch(
        &self,
        mut candidates: Vec<ConflictCandidate>,
        batch_mode: BatchMode,
    ) -> Vec<ConflictDecision> {
        candidates.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        let mut ledger = BatchLedger::new(self.case_sensitive);
        let mut decisions: Vec<ConflictDecision> = candidates
            .iter_mut()
            .map(|candidate| {
                candidate.destination_exists = candidate.destination.exists();
                candidate.claimed_in_batch = ledger.is_claimed(&candidate.destination);
                self.resolve(candidate, &mut ledger)
            })
            .collect();

        let aborted = decisions
            .iter()
            .filter(|d| d.action == ResolvedAction::Abort)
            .count();

        if aborted > 0 && batch_mode == BatchMode::AllOrNothing {
            tracing::warn!(aborted, total = decisions.len(), "Aborting whole batch");
            for decision in decisions.iter_mut() {
                // Files already in place are not part of the batch's changes
                let in_place =
                    same_path(&decision.source, &decision.proposed_destination, self.case_sensitive);
                if decision.action != ResolvedAction::Abort && !in_place {
                    decision.action = ResolvedAction::Abort;
                    decision.detail = Some(format!("batch aborted: {} file(s) could not be placed", aborted));
                }
            }
        }

        decisions
    }

    fn identical(&self, candidate: &ConflictCandidate) -> bool {
        match (hash_file(&candidate.source), hash_file(&candidate.destination)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn free_sibling(&self, destination: &Path, ledger: &BatchLedger) -> Option<PathBuf> {
        (1..=self.max_rename_attempts)
            .map(|n| numbered_sibling(destination, n))
            .find(|path| !path.exists() && !ledger.is_claimed(path))
    }
}

/// `dir/photo.jpg` -> `dir/photo (n).jpg`; dotfiles and extensionless names get the suffix at the end
pub fn numbered_sibling(path: &Path, n: u32) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let renamed = match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{} ({}){}", &name[..idx], n, &name[idx..]),
        _ => format!("{} ({})", name, n),
    };
    path.with_file_name(renamed)
}

fn same_path(a: &Path, b: &Path, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn resolver(strategy: ConflictStrategy) -> ConflictResolver {
        ConflictResolver {
            strategy,
            case_sensitive: true,
            ..Default::default()
        }
    }

    fn candidate(dir: &Path, source: &str, destination: &str) -> ConflictCandidate {
        ConflictCandidate::new(
            dir.join(source),
            source,
            dir.join(destination),
            "rule-1",
            RuleAction::Move,
        )
    }

    #[test]
    fn test_numbered_sibling() {
        assert_eq!(numbered_sibling(Path::new("/a/photo.jpg"), 1), PathBuf::from("/a/photo (1).jpg"));
        assert_eq!(numbered_sibling(Path::new("/a/archive.tar.gz"), 2), PathBuf::from("/a/archive.tar (2).gz"));
        assert_eq!(numbered_sibling(Path::new("/a/README"), 3), PathBuf::from("/a/README (3)"));
        assert_eq!(numbered_sibling(Path::new("/a/.env"), 1), PathBuf::from("/a/.env (1)"));
    }

    #[test]
    fn test_no_conflict_proceeds() {
        let dir = tempdir().unwrap();
        let decisions = resolver(ConflictStrategy::Rename)
            .resolve_batch(vec![candidate(dir.path(), "a.txt", "out/a.txt")], BatchMode::Independent);
        assert_eq!(decisions[0].action, ResolvedAction::Proceed);
        assert_eq!(decisions[0].conflict, ConflictClass::None);
    }

    #[test]
    fn test_rename_skips_existing_and_claimed() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("out/photo.jpg"), "existing").unwrap();

        let decisions = resolver(ConflictStrategy::Rename).resolve_batch(
            vec![
                candidate(dir.path(), "b/photo.jpg", "out/photo.jpg"),
                candidate(dir.path(), "a/photo.jpg", "out/photo.jpg"),
            ],
            BatchMode::Independent,
        );

        // Sorted by source: a/ before b/
        assert_eq!(decisions[0].relative_path, "a/photo.jpg");
        assert_eq!(
            decisions[0].action,
            ResolvedAction::RenameTo(dir.path().join("out/photo (1).jpg"))
        );
        assert_eq!(decisions[0].conflict, ConflictClass::ExistsOnDisk);
        assert_eq!(
            decisions[1].action,
            ResolvedAction::RenameTo(dir.path().join("out/photo (2).jpg"))
        );
    }

    #[test]
    fn test_intra_batch_first_claimant_proceeds() {
        let dir = tempdir().unwrap();
        let decisions = resolver(ConflictStrategy::Skip).resolve_batch(
            vec![
                candidate(dir.path(), "y.txt", "out/same.txt"),
                candidate(dir.path(), "x.txt", "out/same.txt"),
            ],
            BatchMode::Independent,
        );
        assert_eq!(decisions[0].relative_path, "x.txt");
        assert_eq!(decisions[0].action, ResolvedAction::Proceed);
        assert_eq!(decisions[1].action, ResolvedAction::Skip);
        assert_eq!(decisions[1].conflict, ConflictClass::IntraBatch);
    }

    #[test]
    fn test_overwrite_only_replaces_disk_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("taken.txt"), "old").unwrap();

        let decisions = resolver(ConflictStrategy::Overwrite).resolve_batch(
            vec![
                candidate(dir.path(), "a.txt", "taken.txt"),
                candidate(dir.path(), "b.txt", "taken.txt"),
            ],
            BatchMode::Independent,
        );
        assert_eq!(decisions[0].action, ResolvedAction::Proceed);
        assert!(decisions[0].replaces_existing());
        assert_eq!(decisions[1].action, ResolvedAction::Skip);
        assert_eq!(decisions[1].conflict, ConflictClass::Both);
    }

    #[test]
    fn test_rename_exhaustion_aborts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "").unwrap();
        fs::write(dir.path().join("f (1).txt"), "").unwrap();

        let resolver = ConflictResolver {
            max_rename_attempts: 1,
            ..resolver(ConflictStrategy::Rename)
        };
        let decisions = resolver.resolve_batch(
            vec![candidate(dir.path(), "src/f.txt", "f.txt")],
            BatchMode::Independent,
        );
        assert_eq!(decisions[0].action, ResolvedAction::Abort);
    }

    #[test]
    fn test_all_or_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("taken.txt"), "").unwrap();

        let batch = vec![
            candidate(dir.path(), "a.txt", "out/a.txt"),
            candidate(dir.path(), "b.txt", "taken.txt"),
        ];

        let independent = resolver(ConflictStrategy::Abort).resolve_batch(batch.clone(), BatchMode::Independent);
        assert_eq!(independent[0].action, ResolvedAction::Proceed);
        assert_eq!(independent[1].action, ResolvedAction::Abort);

        let strict = resolver(ConflictStrategy::Abort).resolve_batch(batch, BatchMode::AllOrNothing);
        assert!(strict.iter().all(|d| d.action == ResolvedAction::Abort));
    }

    #[test]
    fn test_all_or_nothing_keeps_files_in_place() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Docs")).unwrap();
        fs::write(dir.path().join("Docs/a.txt"), "a").unwrap();
        fs::write(dir.path().join("Docs/b.txt"), "b").unwrap();

        // Rerun over an organized tree: nothing to do, nothing aborts
        let rerun = vec![
            candidate(dir.path(), "Docs/a.txt", "Docs/a.txt"),
            candidate(dir.path(), "Docs/b.txt", "Docs/b.txt"),
        ];
        let decisions = resolver(ConflictStrategy::Abort).resolve_batch(rerun, BatchMode::AllOrNothing);
        assert!(decisions.iter().all(|d| d.action == ResolvedAction::Skip));

        // A real abort elsewhere leaves the in-place file alone
        fs::write(dir.path().join("c.txt"), "c").unwrap();
        let mixed = vec![
            candidate(dir.path(), "Docs/a.txt", "Docs/a.txt"),
            candidate(dir.path(), "c.txt", "Docs/b.txt"),
            candidate(dir.path(), "d.txt", "Docs/d.txt"),
        ];
        let decisions = resolver(ConflictStrategy::Abort).resolve_batch(mixed, BatchMode::AllOrNothing);
        assert_eq!(decisions[0].action, ResolvedAction::Skip);
        assert_eq!(decisions[0].detail.as_deref(), Some("already in place"));
        assert_eq!(decisions[1].action, ResolvedAction::Abort);
        assert_eq!(decisions[2].action, ResolvedAction::Abort);
    }

    #[test]
    fn test_destination_equal_to_source_skips() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let decisions = resolver(ConflictStrategy::Overwrite)
            .resolve_batch(vec![candidate(dir.path(), "a.txt", "a.txt")], BatchMode::Independent);
        assert_eq!(decisions[0].action, ResolvedAction::Skip);
        assert_eq!(decisions[0].detail.as_deref(), Some("already in place"));
    }

    #[test]
    fn test_skip_identical() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("out")).unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();
        fs::write(dir.path().join("out/a.txt"), "same").unwrap();
        fs::write(dir.path().join("b.txt"), "new").unwrap();
        fs::write(dir.path().join("out/b.txt"), "old").unwrap();

        let resolver = ConflictResolver {
            skip_identical: true,
            ..resolver(ConflictStrategy::Rename)
        };
        let decisions = resolver.resolve_batch(
            vec![
                candidate(dir.path(), "a.txt", "out/a.txt"),
                candidate(dir.path(), "b.txt", "out/b.txt"),
            ],
            BatchMode::Independent,
        );
        assert_eq!(decisions[0].action, ResolvedAction::Skip);
        assert!(matches!(decisions[1].action, ResolvedAction::RenameTo(_)));
    }
}
