//! Pattern Library
//!
//! Keyed store of named, reusable patterns. Every mutation compiles the
//! expression first and only touches the library once compilation succeeded,
//! so an invalid pattern is never stored. Usage counters track how many rules
//! reference each pattern; a referenced pattern cannot be deleted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use uuid::Uuid;

use crate::error::{LibraryError, PersistenceError, ReferentialIntegrityError};
use crate::models::FileDescriptor;
use crate::store::{self, FORMAT_VERSION};

use super::ast::{ExpressionKind, MatchSpec};
use super::matcher::{self, MatchResult, SampleResult};
use super::parser::{parse_with, ParseOptions};

/// Persisted form of a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: String,
    pub name: String,
    pub kind: ExpressionKind,
    pub expression: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Samples that must match
    #[serde(default)]
    pub examples: Vec<String>,
    /// Samples that must not match
    #[serde(default)]
    pub counter_examples: Vec<String>,
    #[serde(default)]
    pub usage_count: u32,
    /// Overrides the engine-wide case sensitivity for this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(default)]
    pub revision: u64,
}

/// A pattern with its compiled spec
#[derive(Debug, Clone)]
pub struct Pattern {
    record: PatternRecord,
    spec: MatchSpec,
    digest: String,
}

impl Pattern {
    fn compile(record: PatternRecord, default_case_sensitive: bool) -> Result<Self, LibraryError> {
        let options = ParseOptions {
            case_sensitive: record.case_sensitive.unwrap_or(default_case_sensitive),
        };
        let spec = parse_with(&record.expression, record.kind, options)?;
        let digest = content_digest(record.kind, &record.expression, options.case_sensitive);
        Ok(Self { record, spec, digest })
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn kind(&self) -> ExpressionKind {
        self.record.kind
    }

    pub fn expression(&self) -> &str {
        &self.record.expression
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.record.tags
    }

    pub fn usage_count(&self) -> u32 {
        self.record.usage_count
    }

    pub fn revision(&self) -> u64 {
        self.record.revision
    }

    pub fn spec(&self) -> &MatchSpec {
        &self.spec
    }

    /// Hash of what decides matching: kind, expression and effective case
    /// sensitivity. Two patterns with equal digests match the same files.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn record(&self) -> &PatternRecord {
        &self.record
    }

    pub fn is_catch_all(&self) -> bool {
        self.spec.is_catch_all()
    }

    /// Evaluate this pattern against a file
    pub fn evaluate(&self, file: &FileDescriptor) -> MatchResult {
        matcher::matches(&self.spec, file).for_pattern(&self.record.id)
    }
}

fn content_digest(kind: ExpressionKind, expression: &str, case_sensitive: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(expression.as_bytes());
    hasher.update([0u8, u8::from(case_sensitive)]);
    format!("{:x}", hasher.finalize())
}

/// Input for creating a pattern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternDraft {
    pub name: String,
    pub kind: Option<ExpressionKind>,
    pub expression: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub counter_examples: Vec<String>,
    #[serde(default)]
    pub case_sensitive: Option<bool>,
}

impl PatternDraft {
    pub fn glob(name: &str, expression: &str) -> Self {
        Self::new(name, ExpressionKind::Glob, expression)
    }

    pub fn new(name: &str, kind: ExpressionKind, expression: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(kind),
            expression: expression.to_string(),
            ..Default::default()
        }
    }

    pub fn with_examples(mut self, examples: &[&str], counter_examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|s| s.to_string()).collect();
        self.counter_examples = counter_examples.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Partial update of a pattern; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternEdit {
    pub name: Option<String>,
    pub kind: Option<ExpressionKind>,
    pub expression: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub examples: Option<Vec<String>>,
    pub counter_examples: Option<Vec<String>>,
    pub case_sensitive: Option<Option<bool>>,
}

/// Outcome of running a pattern against its own examples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub pattern_id: String,
    /// Examples that should have matched but did not
    pub missed_examples: Vec<String>,
    /// Counter-examples that matched although they should not
    pub unexpected_matches: Vec<String>,
    pub results: Vec<SampleResult>,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.missed_examples.is_empty() && self.unexpected_matches.is_empty()
    }
}

/// Persisted form of the whole library
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternLibraryDocument {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub patterns: Vec<PatternRecord>,
}

/// Keyed store of patterns
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    patterns: BTreeMap<String, Pattern>,
    default_case_sensitive: bool,
}

impl PatternLibrary {
    pub fn new(default_case_sensitive: bool) -> Self {
        Self {
            patterns: BTreeMap::new(),
            default_case_sensitive,
        }
    }

    pub fn default_case_sensitive(&self) -> bool {
        self.default_case_sensitive
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.patterns.contains_key(id)
    }

    /// Patterns in id order
    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    /// Validate and store a new pattern, returning its id
    pub fn create(&mut self, draft: PatternDraft) -> Result<String, LibraryError> {
        self.ensure_unique_name(&draft.name, None)?;

        let record = PatternRecord {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            kind: draft.kind.unwrap_or(ExpressionKind::Glob),
            expression: draft.expression,
            tags: draft.tags,
            examples: draft.examples,
            counter_examples: draft.counter_examples,
            usage_count: 0,
            case_sensitive: draft.case_sensitive,
            revision: 1,
        };
        let pattern = Pattern::compile(record, self.default_case_sensitive)?;
        let id = pattern.id().to_string();

        tracing::debug!(pattern_id = %id, name = %pattern.name(), kind = pattern.kind().as_str(), "Created pattern");
        self.patterns.insert(id.clone(), pattern);
        Ok(id)
    }

    /// Apply an edit atomically: on error the stored pattern is unchanged
    pub fn update(&mut self, id: &str, edit: PatternEdit) -> Result<(), LibraryError> {
        let current = self
            .patterns
            .get(id)
            .ok_or_else(|| LibraryError::PatternNotFound(id.to_string()))?;

        if let Some(name) = &edit.name {
            self.ensure_unique_name(name, Some(id))?;
        }

        let mut record = current.record.clone();
        if let Some(name) = edit.name {
            record.name = name;
        }
        if let Some(kind) = edit.kind {
            record.kind = kind;
        }
        if let Some(expression) = edit.expression {
            record.expression = expression;
        }
        if let Some(tags) = edit.tags {
            record.tags = tags;
        }
        if let Some(examples) = edit.examples {
            record.examples = examples;
        }
        if let Some(counter_examples) = edit.counter_examples {
            record.counter_examples = counter_examples;
        }
        if let Some(case_sensitive) = edit.case_sensitive {
            record.case_sensitive = case_sensitive;
        }
        record.revision += 1;

        let pattern = Pattern::compile(record, self.default_case_sensitive)?;
        self.patterns.insert(id.to_string(), pattern);
        Ok(())
    }

    /// Remove an unreferenced pattern
    pub fn delete(&mut self, id: &str) -> Result<PatternRecord, LibraryError> {
        let pattern = self
            .patterns
            .get(id)
            .ok_or_else(|| LibraryError::PatternNotFound(id.to_string()))?;

        if pattern.usage_count() > 0 {
            return Err(ReferentialIntegrityError::PatternInUse {
                pattern_id: id.to_string(),
                usage_count: pattern.usage_count(),
            }
            .into());
        }

        let removed = self
            .patterns
            .remove(id)
            .map(|p| p.record)
            .ok_or_else(|| LibraryError::PatternNotFound(id.to_string()))?;
        tracing::debug!(pattern_id = %id, "Deleted pattern");
        Ok(removed)
    }

    /// Record one more rule referencing `id`
    pub fn acquire(&mut self, id: &str) -> Result<(), LibraryError> {
        let pattern = self
            .patterns
            .get_mut(id)
            .ok_or_else(|| LibraryError::PatternNotFound(id.to_string()))?;
        pattern.record.usage_count += 1;
        Ok(())
    }

    /// Record one rule fewer referencing `id`
    pub fn release(&mut self, id: &str) {
        if let Some(pattern) = self.patterns.get_mut(id) {
            pattern.record.usage_count = pattern.record.usage_count.saturating_sub(1);
        }
    }

    /// Recompute usage counters from the pattern ids referenced by rules
    pub fn recount_usage<'a>(&mut self, referenced: impl IntoIterator<Item = &'a str>) {
        for pattern in self.patterns.values_mut() {
            pattern.record.usage_count = 0;
        }
        for id in referenced {
            if let Some(pattern) = self.patterns.get_mut(id) {
                pattern.record.usage_count += 1;
            }
        }
    }

    /// Run a pattern against its examples and counter-examples
    pub fn self_test(&self, id: &str) -> Result<SelfTestReport, LibraryError> {
        let pattern = self
            .patterns
            .get(id)
            .ok_or_else(|| LibraryError::PatternNotFound(id.to_string()))?;

        let examples = matcher::test_samples(pattern.spec(), &pattern.record.examples);
        let counter = matcher::test_samples(pattern.spec(), &pattern.record.counter_examples);

        Ok(SelfTestReport {
            pattern_id: id.to_string(),
            missed_examples: examples
                .iter()
                .filter(|r| !r.matched)
                .map(|r| r.sample.clone())
                .collect(),
            unexpected_matches: counter
                .iter()
                .filter(|r| r.matched)
                .map(|r| r.sample.clone())
                .collect(),
            results: examples.into_iter().chain(counter).collect(),
        })
    }

    pub fn to_document(&self) -> PatternLibraryDocument {
        PatternLibraryDocument {
            format_version: FORMAT_VERSION,
            patterns: self.patterns.values().map(|p| p.record.clone()).collect(),
        }
    }

    /// Rebuild a library from its document, recompiling every pattern
    pub fn from_document(
        document: PatternLibraryDocument,
        default_case_sensitive: bool,
    ) -> Result<Self, PersistenceError> {
        store::check_version(document.format_version)?;

        let mut library = Self::new(default_case_sensitive);
        for mut record in document.patterns {
            // Version 0 documents carried no revision
            if record.revision == 0 {
                record.revision = 1;
            }
            let pattern = Pattern::compile(record, default_case_sensitive)?;
            library.patterns.insert(pattern.id().to_string(), pattern);
        }
        Ok(library)
    }

    pub fn load(path: &Path, default_case_sensitive: bool) -> Result<Self, PersistenceError> {
        let document: PatternLibraryDocument = store::load_json(path)?;
        Self::from_document(document, default_case_sensitive)
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        store::save_json(path, &self.to_document())
    }

    fn ensure_unique_name(&self, name: &str, except: Option<&str>) -> Result<(), LibraryError> {
        let taken = self
            .patterns
            .values()
            .any(|p| p.name() == name && Some(p.id()) != except);
        if taken {
            return Err(LibraryError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use tempfile::tempdir;

    fn library() -> PatternLibrary {
        PatternLibrary::new(true)
    }

    #[test]
    fn test_create_and_lookup() {
        let mut lib = library();
        let id = lib
            .create(PatternDraft::glob("Images", "*.{jpg,png}").with_tags(&["media"]))
            .unwrap();

        let pattern = lib.get(&id).unwrap();
        assert_eq!(pattern.name(), "Images");
        assert_eq!(pattern.revision(), 1);
        assert!(pattern.tags().contains("media"));
    }

    #[test]
    fn test_invalid_pattern_not_stored() {
        let mut lib = library();
        let err = lib.create(PatternDraft::glob("Broken", "*.{jpg")).unwrap_err();
        assert!(matches!(err, LibraryError::Parse(ParseError::InvalidSyntax { .. })));
        assert!(lib.is_empty());

        let err = lib.create(PatternDraft::glob("Empty", "")).unwrap_err();
        assert_eq!(err, LibraryError::Parse(ParseError::EmptyExpression));
    }

    #[test]
    fn test_update_is_atomic() {
        let mut lib = library();
        let id = lib.create(PatternDraft::glob("Docs", "*.pdf")).unwrap();

        let err = lib
            .update(
                &id,
                PatternEdit {
                    name: Some("Renamed".to_string()),
                    expression: Some(r"bad\x".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LibraryError::Parse(ParseError::InvalidEscape { .. })));

        let pattern = lib.get(&id).unwrap();
        assert_eq!(pattern.name(), "Docs");
        assert_eq!(pattern.expression(), "*.pdf");
        assert_eq!(pattern.revision(), 1);

        lib.update(
            &id,
            PatternEdit {
                expression: Some("*.{pdf,docx}".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(lib.get(&id).unwrap().revision(), 2);
    }

    #[test]
    fn test_digest_follows_matching_inputs() {
        let mut lib = library();
        let id = lib.create(PatternDraft::glob("Docs", "*.pdf")).unwrap();
        let before = lib.get(&id).unwrap().digest().to_string();

        lib.update(
            &id,
            PatternEdit {
                tags: Some(BTreeSet::from(["work".to_string()])),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(lib.get(&id).unwrap().digest(), before);

        lib.update(
            &id,
            PatternEdit {
                case_sensitive: Some(Some(false)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_ne!(lib.get(&id).unwrap().digest(), before);

        // Same id and revision, different expression
        let mut document = lib.to_document();
        document.patterns[0].expression = "*.txt".to_string();
        let reloaded = PatternLibrary::from_document(document, true).unwrap();
        assert_eq!(reloaded.get(&id).unwrap().revision(), lib.get(&id).unwrap().revision());
        assert_ne!(reloaded.get(&id).unwrap().digest(), lib.get(&id).unwrap().digest());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut lib = library();
        lib.create(PatternDraft::glob("Docs", "*.pdf")).unwrap();
        let err = lib.create(PatternDraft::glob("Docs", "*.txt")).unwrap_err();
        assert_eq!(err, LibraryError::DuplicateName("Docs".to_string()));
    }

    #[test]
    fn test_delete_guarded_by_usage() {
        let mut lib = library();
        let id = lib.create(PatternDraft::glob("Docs", "*.pdf")).unwrap();
        lib.acquire(&id).unwrap();

        let err = lib.delete(&id).unwrap_err();
        assert_eq!(
            err,
            LibraryError::Integrity(ReferentialIntegrityError::PatternInUse {
                pattern_id: id.clone(),
                usage_count: 1
            })
        );
        assert!(lib.contains(&id));

        lib.release(&id);
        lib.delete(&id).unwrap();
        assert!(!lib.contains(&id));
    }

    #[test]
    fn test_self_test_round_trip() {
        let mut lib = library();
        let id = lib
            .create(
                PatternDraft::glob("Raw photos", "{IMG,DSC}_*.{cr2,nef}")
                    .with_examples(&["IMG_001.cr2", "shoot/DSC_9.nef"], &["IMG_001.jpg", "PXL_1.cr2"]),
            )
            .unwrap();
        let report = lib.self_test(&id).unwrap();
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.results.len(), 4);

        let id = lib
            .create(PatternDraft::glob("Wrong", "*.txt").with_examples(&["a.md"], &["b.txt"]))
            .unwrap();
        let report = lib.self_test(&id).unwrap();
        assert_eq!(report.missed_examples, vec!["a.md".to_string()]);
        assert_eq!(report.unexpected_matches, vec!["b.txt".to_string()]);
    }

    #[test]
    fn test_per_pattern_case_override() {
        let mut lib = library();
        let mut draft = PatternDraft::glob("Any case", "*.JPG");
        draft.case_sensitive = Some(false);
        let id = lib.create(draft).unwrap();

        let file = FileDescriptor::synthetic("photo.jpg", 1, None);
        let result = lib.get(&id).unwrap().evaluate(&file);
        assert!(result.matched);
        assert_eq!(result.pattern_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_recount_usage() {
        let mut lib = library();
        let a = lib.create(PatternDraft::glob("A", "*.a")).unwrap();
        let b = lib.create(PatternDraft::glob("B", "*.b")).unwrap();
        lib.recount_usage([a.as_str(), a.as_str(), "missing"]);
        assert_eq!(lib.get(&a).unwrap().usage_count(), 2);
        assert_eq!(lib.get(&b).unwrap().usage_count(), 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patterns.json");

        let mut lib = library();
        let id = lib
            .create(PatternDraft::new("Big", ExpressionKind::Compound, "size > 1MB"))
            .unwrap();
        lib.acquire(&id).unwrap();
        lib.save(&path).unwrap();

        let loaded = PatternLibrary::load(&path, true).unwrap();
        let pattern = loaded.get(&id).unwrap();
        assert_eq!(pattern.record(), lib.get(&id).unwrap().record());
        assert_eq!(pattern.kind(), ExpressionKind::Compound);
    }

    #[test]
    fn test_load_legacy_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        std::fs::write(
            &path,
            r#"{"patterns": [{"id": "p1", "name": "Docs", "kind": "glob", "expression": "*.pdf"}]}"#,
        )
        .unwrap();

        let lib = PatternLibrary::load(&path, true).unwrap();
        let pattern = lib.get("p1").unwrap();
        assert_eq!(pattern.revision(), 1);
        assert_eq!(pattern.usage_count(), 0);
        assert!(pattern.tags().is_empty());
    }
}
