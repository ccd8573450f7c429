//! Evaluation of compiled specs against file descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{FileDescriptor, Fingerprint};

use super::ast::{MatchScope, MatchSpec, Predicate, RegexSpec};
use super::glob::GlobProgram;

/// Outcome of evaluating one pattern against one file. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// None for ad-hoc evaluations outside the library
    pub pattern_id: Option<String>,
    pub fingerprint: Fingerprint,
    pub matched: bool,
    pub captures: BTreeMap<String, String>,
}

impl MatchResult {
    pub fn for_pattern(mut self, pattern_id: &str) -> Self {
        self.pattern_id = Some(pattern_id.to_string());
        self
    }
}

/// Evaluate `spec` against `file`
pub fn matches(spec: &MatchSpec, file: &FileDescriptor) -> MatchResult {
    let captures = match spec {
        MatchSpec::Glob(glob) => glob_captures(glob, file),
        MatchSpec::Regex(regex) => regex_captures(regex, file),
        MatchSpec::Compound(compound) => evaluate_all(&compound.predicates, file),
    };

    MatchResult {
        pattern_id: None,
        fingerprint: file.fingerprint.clone(),
        matched: captures.is_some(),
        captures: captures.unwrap_or_default(),
    }
}

/// AND of predicates, short-circuiting in declaration order.
/// Returns the merged captures of name predicates on success.
pub fn evaluate_all(
    predicates: &[Predicate],
    file: &FileDescriptor,
) -> Option<BTreeMap<String, String>> {
    let mut captures = BTreeMap::new();
    for predicate in predicates {
        captures.extend(evaluate_predicate(predicate, file)?);
    }
    Some(captures)
}

fn evaluate_predicate(
    predicate: &Predicate,
    file: &FileDescriptor,
) -> Option<BTreeMap<String, String>> {
    let passed = match predicate {
        Predicate::NameGlob(glob) => return glob_captures(glob, file),
        Predicate::NameRegex(regex) => return regex_captures(regex, file),
        Predicate::MinSize { bytes, inclusive } => {
            if *inclusive {
                file.size >= *bytes
            } else {
                file.size > *bytes
            }
        }
        Predicate::MaxSize { bytes, inclusive } => {
            if *inclusive {
                file.size <= *bytes
            } else {
                file.size < *bytes
            }
        }
        Predicate::ModifiedAfter { at_ms, inclusive } => match file.modified_at {
            Some(modified) if *inclusive => modified >= *at_ms,
            Some(modified) => modified > *at_ms,
            None => false,
        },
        Predicate::ModifiedBefore { at_ms, inclusive } => match file.modified_at {
            Some(modified) if *inclusive => modified <= *at_ms,
            Some(modified) => modified < *at_ms,
            None => false,
        },
        Predicate::ExtensionIn(set) => file
            .extension
            .as_ref()
            .is_some_and(|ext| set.contains(&ext.to_lowercase())),
    };

    passed.then(BTreeMap::new)
}

fn target(scope: MatchScope, file: &FileDescriptor) -> &str {
    match scope {
        MatchScope::Name => &file.name,
        MatchScope::Path => &file.relative_path,
    }
}

fn glob_captures(glob: &GlobProgram, file: &FileDescriptor) -> Option<BTreeMap<String, String>> {
    glob.captures(target(glob.scope(), file))
        .map(|caps| caps.into_iter().collect())
}

fn regex_captures(spec: &RegexSpec, file: &FileDescriptor) -> Option<BTreeMap<String, String>> {
    let caps = spec.regex.captures(target(spec.scope, file))?;
    Some(
        spec.capture_names
            .iter()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect(),
    )
}

/// Result of running a spec against one sample path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleResult {
    pub sample: String,
    pub matched: bool,
    pub captures: BTreeMap<String, String>,
}

/// Run a spec against sample relative paths (size 0, no mtime)
pub fn test_samples<S: AsRef<str>>(spec: &MatchSpec, samples: &[S]) -> Vec<SampleResult> {
    samples
        .iter()
        .map(|sample| {
            let file = FileDescriptor::synthetic(sample.as_ref(), 0, None);
            let result = matches(spec, &file);
            SampleResult {
                sample: sample.as_ref().to_string(),
                matched: result.matched,
                captures: result.captures,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ast::ExpressionKind;
    use crate::pattern::parser::{parse_with, ParseOptions};

    fn spec(raw: &str, kind: ExpressionKind) -> MatchSpec {
        parse_with(raw, kind, ParseOptions { case_sensitive: true }).unwrap()
    }

    fn file(path: &str, size: u64, modified_at: Option<i64>) -> FileDescriptor {
        FileDescriptor::synthetic(path, size, modified_at)
    }

    #[test]
    fn test_glob_name_scope_ignores_directories() {
        let s = spec("*.pdf", ExpressionKind::Glob);
        assert!(matches(&s, &file("docs/2024/report.pdf", 1, None)).matched);
        assert!(!matches(&s, &file("docs/report.txt", 1, None)).matched);
    }

    #[test]
    fn test_glob_path_scope() {
        let s = spec("inbox/**/*.{ext}", ExpressionKind::Glob);
        let result = matches(&s, &file("inbox/a/b/scan.png", 1, None));
        assert!(result.matched);
        assert_eq!(result.captures.get("ext").map(String::as_str), Some("png"));
        assert!(!matches(&s, &file("outbox/scan.png", 1, None)).matched);
    }

    #[test]
    fn test_regex_captures_only_participating_groups() {
        let s = spec(r"^(?P<prefix>IMG|DSC)_(?P<num>\d+)(?P<edit>-edited)?\.jpg$", ExpressionKind::Regex);
        let result = matches(&s, &file("IMG_0042.jpg", 1, None));
        assert!(result.matched);
        assert_eq!(result.captures.get("num").map(String::as_str), Some("0042"));
        assert!(!result.captures.contains_key("edit"));
    }

    #[test]
    fn test_compound_all_predicates_must_pass() {
        let s = spec(
            "name GLOB '*.{ext}' AND size >= 1KB AND modified > '2024-01-01' AND ext IN ['jpg']",
            ExpressionKind::Compound,
        );
        let jan_2 = 1_704_153_600_000;
        let hit = matches(&s, &file("a.jpg", 2048, Some(jan_2)));
        assert!(hit.matched);
        assert_eq!(hit.captures.get("ext").map(String::as_str), Some("jpg"));

        assert!(!matches(&s, &file("a.jpg", 10, Some(jan_2))).matched);
        assert!(!matches(&s, &file("a.jpg", 2048, Some(0))).matched);
        assert!(!matches(&s, &file("a.jpg", 2048, None)).matched);
        assert!(!matches(&s, &file("a.png", 2048, Some(jan_2))).matched);
    }

    #[test]
    fn test_size_bounds_inclusive_and_exclusive() {
        let s = spec("size >= 10 AND size < 20", ExpressionKind::Compound);
        assert!(matches(&s, &file("x", 10, None)).matched);
        assert!(matches(&s, &file("x", 19, None)).matched);
        assert!(!matches(&s, &file("x", 20, None)).matched);
        assert!(!matches(&s, &file("x", 9, None)).matched);
    }

    #[test]
    fn test_deterministic_results() {
        let s = spec("{year}-{rest}.txt", ExpressionKind::Glob);
        let f = file("2024-notes-final.txt", 1, None);
        let first = matches(&s, &f);
        for _ in 0..10 {
            assert_eq!(matches(&s, &f), first);
        }
    }

    #[test]
    fn test_samples() {
        let s = spec("*.jpg", ExpressionKind::Glob);
        let results = super::test_samples(&s, &["a.jpg", "b.png"]);
        assert!(results[0].matched);
        assert!(!results[1].matched);
    }
}
