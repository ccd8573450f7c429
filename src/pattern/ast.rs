//! Abstract Syntax Tree types for pattern expressions.
//!
//! A pattern's raw expression is parsed into a [`MatchSpec`], one compiled
//! representation per [`ExpressionKind`]. Compound expressions use a small
//! predicate DSL whose fields, operators and values are described here.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::glob::GlobProgram;

/// The syntax family of a pattern expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionKind {
    /// `*.jpg`, `photos/**/{year}/*.{ext}`
    Glob,
    /// `^IMG_(?P<num>\d+)\.jpe?g$`
    Regex,
    /// `name GLOB '*.jpg' AND size > 1MB`
    Compound,
}

impl ExpressionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionKind::Glob => "glob",
            ExpressionKind::Regex => "regex",
            ExpressionKind::Compound => "compound",
        }
    }
}

/// What part of the file a name pattern is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    /// The file name only
    Name,
    /// The `/`-separated path relative to the scanned directory
    Path,
}

impl MatchScope {
    /// Expressions mentioning `/` are matched against the relative path
    pub fn for_expression(raw: &str) -> Self {
        if raw.contains('/') {
            MatchScope::Path
        } else {
            MatchScope::Name
        }
    }
}

/// Compiled regular expression with its scope and capture names
#[derive(Debug, Clone)]
pub struct RegexSpec {
    pub regex: Regex,
    pub scope: MatchScope,
    pub capture_names: Vec<String>,
    pub catch_all: bool,
}

/// A single predicate of a compound expression or rule extra condition
#[derive(Debug, Clone)]
pub enum Predicate {
    NameGlob(GlobProgram),
    NameRegex(RegexSpec),
    MinSize { bytes: u64, inclusive: bool },
    MaxSize { bytes: u64, inclusive: bool },
    /// Milliseconds since epoch
    ModifiedAfter { at_ms: i64, inclusive: bool },
    ModifiedBefore { at_ms: i64, inclusive: bool },
    /// Lowercase extensions without dot
    ExtensionIn(BTreeSet<String>),
}

impl Predicate {
    /// Short name used in summaries and diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Predicate::NameGlob(_) | Predicate::NameRegex(_) => "name-pattern",
            Predicate::MinSize { .. } => "min-size",
            Predicate::MaxSize { .. } => "max-size",
            Predicate::ModifiedAfter { .. } => "modified-after",
            Predicate::ModifiedBefore { .. } => "modified-before",
            Predicate::ExtensionIn(_) => "extension-in-set",
        }
    }

    pub fn capture_names(&self) -> Vec<String> {
        match self {
            Predicate::NameGlob(glob) => glob.capture_names().to_vec(),
            Predicate::NameRegex(regex) => regex.capture_names.clone(),
            _ => Vec::new(),
        }
    }

    fn is_catch_all(&self) -> bool {
        match self {
            Predicate::NameGlob(glob) => glob.is_catch_all(),
            Predicate::NameRegex(regex) => regex.catch_all,
            _ => false,
        }
    }
}

/// Logical AND of predicates, evaluated in declaration order
#[derive(Debug, Clone)]
pub struct CompoundSpec {
    pub predicates: Vec<Predicate>,
}

/// Compiled, kind-specific form of a pattern expression
#[derive(Debug, Clone)]
pub enum MatchSpec {
    Glob(GlobProgram),
    Regex(RegexSpec),
    Compound(CompoundSpec),
}

impl MatchSpec {
    pub fn kind(&self) -> ExpressionKind {
        match self {
            MatchSpec::Glob(_) => ExpressionKind::Glob,
            MatchSpec::Regex(_) => ExpressionKind::Regex,
            MatchSpec::Compound(_) => ExpressionKind::Compound,
        }
    }

    /// Whether this spec matches every file (`*`, `**`, `.*`, or a compound
    /// whose only predicate is such a name pattern)
    pub fn is_catch_all(&self) -> bool {
        match self {
            MatchSpec::Glob(glob) => glob.is_catch_all(),
            MatchSpec::Regex(regex) => regex.catch_all,
            MatchSpec::Compound(compound) => compound.predicates.iter().all(Predicate::is_catch_all),
        }
    }

    /// Names of captures this spec can produce, in declaration order
    pub fn capture_names(&self) -> Vec<String> {
        match self {
            MatchSpec::Glob(glob) => glob.capture_names().to_vec(),
            MatchSpec::Regex(regex) => regex.capture_names.clone(),
            MatchSpec::Compound(compound) => compound
                .predicates
                .iter()
                .flat_map(Predicate::capture_names)
                .collect(),
        }
    }

    pub fn scope(&self) -> MatchScope {
        match self {
            MatchSpec::Glob(glob) => glob.scope(),
            MatchSpec::Regex(regex) => regex.scope,
            MatchSpec::Compound(compound) => compound
                .predicates
                .iter()
                .find_map(|p| match p {
                    Predicate::NameGlob(glob) => Some(glob.scope()),
                    Predicate::NameRegex(regex) => Some(regex.scope),
                    _ => None,
                })
                .unwrap_or(MatchScope::Name),
        }
    }

    pub fn summary(&self) -> SpecSummary {
        let predicates = match self {
            MatchSpec::Compound(compound) => compound
                .predicates
                .iter()
                .map(|p| p.kind_name().to_string())
                .collect(),
            _ => Vec::new(),
        };
        SpecSummary {
            kind: self.kind(),
            scope: self.scope(),
            catch_all: self.is_catch_all(),
            capture_names: self.capture_names(),
            predicates,
        }
    }
}

/// Description of a compiled spec returned by pattern validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecSummary {
    pub kind: ExpressionKind,
    pub scope: MatchScope,
    pub catch_all: bool,
    pub capture_names: Vec<String>,
    /// Predicate kinds for compound specs, in evaluation order
    pub predicates: Vec<String>,
}

/// Supported comparison operators in compound predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// Equal: ==
    Eq,
    /// Greater than: >
    Gt,
    /// Less than: <
    Lt,
    /// Greater than or equal: >=
    Gte,
    /// Less than or equal: <=
    Lte,
    /// Value is in array: IN [...]
    In,
    /// Value matches regex pattern: MATCHES 'pattern'
    Matches,
    /// Value matches glob pattern: GLOB 'pattern'
    Glob,
}

impl ComparisonOp {
    /// Parse operator from a symbol or keyword token
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "==" | "=" => Some(ComparisonOp::Eq),
            ">" => Some(ComparisonOp::Gt),
            "<" => Some(ComparisonOp::Lt),
            ">=" => Some(ComparisonOp::Gte),
            "<=" => Some(ComparisonOp::Lte),
            _ => match s.to_ascii_uppercase().as_str() {
                "IN" => Some(ComparisonOp::In),
                "MATCHES" => Some(ComparisonOp::Matches),
                "GLOB" | "LIKE" => Some(ComparisonOp::Glob),
                _ => None,
            },
        }
    }
}

/// File fields that can be accessed in compound predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// File name: name
    FileName,
    /// Relative path: path
    FilePath,
    /// File extension (no dot): ext
    FileExt,
    /// File size in bytes: size
    FileSize,
    /// Last modified timestamp: modified
    FileModifiedAt,
}

impl Field {
    /// Parse field from string identifier.
    /// Supports both camelCase and snake_case variants.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "name" | "filename" => Some(Field::FileName),
            "path" | "filepath" => Some(Field::FilePath),
            "ext" | "extension" => Some(Field::FileExt),
            "size" | "filesize" => Some(Field::FileSize),
            "modifiedat" | "modified_at" | "modified" | "mtime" => Some(Field::FileModifiedAt),
            _ => None,
        }
    }

    /// Get the canonical name for this field
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Field::FileName => "name",
            Field::FilePath => "path",
            Field::FileExt => "ext",
            Field::FileSize => "size",
            Field::FileModifiedAt => "modified",
        }
    }
}

/// Literal values that can appear in compound predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value: 'text' or "text"
    String(String),
    /// Numeric value: 42, 3.14
    Number(f64),
    /// Size in bytes with unit: 10KB, 5MB, 1GB
    SizeBytes(u64),
    /// Array of values: ['a', 'b', 'c']
    Array(Vec<Value>),
}

impl Value {
    /// Convert value to string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::SizeBytes(b) => Some(b.to_string()),
            Value::Array(_) => None,
        }
    }

    /// Convert value to a byte count
    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            Value::SizeBytes(b) => Some(*b),
            Value::Number(n) if *n >= 0.0 => Some(*n as u64),
            Value::String(s) => crate::utils::parse_size(s),
            _ => None,
        }
    }
}
