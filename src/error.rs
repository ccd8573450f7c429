//! Error types shared across the organizer core.
//!
//! Parse and validation errors fail fast and are returned to the caller of the
//! single pattern/rule operation. Batch-level problems (aborted conflicts,
//! collaborator failures) are never raised; they are collected into plan and
//! commit reports instead.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

fn at(position: &Option<usize>) -> String {
    match position {
        Some(pos) => format!(" at position {}", pos),
        None => String::new(),
    }
}

/// Errors produced while parsing a pattern expression
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "details")]
pub enum ParseError {
    /// The expression was empty or whitespace only
    #[error("Expression is empty")]
    EmptyExpression,

    /// The expression is not valid in its kind's grammar
    #[error("Invalid syntax{}: {message}", at(.position))]
    InvalidSyntax {
        message: String,
        position: Option<usize>,
    },

    /// A backslash escape that the grammar does not define
    #[error("Invalid escape sequence '{sequence}' at position {position}")]
    InvalidEscape { sequence: String, position: usize },
}

impl ParseError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        ParseError::InvalidSyntax {
            message: message.into(),
            position: Some(position),
        }
    }
}

/// Violations of the rule -> pattern reference
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "details")]
pub enum ReferentialIntegrityError {
    /// The pattern is still referenced by rules
    #[error("Pattern {pattern_id} is referenced by {usage_count} rule(s)")]
    PatternInUse { pattern_id: String, usage_count: u32 },

    /// A rule references a pattern id that is not in the library
    #[error("Rule {rule_id} references missing pattern {pattern_id}")]
    MissingPattern { rule_id: String, pattern_id: String },
}

/// Destination template problems
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "details")]
pub enum TemplateError {
    #[error("Invalid template '{template}': {message}")]
    Syntax { template: String, message: String },

    /// Placeholder is neither a built-in nor a capture of the rule's pattern
    #[error("Unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder { placeholder: String },

    /// Placeholder has no value for a specific file
    #[error("Placeholder {{{placeholder}}} has no value for {file}")]
    Unresolved { placeholder: String, file: String },

    #[error("Destination escapes the destination root: {path}")]
    EscapesRoot { path: String },
}

/// Errors from pattern library operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Integrity(#[from] ReferentialIntegrityError),

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Pattern name already in use: {0}")]
    DuplicateName(String),
}

/// Errors from ruleset operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesetError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Integrity(#[from] ReferentialIntegrityError),

    #[error("Invalid extra condition '{condition}': {source}")]
    Condition {
        condition: String,
        #[source]
        source: ParseError,
    },

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Ruleset not found: {0}")]
    RulesetNotFound(String),

    #[error("Cannot remove the active ruleset: {0}")]
    ActiveRuleset(String),
}

/// Errors from loading or saving documents
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported format version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Invalid batch id: {0}")]
    InvalidBatchId(String),

    #[error(transparent)]
    Document(#[from] crate::store::DocumentIoError),

    #[error("Invalid pattern in document: {0}")]
    Library(#[from] LibraryError),

    #[error("Invalid rule in document: {0}")]
    Ruleset(#[from] RulesetError),
}

/// Top-level error for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Ruleset(#[from] RulesetError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Organize pass was cancelled")]
    Cancelled,

    #[error("History error: {0}")]
    History(String),
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        EngineError::Library(LibraryError::Parse(err))
    }
}

impl From<ReferentialIntegrityError> for EngineError {
    fn from(err: ReferentialIntegrityError) -> Self {
        EngineError::Library(LibraryError::Integrity(err))
    }
}
