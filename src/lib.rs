//! Sentinel rules engine
//!
//! Core of the Sentinel file organizer: named patterns are parsed into
//! matchable specs, rules route matching files to destination templates, and
//! a conflict resolver decides what happens when destinations collide.
//!
//! ## Modules
//! - `pattern` - Pattern parser, matcher and the pattern library
//! - `rules` - Rulesets, destination templates and the rule evaluator
//! - `conflict` - Collision detection and resolution strategies
//! - `cache` - Concurrent match/decision cache
//! - `engine` - Engine context, snapshots, planning
//! - `execution` - File operations collaborator and plan commit
//! - `history` - Batch journals and undo
//! - `store` - Atomic, locked JSON persistence

pub mod cache;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod execution;
pub mod history;
pub mod logging;
pub mod models;
pub mod pattern;
pub mod rules;
pub mod security;
pub mod store;
pub mod utils;

pub use config::{CaseSensitivity, EngineConfig};
pub use conflict::{BatchMode, ConflictDecision, ConflictStrategy, ResolvedAction};
pub use engine::{CancellationFlag, EngineContext, EngineSnapshot, OrganizePlan, OrganizeRequest};
pub use error::{
    EngineError, LibraryError, ParseError, PersistenceError, ReferentialIntegrityError, RulesetError,
    TemplateError,
};
pub use execution::{CommitReport, FileOperations, LocalFileOperations, OperationOutcome};
pub use history::HistoryStore;
pub use models::{FileDescriptor, Fingerprint};
pub use pattern::{ExpressionKind, MatchSpec, PatternDraft, PatternLibrary};
pub use rules::{RuleAction, RuleDraft, Ruleset, Workspace};
