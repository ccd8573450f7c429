//! Pattern expressions: parsing, matching and the reusable pattern library.
//!
//! Patterns are defined once in the [`PatternLibrary`] and referenced by id
//! from rules. An expression is compiled exactly once, when it enters the
//! library; evaluation only ever runs the compiled [`MatchSpec`].

pub mod ast;
pub mod glob;
pub mod library;
pub mod matcher;
pub mod parser;

pub use ast::{ExpressionKind, MatchScope, MatchSpec, Predicate, SpecSummary};
pub use glob::GlobProgram;
pub use library::{
    Pattern, PatternDraft, PatternEdit, PatternLibrary, PatternLibraryDocument, PatternRecord,
    SelfTestReport,
};
pub use matcher::{evaluate_all, matches, test_samples, MatchResult, SampleResult};
pub use parser::{native_case_sensitive, parse, parse_predicates, parse_with, ParseOptions};
