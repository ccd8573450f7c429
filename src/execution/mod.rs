//! Execution Module
//!
//! Carries out organize plans. [`operations`] defines the file-operations
//! collaborator and its local implementation; [`executor`] dispatches plan
//! decisions to it with bounded concurrency.

pub mod executor;
pub mod operations;

pub use executor::{CommitEntry, CommitExecutor, CommitReport, CommitStatus};
pub use operations::{FileAction, FileOperations, LocalFileOperations, OperationOutcome};
