//! File operations collaborator
//!
//! The planner never touches the filesystem; committing a plan hands every
//! decision to an implementation of [`FileOperations`]. [`LocalFileOperations`]
//! performs the moves and copies on the local disk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::rules::RuleAction;
use crate::security::PathValidator;

/// What to do with one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAction {
    pub kind: RuleAction,
    /// Replace an existing destination instead of failing
    pub replace: bool,
}

impl FileAction {
    pub fn new(kind: RuleAction) -> Self {
        Self { kind, replace: false }
    }

    pub fn replacing(kind: RuleAction) -> Self {
        Self { kind, replace: true }
    }
}

/// Result reported by the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl From<Result<(), String>> for OperationOutcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Executes file moves and copies on behalf of the engine
#[async_trait]
pub trait FileOperations: Send + Sync {
    async fn execute(&self, source: &Path, destination: &Path, action: FileAction) -> OperationOutcome;
}

/// Local filesystem implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileOperations;

impl LocalFileOperations {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileOperations for LocalFileOperations {
    async fn execute(&self, source: &Path, destination: &Path, action: FileAction) -> OperationOutcome {
        let source = source.to_path_buf();
        let destination = destination.to_path_buf();

        // Blocking I/O stays off the async workers
        tokio::task::spawn_blocking(move || execute_sync(&source, &destination, action))
            .await
            .map_err(|e| format!("Task failed: {}", e))
            .and_then(|result| result)
            .into()
    }
}

fn execute_sync(source: &Path, destination: &Path, action: FileAction) -> Result<(), String> {
    if !source.is_file() {
        return Err(format!("Source not found: {}", source.display()));
    }

    if action.kind == RuleAction::Move && PathValidator::is_protected_path(source) {
        return Err(format!("Cannot move protected path: {}", source.display()));
    }
    PathValidator::validate_destination(destination)?;

    if destination.exists() {
        if !action.replace {
            return Err(format!("Destination already exists: {}", destination.display()));
        }
        if destination.is_dir() {
            return Err(format!("Destination is a directory: {}", destination.display()));
        }
        fs::remove_file(destination)
            .map_err(|e| format!("Failed to replace {}: {}", destination.display(), e))?;
    }

    if let Some(parent) = destination.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create destination directory: {}", e))?;
        }
    }

    match action.kind {
        RuleAction::Move => {
            // Try rename first (same filesystem), fall back to copy+delete
            if fs::rename(source, destination).is_err() {
                fs::copy(source, destination).map_err(|e| format!("Failed to copy: {}", e))?;
                fs::remove_file(source).map_err(|e| format!("Failed to remove source: {}", e))?;
            }
            Ok(())
        }
        RuleAction::Copy => fs::copy(source, destination)
            .map(|_| ())
            .map_err(|e| format!("Failed to copy: {}", e)),
    }
}
