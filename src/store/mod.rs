//! Persistence of whole JSON documents (pattern library, rulesets, journals).
//!
//! Every document carries a `format_version`. Documents written before the
//! field existed read as version 0 and are migrated by their owners; versions
//! newer than [`FORMAT_VERSION`] are rejected.

pub mod io;

pub use io::{atomic_write, sync_directory, DocumentIoError, DocumentLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::PersistenceError;

/// Current schema version of persisted documents
pub const FORMAT_VERSION: u32 = 1;

/// Reject documents from a newer schema
pub fn check_version(found: u32) -> Result<(), PersistenceError> {
    if found > FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// Read a JSON document while holding its lock
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let _lock = DocumentLock::acquire(path)?;
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Atomically replace a JSON document while holding its lock
pub fn save_json<T: Serialize>(path: &Path, document: &T) -> Result<(), PersistenceError> {
    let data = serde_json::to_vec_pretty(document)?;
    let _lock = DocumentLock::acquire(path)?;
    atomic_write(path, &data)?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "Saved document");
    Ok(())
}
