//! Engine configuration
//!
//! Read from `<config dir>/sentinel/organizer.json`. Every field has a
//! default, so a missing file or a partial document is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::conflict::{BatchMode, ConflictStrategy, DEFAULT_MAX_RENAME_ATTEMPTS};
use crate::error::PersistenceError;
use crate::pattern::native_case_sensitive;
use crate::store;

/// How names are compared when patterns do not say otherwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    /// Insensitive on macOS and Windows, sensitive elsewhere
    #[default]
    Native,
    Sensitive,
    Insensitive,
}

impl CaseSensitivity {
    pub fn is_sensitive(&self) -> bool {
        match self {
            CaseSensitivity::Native => native_case_sensitive(),
            CaseSensitivity::Sensitive => true,
            CaseSensitivity::Insensitive => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub case_sensitivity: CaseSensitivity,
    /// Strategy used when a request does not name one
    pub strategy: ConflictStrategy,
    pub batch_mode: BatchMode,
    pub max_rename_attempts: u32,
    /// Threads evaluating files while planning
    pub workers: usize,
    /// Concurrent file operations while committing
    pub commit_concurrency: usize,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    /// Descend into subdirectories of the source directory
    pub recursive: bool,
    pub include_hidden: bool,
    /// Skip files whose destination already holds identical content
    pub skip_identical: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            case_sensitivity: CaseSensitivity::Native,
            strategy: ConflictStrategy::Rename,
            batch_mode: BatchMode::Independent,
            max_rename_attempts: DEFAULT_MAX_RENAME_ATTEMPTS,
            workers: num_cpus::get(),
            commit_concurrency: 4,
            cache_enabled: true,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            recursive: true,
            include_hidden: false,
            skip_identical: false,
        }
    }
}

impl EngineConfig {
    /// `<config dir>/sentinel/organizer.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sentinel").join("organizer.json"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config.normalized())
    }

    /// Load from the default location, falling back to defaults
    pub fn load_default() -> Result<Self, PersistenceError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        store::save_json(path, self)
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitivity.is_sensitive()
    }

    /// Clamp values that would stall the engine
    fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.commit_concurrency = self.commit_concurrency.max(1);
        self
    }
}
