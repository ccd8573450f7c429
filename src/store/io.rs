//! Crash-safe document I/O
//!
//! A document on disk is always either the previous or the new version:
//! content goes to a temp file in the same directory, is fsynced, renamed
//! over the target and the directory entry is synced. Readers and writers
//! coordinate through an advisory lock on `<document>.lock`.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentIoError {
    #[error("Cannot determine parent directory for {0}")]
    NoParent(PathBuf),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to sync {path}: {source}")]
    Sync {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to replace {path}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replace `path` with `data` atomically, creating parent directories
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), DocumentIoError> {
    let parent = path
        .parent()
        .ok_or_else(|| DocumentIoError::NoParent(path.to_path_buf()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent).map_err(|source| DocumentIoError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let temp = parent.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    if let Err(e) = write_synced(&temp, data) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    if let Err(source) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(DocumentIoError::Replace {
            path: path.to_path_buf(),
            source,
        });
    }

    sync_directory(parent)
}

fn write_synced(temp: &Path, data: &[u8]) -> Result<(), DocumentIoError> {
    let write_err = |source| DocumentIoError::Write {
        path: temp.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp)
        .map_err(write_err)?;
    file.write_all(data).map_err(write_err)?;
    file.sync_all().map_err(|source| DocumentIoError::Sync {
        path: temp.to_path_buf(),
        source,
    })
}

/// Make a rename inside `dir` durable. No-op on Windows, where NTFS renames
/// are already atomic and directories cannot be opened for syncing.
pub fn sync_directory(dir: &Path) -> Result<(), DocumentIoError> {
    #[cfg(unix)]
    {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        let sync_err = |source| DocumentIoError::Sync {
            path: dir.to_path_buf(),
            source,
        };
        File::open(dir).and_then(|d| d.sync_all()).map_err(sync_err)?;
    }

    #[cfg(windows)]
    {
        let _ = dir;
    }

    Ok(())
}

/// Exclusive advisory lock on `<path>.lock`, released on drop
pub struct DocumentLock {
    file: File,
    path: PathBuf,
}

impl DocumentLock {
    /// Block until the lock for `document` is acquired
    pub fn acquire(document: &Path) -> Result<Self, DocumentIoError> {
        let mut lock_name = document
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let path = document.with_file_name(lock_name);

        let lock_err = |source| DocumentIoError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release document lock");
        }
    }
}
