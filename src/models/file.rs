use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Stable identity of a file for one organize pass: path, size and mtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a file by its relative path, size and modification time
    pub fn compute(relative_path: &str, size: u64, modified_at: Option<i64>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(relative_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_le_bytes());
        hasher.update([0u8]);
        match modified_at {
            Some(ms) => hasher.update(ms.to_le_bytes()),
            None => hasher.update(b"none"),
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A regular file as seen by the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Absolute path
    pub path: PathBuf,
    /// Path relative to the scanned directory, always `/`-separated
    pub relative_path: String,
    /// File name including extension
    pub name: String,
    /// File name without the final extension
    pub stem: String,
    /// File extension (without dot)
    pub extension: Option<String>,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp (milliseconds since epoch)
    pub modified_at: Option<i64>,
    /// MIME type guess based on extension
    pub mime_type: Option<String>,
    /// Whether file is hidden (starts with .)
    pub is_hidden: bool,
    pub fingerprint: Fingerprint,
}

impl FileDescriptor {
    /// Build a descriptor from metadata on disk. `root` is the scanned directory.
    pub fn from_path(root: &Path, path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);

        let relative = path.strip_prefix(root).unwrap_or(path);
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self::build(
            path.to_path_buf(),
            relative_path,
            metadata.len(),
            modified_at,
        ))
    }

    /// Build a descriptor for a path that need not exist (pattern testing).
    pub fn synthetic(relative_path: &str, size: u64, modified_at: Option<i64>) -> Self {
        let normalized = relative_path.replace('\\', "/");
        let trimmed = normalized.trim_start_matches("./").to_string();
        Self::build(PathBuf::from(&trimmed), trimmed, size, modified_at)
    }

    fn build(path: PathBuf, relative_path: String, size: u64, modified_at: Option<i64>) -> Self {
        let name = relative_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        // ".bashrc" has no extension, "archive.tar.gz" has "gz"
        let (stem, extension) = match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => {
                (name[..idx].to_string(), Some(name[idx + 1..].to_string()))
            }
            _ => (name.clone(), None),
        };

        let mime_type = extension
            .as_ref()
            .and_then(|ext| mime_guess::from_ext(ext).first().map(|m| m.to_string()));

        let fingerprint = Fingerprint::compute(&relative_path, size, modified_at);
        let is_hidden = name.starts_with('.');

        Self {
            path,
            relative_path,
            name,
            stem,
            extension,
            size,
            modified_at,
            mime_type,
            is_hidden,
            fingerprint,
        }
    }

    /// Directory part of the relative path ("" for top-level files)
    pub fn parent(&self) -> &str {
        match self.relative_path.rfind('/') {
            Some(idx) => &self.relative_path[..idx],
            None => "",
        }
    }
}

/// Compute SHA-256 hash of file content
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_synthetic_descriptor_fields() {
        let file = FileDescriptor::synthetic("photos/2024/archive.tar.gz", 10, None);
        assert_eq!(file.name, "archive.tar.gz");
        assert_eq!(file.stem, "archive.tar");
        assert_eq!(file.extension.as_deref(), Some("gz"));
        assert_eq!(file.parent(), "photos/2024");

        let dotfile = FileDescriptor::synthetic(".bashrc", 0, None);
        assert!(dotfile.is_hidden);
        assert_eq!(dotfile.extension, None);
        assert_eq!(dotfile.stem, ".bashrc");
    }

    #[test]
    fn test_from_path_relative() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        let path = dir.path().join("sub").join("photo.JPG");
        std::fs::write(&path, "jpeg").unwrap();

        let file = FileDescriptor::from_path(dir.path(), &path).unwrap();
        assert_eq!(file.relative_path, "sub/photo.JPG");
        assert_eq!(file.size, 4);
        assert!(file.modified_at.is_some());
        assert_eq!(file.mime_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let a = Fingerprint::compute("a.txt", 1, Some(5));
        assert_eq!(a, Fingerprint::compute("a.txt", 1, Some(5)));
        assert_ne!(a, Fingerprint::compute("a.txt", 2, Some(5)));
        assert_ne!(a, Fingerprint::compute("b.txt", 1, Some(5)));
        assert_ne!(a, Fingerprint::compute("a.txt", 1, None));
    }

    #[test]
    fn test_hash_consistency() {
        let dir = tempdir().unwrap();
        let test_file = dir.path().join("test.txt");
        std::fs::write(&test_file, "Hello, world!").unwrap();

        let hash1 = hash_file(&test_file).unwrap();
        let hash2 = hash_file(&test_file).unwrap();
        assert_eq!(hash1, hash2);

        std::fs::write(&test_file, "Different content").unwrap();
        assert_ne!(hash1, hash_file(&test_file).unwrap());
    }
}
