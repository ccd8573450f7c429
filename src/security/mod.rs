//! Guards against moving files into or out of system locations.

use std::path::{Path, PathBuf};

/// Security validator for path operations
pub struct PathValidator;

impl PathValidator {
    /// Check if a path is protected and should not be modified
    pub fn is_protected_path(path: &Path) -> bool {
        let protected_paths: Vec<PathBuf> = vec![
            PathBuf::from("/"),
            PathBuf::from("/System"),
            PathBuf::from("/usr"),
            PathBuf::from("/bin"),
            PathBuf::from("/sbin"),
            PathBuf::from("/Library"),
            PathBuf::from("/Applications"),
            PathBuf::from("/private"),
            PathBuf::from("/var"),
            // Windows system paths
            PathBuf::from("C:\\Windows"),
            PathBuf::from("C:\\Program Files"),
            PathBuf::from("C:\\Program Files (x86)"),
        ];

        // Get canonical path if possible
        let check_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        for protected in &protected_paths {
            if check_path == *protected {
                return true;
            }
            // Only protect the root of these paths, not subdirectories we own
            if check_path.starts_with(protected) {
                // Allow user directories within home
                if let Some(home) = dirs::home_dir() {
                    if check_path.starts_with(&home) {
                        return false;
                    }
                }
                // Block if it's a direct child of a protected path
                if check_path.parent() == Some(protected) {
                    return true;
                }
            }
        }

        // Block home directory itself (but not subdirectories)
        if let Some(home) = dirs::home_dir() {
            if check_path == home {
                return true;
            }
        }

        false
    }

    /// A destination may not be a protected path nor sit directly inside one
    pub fn validate_destination(destination: &Path) -> Result<(), String> {
        if Self::is_protected_path(destination) {
            return Err(format!("Cannot write to protected path: {}", destination.display()));
        }

        // The destination usually does not exist yet; check the deepest existing ancestor
        let existing = destination.ancestors().skip(1).find(|p| p.exists());
        if let Some(dir) = existing {
            let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            let target = canonical.join(destination.strip_prefix(dir).unwrap_or(destination));
            if target.parent().is_some_and(Self::is_system_directory) {
                return Err(format!(
                    "Cannot write into system directory: {}",
                    target.parent().map(|p| p.display().to_string()).unwrap_or_default()
                ));
            }
        }
        Ok(())
    }

    fn is_system_directory(dir: &Path) -> bool {
        [
            "/", "/System", "/usr", "/bin", "/sbin", "/Library", "/Applications", "/private", "/var",
        ]
        .iter()
        .any(|p| dir == Path::new(p))
    }
}
