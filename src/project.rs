//! Project identity: stable cache-directory derivation
//!
//! A project is identified by its source directory plus an optional
//! configuration file path. The pair is hashed into the cache directory name,
//! so two analyzers pointed at the same paths share a cache while different
//! configs never collide. Paths are canonicalized first so relative and
//! absolute spellings of the same project agree.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectIdentity {
    pub source_directory: PathBuf,
    pub config_file_path: Option<PathBuf>,
}

impl ProjectIdentity {
    /// Create an identity, resolving both paths to canonical absolute form.
    ///
    /// Falls back to the path as given when canonicalization fails (e.g. the
    /// directory does not exist yet); identity is then still deterministic
    /// for that spelling.
    pub fn new(source_directory: &Path, config_file_path: Option<&Path>) -> Self {
        Self {
            source_directory: canonicalize_lossy(source_directory),
            config_file_path: config_file_path.map(canonicalize_lossy),
        }
    }

    /// 16-hex-character SHA-256 prefix over `source|config`.
    pub fn compute_hash(&self) -> String {
        let mut combined = self.source_directory.to_string_lossy().into_owned();
        if let Some(config) = &self.config_file_path {
            combined.push('|');
            combined.push_str(&config.to_string_lossy());
        }

        let digest = Sha256::digest(combined.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Cache directory name: `<project_basename>_<hash>`.
    pub fn cache_directory_name(&self) -> String {
        let project_name = self
            .source_directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        format!("{}_{}", project_name, self.compute_hash())
    }
}

impl std::fmt::Display for ProjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.config_file_path {
            Some(config) => write!(
                f,
                "{} + {}",
                self.source_directory.display(),
                config.display()
            ),
            None => write!(f, "{}", self.source_directory.display()),
        }
    }
}

fn canonicalize_lossy(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn same_paths_same_identity() {
        let dir = TempDir::new().unwrap();
        let a = ProjectIdentity::new(dir.path(), None);
        let b = ProjectIdentity::new(dir.path(), None);
        assert_eq!(a, b);
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn config_changes_identity() {
        let dir = TempDir::new().unwrap();
        let cfg1 = dir.path().join("one.json");
        let cfg2 = dir.path().join("two.json");
        std::fs::write(&cfg1, "{}").unwrap();
        std::fs::write(&cfg2, "{}").unwrap();

        let a = ProjectIdentity::new(dir.path(), Some(&cfg1));
        let b = ProjectIdentity::new(dir.path(), Some(&cfg2));
        let c = ProjectIdentity::new(dir.path(), None);
        assert_ne!(a.compute_hash(), b.compute_hash());
        assert_ne!(a.compute_hash(), c.compute_hash());
    }

    #[test]
    fn unnormalized_spelling_agrees_with_canonical() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();

        let canonical = ProjectIdentity::new(&sub, None);
        let indirect = ProjectIdentity::new(&dir.path().join("sub").join("..").join("sub"), None);
        assert_eq!(canonical.compute_hash(), indirect.compute_hash());
    }

    #[test]
    fn hash_is_sixteen_hex_chars() {
        let dir = TempDir::new().unwrap();
        let id = ProjectIdentity::new(dir.path(), None);
        let hash = id.compute_hash();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_directory_name_contains_basename_and_hash() {
        let dir = TempDir::new().unwrap();
        let id = ProjectIdentity::new(dir.path(), None);
        let name = id.cache_directory_name();
        let basename = dir.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(basename.as_ref()));
        assert!(name.ends_with(&id.compute_hash()));
    }
}
