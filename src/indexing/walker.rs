//! File system walker for discovering C++ sources to index
//!
//! Directory traversal with support for .gitignore rules, custom ignore
//! patterns from configuration, and C/C++ extension filtering.

use crate::config::Settings;
use crate::parsing::is_cpp_source;
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Walks directories to find source files to index
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk a directory and return the files to index, sorted for
    /// deterministic ordering.
    pub fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false);

        let mut override_builder = ignore::overrides::OverrideBuilder::new(root);
        for pattern in &self.settings.indexing.ignore_patterns {
            // Prefix with ! to make it an exclusion
            if let Err(e) = override_builder.add(&format!("!{pattern}")) {
                warn!("invalid ignore pattern '{pattern}': {e}");
            }
        }
        if let Ok(overrides) = override_builder.build() {
            builder.overrides(overrides);
        }

        let mut files: Vec<PathBuf> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| {
                let path = entry.path();
                // Skip dotfiles
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'))
                {
                    return None;
                }
                if is_cpp_source(path) {
                    Some(path.to_path_buf())
                } else {
                    None
                }
            })
            .collect();

        files.sort();
        files
    }

    /// Count files that would be indexed (useful for dry runs)
    pub fn count_files(&self, root: &Path) -> usize {
        self.walk(root).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_only_cpp_sources() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("handler.h"), "class Handler {};").unwrap();
        fs::write(root.join("handler.cpp"), "").unwrap();
        fs::write(root.join("readme.md"), "# docs").unwrap();
        fs::write(root.join("build.rs"), "fn main() {}").unwrap();

        let walker = FileWalker::new(Arc::new(Settings::default()));
        let files = walker.walk(root);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_cpp_source(f)));
    }

    #[test]
    fn honors_ignore_patterns() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("build")).unwrap();
        fs::write(root.join("build/generated.h"), "class Gen {};").unwrap();
        fs::write(root.join("main.cpp"), "int main() {}").unwrap();

        let walker = FileWalker::new(Arc::new(Settings::default()));
        let files = walker.walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.cpp"));
    }

    #[test]
    fn respects_gitignore() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join(".gitignore"), "ignored.cpp\n").unwrap();
        fs::write(root.join("ignored.cpp"), "").unwrap();
        fs::write(root.join("included.cpp"), "").unwrap();

        let walker = FileWalker::new(Arc::new(Settings::default()));
        let files = walker.walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("included.cpp"));
    }

    #[test]
    fn skips_hidden_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join(".hidden.cpp"), "").unwrap();
        fs::write(root.join("visible.cpp"), "").unwrap();

        let walker = FileWalker::new(Arc::new(Settings::default()));
        let files = walker.walk(root);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("visible.cpp"));
    }

    #[test]
    fn output_is_sorted() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        for name in ["zebra.cpp", "alpha.cpp", "mid.cpp"] {
            fs::write(root.join(name), "").unwrap();
        }
        let walker = FileWalker::new(Arc::new(Settings::default()));
        let files = walker.walk(root);
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alpha.cpp", "mid.cpp", "zebra.cpp"]);
    }
}
