//! compile_commands.json loader
//!
//! Maps each translation unit to its compiler arguments. The per-file args
//! are normalized (sorted, deduplicated) before hashing so that reordering
//! flags does not invalidate the cache, while a real flag change
//! (`-std=c++17` -> `-std=c++20`) does.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One entry of compile_commands.json. Clang emits either `command` (a
/// single shell string) or `arguments` (a pre-split list).
#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: String,
    file: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct CompileCommands {
    /// Absolute file path -> compiler arguments
    args_by_file: HashMap<PathBuf, Vec<String>>,
}

impl CompileCommands {
    /// Load from a compile_commands.json file. Unreadable or malformed files
    /// yield an empty map with a warning; indexing proceeds without
    /// per-file args.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("cannot read {}: {e}", path.display());
                return Self::default();
            }
        };
        let entries: Vec<RawEntry> = match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("malformed compile_commands.json at {}: {e}", path.display());
                return Self::default();
            }
        };

        let mut args_by_file = HashMap::new();
        for entry in entries {
            let file = PathBuf::from(&entry.file);
            let absolute = if file.is_absolute() {
                file
            } else {
                PathBuf::from(&entry.directory).join(file)
            };
            let absolute = absolute.canonicalize().unwrap_or(absolute);

            let args = match (entry.arguments, entry.command) {
                (Some(args), _) => args,
                (None, Some(command)) => split_command(&command),
                (None, None) => Vec::new(),
            };
            args_by_file.insert(absolute, args);
        }

        Self { args_by_file }
    }

    pub fn is_empty(&self) -> bool {
        self.args_by_file.is_empty()
    }

    pub fn len(&self) -> usize {
        self.args_by_file.len()
    }

    /// Compiler arguments for a file, when the database knows it.
    pub fn args_for(&self, file: &Path) -> Option<&[String]> {
        self.args_by_file.get(file).map(|v| v.as_slice())
    }

    /// Digest of a file's args, order-insensitive. None when the file is
    /// not in the database.
    pub fn args_hash_for(&self, file: &Path) -> Option<String> {
        self.args_for(file).map(compile_args_hash)
    }
}

/// Digest of a compile-args set: sorted, deduplicated, newline-joined,
/// SHA-256, first 16 hex chars.
pub fn compile_args_hash(args: &[String]) -> String {
    use sha2::{Digest, Sha256};

    let mut sorted: Vec<&str> = args.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let digest = Sha256::digest(sorted.join("\n").as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Minimal shell-style splitting for `command` entries. Handles single and
/// double quotes; no escapes beyond that (clang does not emit them).
fn split_command(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in command.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        out.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_arguments_form() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("main.cpp");
        std::fs::write(&src, "int main() {}").unwrap();
        let cc = dir.path().join("compile_commands.json");
        std::fs::write(
            &cc,
            format!(
                r#"[{{"directory": "{0}", "file": "main.cpp",
                     "arguments": ["clang++", "-std=c++20", "-I.", "-c", "main.cpp"]}}]"#,
                dir.path().display()
            ),
        )
        .unwrap();

        let commands = CompileCommands::load(&cc);
        assert_eq!(commands.len(), 1);
        let args = commands.args_for(&src.canonicalize().unwrap()).unwrap();
        assert!(args.contains(&"-std=c++20".to_string()));
    }

    #[test]
    fn loads_command_form_with_quotes() {
        let parts = split_command(r#"clang++ -std=c++17 -DNAME="quoted value" -c main.cpp"#);
        assert!(parts.contains(&"-std=c++17".to_string()));
        assert!(parts.contains(&"-DNAME=quoted value".to_string()));
    }

    #[test]
    fn args_hash_is_order_insensitive() {
        let a = vec!["-std=c++20".to_string(), "-I.".to_string()];
        let b = vec!["-I.".to_string(), "-std=c++20".to_string()];
        assert_eq!(compile_args_hash(&a), compile_args_hash(&b));
    }

    #[test]
    fn args_hash_changes_with_flags() {
        let a = vec!["-std=c++17".to_string()];
        let b = vec!["-std=c++20".to_string()];
        assert_ne!(compile_args_hash(&a), compile_args_hash(&b));
    }

    #[test]
    fn malformed_file_yields_empty_map() {
        let dir = TempDir::new().unwrap();
        let cc = dir.path().join("compile_commands.json");
        std::fs::write(&cc, "not json").unwrap();
        let commands = CompileCommands::load(&cc);
        assert!(commands.is_empty());
    }
}
