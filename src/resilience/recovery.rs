//! Cache recovery operations: backup, restore, clear, repair.

use crate::error::{StorageError, StorageResult};
use crate::storage::SymbolStore;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Manager for cache recovery operations.
///
/// Backups are plain file copies named `<stem>_backup_YYYYMMDD_HHMMSS<ext>`
/// next to the original, so an operator can always roll back by hand.
pub struct RecoveryManager;

impl RecoveryManager {
    /// Create a timestamped backup of a cache file. Returns the backup path.
    pub fn backup_file(path: &Path) -> StorageResult<PathBuf> {
        if !path.exists() {
            return Err(StorageError::Unavailable(format!(
                "cannot back up missing file {}",
                path.display()
            )));
        }

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".to_string());
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let backup_path = path.with_file_name(format!("{stem}_backup_{timestamp}{ext}"));

        std::fs::copy(path, &backup_path).map_err(|e| StorageError::Io {
            path: backup_path.clone(),
            source: e,
        })?;
        info!("cache backup created: {}", backup_path.display());
        Ok(backup_path)
    }

    /// Restore a cache file from a backup, replacing the original.
    pub fn restore_from_backup(path: &Path, backup_path: &Path) -> StorageResult<()> {
        if !backup_path.exists() {
            return Err(StorageError::Unavailable(format!(
                "backup file does not exist: {}",
                backup_path.display()
            )));
        }

        if path.exists() {
            std::fs::remove_file(path).map_err(|e| StorageError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::copy(backup_path, path).map_err(|e| StorageError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        info!("cache restored from backup: {}", backup_path.display());
        Ok(())
    }

    /// Remove all cache artifacts from a cache directory (last resort).
    ///
    /// Deletes database files, WAL/SHM side files, document stores, and
    /// backups, leaving the directory itself in place.
    pub fn clear_cache(cache_dir: &Path) -> StorageResult<()> {
        if !cache_dir.exists() {
            return Ok(());
        }

        let entries = std::fs::read_dir(cache_dir).map_err(|e| StorageError::Io {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_cache_file = name.ends_with(".db")
                || name.ends_with(".db-wal")
                || name.ends_with(".db-shm")
                || name.ends_with(".json")
                || name.contains("_backup_");
            if is_cache_file {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("failed to remove {}: {e}", path.display());
                } else {
                    info!("removed cache file: {}", path.display());
                }
            }
        }
        Ok(())
    }

    /// Attempt repair of a store: integrity check first, then the backend's
    /// own dump-and-restore routine. Returns true when the store is usable.
    pub fn attempt_repair(store: &dyn SymbolStore) -> bool {
        match store.check_integrity(true) {
            Ok(true) => {
                info!("integrity OK, no repair needed");
                true
            }
            Ok(false) | Err(_) => match store.repair() {
                Ok(ok) => {
                    if ok {
                        info!("store repair succeeded");
                    } else {
                        warn!("store repair failed");
                    }
                    ok
                }
                Err(e) => {
                    warn!("store repair errored: {e}");
                    false
                }
            },
        }
    }
}
