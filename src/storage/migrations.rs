//! Versioned schema migrations for the SQLite store.
//!
//! Migrations are embedded, numbered, and forward-only. Each pending version
//! is applied inside its own transaction and recorded in `schema_version`
//! with an applied-at timestamp, so re-running the set is a no-op. A store
//! whose recorded version is newer than [`CURRENT_VERSION`] is rejected.

use crate::error::{StorageError, StorageResult};
use crate::relations::now_unix;
use rusqlite::Connection;
use tracing::{debug, info};

/// Highest schema version this build understands.
pub const CURRENT_VERSION: i64 = 3;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Version 1: base schema. Tables, trigger-maintained FTS index, and the
/// lookup indexes the query engine relies on.
const V1_INITIAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS symbols (
    usr TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    namespace TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    "column" INTEGER NOT NULL DEFAULT 1,
    start_line INTEGER,
    end_line INTEGER,
    header_file TEXT,
    header_line INTEGER,
    header_start_line INTEGER,
    header_end_line INTEGER,
    signature TEXT NOT NULL DEFAULT '',
    access TEXT NOT NULL DEFAULT 'public',
    parent_class TEXT NOT NULL DEFAULT '',
    base_classes TEXT NOT NULL DEFAULT '[]',
    is_project INTEGER NOT NULL DEFAULT 1,
    is_definition INTEGER NOT NULL DEFAULT 0,
    is_virtual INTEGER NOT NULL DEFAULT 0,
    is_pure_virtual INTEGER NOT NULL DEFAULT 0,
    is_const INTEGER NOT NULL DEFAULT 0,
    is_static INTEGER NOT NULL DEFAULT 0,
    template_kind TEXT,
    template_parameters TEXT NOT NULL DEFAULT '[]',
    primary_template_usr TEXT,
    brief TEXT,
    doc_comment TEXT,
    created_at REAL NOT NULL,
    updated_at REAL NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS symbols_fts USING fts5(
    name,
    qualified_name,
    content='symbols',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS symbols_fts_insert AFTER INSERT ON symbols BEGIN
    INSERT INTO symbols_fts(rowid, name, qualified_name)
    VALUES (new.rowid, new.name, new.qualified_name);
END;

CREATE TRIGGER IF NOT EXISTS symbols_fts_delete AFTER DELETE ON symbols BEGIN
    INSERT INTO symbols_fts(symbols_fts, rowid, name, qualified_name)
    VALUES ('delete', old.rowid, old.name, old.qualified_name);
END;

CREATE TRIGGER IF NOT EXISTS symbols_fts_update AFTER UPDATE ON symbols BEGIN
    INSERT INTO symbols_fts(symbols_fts, rowid, name, qualified_name)
    VALUES ('delete', old.rowid, old.name, old.qualified_name);
    INSERT INTO symbols_fts(rowid, name, qualified_name)
    VALUES (new.rowid, new.name, new.qualified_name);
END;

CREATE TABLE IF NOT EXISTS file_metadata (
    file_path TEXT PRIMARY KEY,
    file_hash TEXT NOT NULL,
    compile_args_hash TEXT,
    indexed_at REAL NOT NULL,
    symbol_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS call_sites (
    id INTEGER PRIMARY KEY,
    caller_usr TEXT NOT NULL,
    callee_usr TEXT NOT NULL DEFAULT '',
    callee_name TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL,
    "column" INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS type_aliases (
    alias_qualified_name TEXT PRIMARY KEY,
    alias_name TEXT NOT NULL,
    canonical_type TEXT NOT NULL,
    file TEXT NOT NULL,
    line INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file);
CREATE INDEX IF NOT EXISTS idx_symbols_parent_class ON symbols(parent_class);
CREATE INDEX IF NOT EXISTS idx_symbols_namespace ON symbols(namespace);
CREATE INDEX IF NOT EXISTS idx_symbols_is_project ON symbols(is_project);
CREATE INDEX IF NOT EXISTS idx_symbols_name_kind_project ON symbols(name, kind, is_project);
CREATE INDEX IF NOT EXISTS idx_symbols_updated_at ON symbols(updated_at);
CREATE INDEX IF NOT EXISTS idx_call_sites_caller ON call_sites(caller_usr);
CREATE INDEX IF NOT EXISTS idx_call_sites_callee_usr ON call_sites(callee_usr);
CREATE INDEX IF NOT EXISTS idx_call_sites_callee_name ON call_sites(callee_name);
CREATE INDEX IF NOT EXISTS idx_call_sites_file ON call_sites(file);
CREATE INDEX IF NOT EXISTS idx_type_aliases_name ON type_aliases(alias_name);
CREATE INDEX IF NOT EXISTS idx_type_aliases_canonical ON type_aliases(canonical_type);
CREATE INDEX IF NOT EXISTS idx_type_aliases_file ON type_aliases(file);
"#;

/// Version 2: include-dependency edges for incremental refresh fan-out.
const V2_FILE_DEPENDENCIES: &str = r#"
CREATE TABLE IF NOT EXISTS file_dependencies (
    source_file TEXT NOT NULL,
    included_file TEXT NOT NULL,
    is_direct INTEGER NOT NULL DEFAULT 1,
    include_depth INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (source_file, included_file)
);

CREATE INDEX IF NOT EXISTS idx_file_deps_included ON file_dependencies(included_file);
"#;

/// Version 3: failure tracking on file_metadata so broken files are skipped
/// until their content or compile args change.
const V3_FILE_METADATA_FAILURES: &str = r#"
ALTER TABLE file_metadata ADD COLUMN success INTEGER NOT NULL DEFAULT 1;
ALTER TABLE file_metadata ADD COLUMN error_message TEXT;
ALTER TABLE file_metadata ADD COLUMN retry_count INTEGER NOT NULL DEFAULT 0;
"#;

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: V1_INITIAL_SCHEMA,
    },
    Migration {
        version: 2,
        name: "file_dependencies",
        sql: V2_FILE_DEPENDENCIES,
    },
    Migration {
        version: 3,
        name: "file_metadata_failure_tracking",
        sql: V3_FILE_METADATA_FAILURES,
    },
];

/// Applies pending migrations to a connection.
pub struct MigrationRunner<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Current schema version; 0 when the store is brand new.
    pub fn current_version(&self) -> StorageResult<i64> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at REAL NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        let version: Option<i64> =
            self.conn
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get(0)
                })?;
        Ok(version.unwrap_or(0))
    }

    /// Reject stores written by a newer build.
    pub fn check_version_compatibility(&self) -> StorageResult<()> {
        let current = self.current_version()?;
        if current > CURRENT_VERSION {
            return Err(StorageError::SchemaTooNew {
                found: current,
                supported: CURRENT_VERSION,
            });
        }
        Ok(())
    }

    pub fn needs_migration(&self) -> StorageResult<bool> {
        Ok(self.current_version()? < CURRENT_VERSION)
    }

    /// Apply every pending migration in ascending order, each in its own
    /// transaction. Already-applied versions are skipped, so this is
    /// idempotent.
    pub fn migrate(&mut self) -> StorageResult<()> {
        self.check_version_compatibility()?;
        let current = self.current_version()?;
        if current >= CURRENT_VERSION {
            debug!("schema already at version {current}, no migration needed");
            return Ok(());
        }

        info!("migrating schema from version {current} to {CURRENT_VERSION}");
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply(migration)?;
        }
        Ok(())
    }

    fn apply(&mut self, migration: &Migration) -> StorageResult<()> {
        let already: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM schema_version WHERE version = ?1",
            [migration.version],
            |row| row.get(0),
        )?;
        if already > 0 {
            debug!("migration {} already applied", migration.version);
            return Ok(());
        }

        let tx = self.conn.transaction().map_err(StorageError::from)?;
        tx.execute_batch(migration.sql)
            .map_err(|e| StorageError::MigrationFailed {
                version: migration.version,
                cause: e.to_string(),
            })?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, now_unix(), migration.name],
        )
        .map_err(|e| StorageError::MigrationFailed {
            version: migration.version,
            cause: e.to_string(),
        })?;
        tx.commit().map_err(StorageError::from)?;

        debug!("migration {} ({}) applied", migration.version, migration.name);
        Ok(())
    }

    /// History of applied migrations as `(version, applied_at, description)`.
    pub fn history(&self) -> StorageResult<Vec<(i64, f64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, applied_at, description FROM schema_version ORDER BY version",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
