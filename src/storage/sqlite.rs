//! SQLite-backed symbol store
//!
//! Single-file transactional database with trigger-maintained FTS5 search
//! over symbol names. Opened in WAL mode with `synchronous=NORMAL`; tuned for
//! local filesystems (network filesystems are out of scope). Lock contention
//! is handled by an exponential-backoff busy handler on top of a 30-second
//! busy timeout.

use crate::error::{StorageError, StorageResult};
use crate::relations::{now_unix, CallSite, FileDependency, FileMetadata, TypeAlias};
use crate::storage::migrations::MigrationRunner;
use crate::storage::{
    BackendKind, FileCacheEntry, HealthStatus, MaintenanceReport, StoreStats, SymbolStore,
};
use crate::symbol::{Access, Symbol, SymbolKind, TemplateKind, TemplateParameter};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exponential backoff when the database is locked: 1 ms base, doubling up
/// to a 1 s cap, giving up after 20 retries.
fn busy_backoff(retry_count: i32) -> bool {
    if retry_count >= 20 {
        return false;
    }
    let exponent = retry_count.clamp(0, 10) as u32;
    std::thread::sleep(Duration::from_millis(1u64 << exponent));
    true
}

pub struct SqliteStore {
    /// None for in-memory stores (tests); backup and repair need the path.
    db_path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at `db_path`, applying pending migrations.
    pub fn open(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(&db_path)?;
        Self::configure(&conn)?;
        Self::init_schema(&mut conn)?;

        debug!("sqlite store opened at {}", db_path.display());
        Ok(Self {
            db_path: Some(db_path),
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Self::init_schema(&mut conn)?;
        Ok(Self {
            db_path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn configure(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.busy_handler(Some(busy_backoff))?;
        // journal_mode returns a row; in-memory databases report "memory",
        // which is fine.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", 1)?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        Ok(())
    }

    fn init_schema(conn: &mut Connection) -> StorageResult<()> {
        let mut runner = MigrationRunner::new(conn);
        runner.check_version_compatibility()?;
        if runner.needs_migration()? {
            runner.migrate()?;
        }
        Ok(())
    }

    fn symbol_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Symbol> {
        fn bad(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        }

        let kind_str: String = row.get("kind")?;
        let kind = SymbolKind::from_str_opt(&kind_str).ok_or_else(|| {
            bad(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown symbol kind '{kind_str}'"),
            ))
        })?;

        let access_str: String = row.get("access")?;
        let access = Access::from_str_opt(&access_str).unwrap_or_default();

        let template_kind: Option<TemplateKind> = row
            .get::<_, Option<String>>("template_kind")?
            .as_deref()
            .and_then(TemplateKind::from_str_opt);

        let base_classes_json: String = row.get("base_classes")?;
        let base_classes: Vec<String> = serde_json::from_str(&base_classes_json).map_err(bad)?;

        let template_params_json: String = row.get("template_parameters")?;
        let template_parameters: Vec<TemplateParameter> =
            serde_json::from_str(&template_params_json).map_err(bad)?;

        Ok(Symbol {
            usr: row.get("usr")?,
            name: row.get("name")?,
            qualified_name: row.get("qualified_name")?,
            namespace: row.get("namespace")?,
            kind,
            file: row.get("file")?,
            line: row.get::<_, i64>("line")? as u32,
            column: row.get::<_, i64>("column")? as u32,
            start_line: row.get::<_, Option<i64>>("start_line")?.map(|v| v as u32),
            end_line: row.get::<_, Option<i64>>("end_line")?.map(|v| v as u32),
            header_file: row.get("header_file")?,
            header_line: row.get::<_, Option<i64>>("header_line")?.map(|v| v as u32),
            header_start_line: row
                .get::<_, Option<i64>>("header_start_line")?
                .map(|v| v as u32),
            header_end_line: row
                .get::<_, Option<i64>>("header_end_line")?
                .map(|v| v as u32),
            signature: row.get("signature")?,
            access,
            parent_class: row.get("parent_class")?,
            base_classes,
            is_project: row.get("is_project")?,
            is_definition: row.get("is_definition")?,
            is_virtual: row.get("is_virtual")?,
            is_pure_virtual: row.get("is_pure_virtual")?,
            is_const: row.get("is_const")?,
            is_static: row.get("is_static")?,
            template_kind,
            template_parameters,
            primary_template_usr: row.get("primary_template_usr")?,
            brief: row.get("brief")?,
            doc_comment: row.get("doc_comment")?,
        })
    }

    fn upsert_symbol(conn: &Connection, symbol: &Symbol, now: f64) -> StorageResult<()> {
        let base_classes = serde_json::to_string(&symbol.base_classes)?;
        let template_parameters = serde_json::to_string(&symbol.template_parameters)?;

        conn.execute(
            r#"
            INSERT INTO symbols (
                usr, name, qualified_name, namespace, kind, file, line, "column",
                start_line, end_line,
                header_file, header_line, header_start_line, header_end_line,
                signature, access, parent_class, base_classes, is_project,
                is_definition, is_virtual, is_pure_virtual, is_const, is_static,
                template_kind, template_parameters, primary_template_usr,
                brief, doc_comment, created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19,
                ?20, ?21, ?22, ?23, ?24,
                ?25, ?26, ?27,
                ?28, ?29, ?30, ?30
            )
            ON CONFLICT(usr) DO UPDATE SET
                name = excluded.name,
                qualified_name = excluded.qualified_name,
                namespace = excluded.namespace,
                kind = excluded.kind,
                file = excluded.file,
                line = excluded.line,
                "column" = excluded."column",
                start_line = excluded.start_line,
                end_line = excluded.end_line,
                header_file = excluded.header_file,
                header_line = excluded.header_line,
                header_start_line = excluded.header_start_line,
                header_end_line = excluded.header_end_line,
                signature = excluded.signature,
                access = excluded.access,
                parent_class = excluded.parent_class,
                base_classes = excluded.base_classes,
                is_project = excluded.is_project,
                is_definition = excluded.is_definition,
                is_virtual = excluded.is_virtual,
                is_pure_virtual = excluded.is_pure_virtual,
                is_const = excluded.is_const,
                is_static = excluded.is_static,
                template_kind = excluded.template_kind,
                template_parameters = excluded.template_parameters,
                primary_template_usr = excluded.primary_template_usr,
                brief = excluded.brief,
                doc_comment = excluded.doc_comment,
                updated_at = excluded.updated_at
            "#,
            params![
                symbol.usr,
                symbol.name,
                symbol.qualified_name,
                symbol.namespace,
                symbol.kind.as_str(),
                symbol.file,
                symbol.line as i64,
                symbol.column as i64,
                symbol.start_line.map(|v| v as i64),
                symbol.end_line.map(|v| v as i64),
                symbol.header_file,
                symbol.header_line.map(|v| v as i64),
                symbol.header_start_line.map(|v| v as i64),
                symbol.header_end_line.map(|v| v as i64),
                symbol.signature,
                symbol.access.as_str(),
                symbol.parent_class,
                base_classes,
                symbol.is_project,
                symbol.is_definition,
                symbol.is_virtual,
                symbol.is_pure_virtual,
                symbol.is_const,
                symbol.is_static,
                symbol.template_kind.map(|k| k.as_str()),
                template_parameters,
                symbol.primary_template_usr,
                symbol.brief,
                symbol.doc_comment,
                now,
            ],
        )?;
        Ok(())
    }

    fn query_symbols(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<Symbol>> {
        let mut stmt = conn.prepare(sql)?;
        let symbols = stmt
            .query_map(params, Self::symbol_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    fn file_metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileMetadata> {
        Ok(FileMetadata {
            file_path: row.get("file_path")?,
            file_hash: row.get("file_hash")?,
            compile_args_hash: row.get("compile_args_hash")?,
            indexed_at: row.get("indexed_at")?,
            symbol_count: row.get::<_, i64>("symbol_count")? as u32,
            success: row.get("success")?,
            error_message: row.get("error_message")?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
        })
    }

    fn call_site_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CallSite> {
        Ok(CallSite {
            caller_usr: row.get("caller_usr")?,
            callee_usr: row.get("callee_usr")?,
            callee_name: row.get("callee_name")?,
            file: row.get("file")?,
            line: row.get::<_, i64>("line")? as u32,
            column: row.get::<_, i64>("column")? as u32,
        })
    }

    fn size_and_waste(conn: &Connection) -> StorageResult<(u64, u64)> {
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        let freelist: i64 = conn.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
        Ok((
            (page_count * page_size) as u64,
            (freelist * page_size) as u64,
        ))
    }

    fn integrity(conn: &Connection, full: bool) -> StorageResult<bool> {
        let pragma = if full {
            "PRAGMA integrity_check"
        } else {
            "PRAGMA quick_check"
        };
        let mut stmt = conn.prepare(pragma)?;
        let results = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results.len() == 1 && results[0] == "ok")
    }
}

impl SymbolStore for SqliteStore {
    fn backend_kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn save_symbol(&self, symbol: &Symbol) -> StorageResult<()> {
        let conn = self.conn.lock();
        Self::upsert_symbol(&conn, symbol, now_unix())
    }

    fn save_symbols_batch(&self, symbols: &[Symbol]) -> StorageResult<usize> {
        if symbols.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_unix();
        for symbol in symbols {
            Self::upsert_symbol(&tx, symbol, now)?;
        }
        tx.commit()?;
        Ok(symbols.len())
    }

    fn load_symbol_by_usr(&self, usr: &str) -> StorageResult<Option<Symbol>> {
        let conn = self.conn.lock();
        let symbol = conn
            .query_row(
                "SELECT * FROM symbols WHERE usr = ?1",
                [usr],
                Self::symbol_from_row,
            )
            .optional()?;
        Ok(symbol)
    }

    fn load_symbols_by_name(&self, name: &str) -> StorageResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        Self::query_symbols(
            &conn,
            "SELECT * FROM symbols WHERE name = ?1 ORDER BY file, line",
            &[&name],
        )
    }

    fn load_symbols_by_file(&self, file: &str) -> StorageResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        Self::query_symbols(
            &conn,
            "SELECT * FROM symbols WHERE file = ?1 ORDER BY line",
            &[&file],
        )
    }

    fn load_symbols_by_kind(
        &self,
        kind: SymbolKind,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        let kind_str = kind.as_str();
        if project_only {
            Self::query_symbols(
                &conn,
                "SELECT * FROM symbols WHERE kind = ?1 AND is_project = 1 ORDER BY file, line",
                &[&kind_str],
            )
        } else {
            Self::query_symbols(
                &conn,
                "SELECT * FROM symbols WHERE kind = ?1 ORDER BY file, line",
                &[&kind_str],
            )
        }
    }

    fn load_all_symbols(&self) -> StorageResult<Vec<Symbol>> {
        let conn = self.conn.lock();
        Self::query_symbols(&conn, "SELECT * FROM symbols ORDER BY file, line", &[])
    }

    fn count_symbols(&self) -> StorageResult<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    fn delete_symbols_by_file(&self, file: &str) -> StorageResult<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM symbols WHERE file = ?1", [file])?;
        tx.execute("DELETE FROM call_sites WHERE file = ?1", [file])?;
        tx.commit()?;
        if deleted > 0 {
            debug!("deleted {deleted} symbols from {file}");
        }
        Ok(deleted as u64)
    }

    fn search_fts(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let result = {
            let conn = self.conn.lock();
            let mut sql = String::from(
                "SELECT * FROM symbols WHERE rowid IN \
                 (SELECT rowid FROM symbols_fts WHERE symbols_fts MATCH ?1)",
            );
            if kind.is_some() {
                sql.push_str(" AND kind = ?2");
            }
            if project_only {
                sql.push_str(" AND is_project = 1");
            }
            sql.push_str(" ORDER BY name, qualified_name");

            match kind {
                Some(k) => {
                    let kind_str = k.as_str();
                    Self::query_symbols(&conn, &sql, &[&pattern, &kind_str])
                }
                None => Self::query_symbols(&conn, &sql, &[&pattern]),
            }
        };

        match result {
            Ok(symbols) => Ok(symbols),
            Err(e) => {
                // Most likely an FTS5 syntax error (unbalanced quotes,
                // stray operators). The regex path is more forgiving.
                debug!("FTS search failed for '{pattern}' ({e}), falling back to regex");
                self.search_regex(pattern, kind, project_only)
            }
        }
    }

    fn search_regex(
        &self,
        pattern: &str,
        kind: Option<SymbolKind>,
        project_only: bool,
    ) -> StorageResult<Vec<Symbol>> {
        let regex = match crate::query::pattern::compile_fullmatch(pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("invalid regex pattern '{pattern}': {e}");
                return Ok(Vec::new());
            }
        };

        let candidates = match kind {
            Some(k) => self.load_symbols_by_kind(k, project_only)?,
            None => {
                let all = self.load_all_symbols()?;
                if project_only {
                    all.into_iter().filter(|s| s.is_project).collect()
                } else {
                    all
                }
            }
        };

        Ok(candidates
            .into_iter()
            .filter(|s| regex.is_match(&s.name) || regex.is_match(&s.qualified_name))
            .collect())
    }

    fn update_file_metadata(&self, meta: &FileMetadata) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO file_metadata
             (file_path, file_hash, compile_args_hash, indexed_at, symbol_count,
              success, error_message, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                meta.file_path,
                meta.file_hash,
                meta.compile_args_hash,
                meta.indexed_at,
                meta.symbol_count as i64,
                meta.success,
                meta.error_message,
                meta.retry_count as i64,
            ],
        )?;
        Ok(())
    }

    fn get_file_metadata(&self, file: &str) -> StorageResult<Option<FileMetadata>> {
        let conn = self.conn.lock();
        let meta = conn
            .query_row(
                "SELECT * FROM file_metadata WHERE file_path = ?1",
                [file],
                Self::file_metadata_from_row,
            )
            .optional()?;
        Ok(meta)
    }

    fn load_all_file_metadata(&self) -> StorageResult<Vec<FileMetadata>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM file_metadata ORDER BY file_path")?;
        let rows = stmt
            .query_map([], Self::file_metadata_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn save_file_cache(
        &self,
        file: &str,
        symbols: &[Symbol],
        file_hash: &str,
        compile_args_hash: Option<&str>,
        success: bool,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file = ?1", [file])?;
        tx.execute("DELETE FROM call_sites WHERE file = ?1", [file])?;
        let now = now_unix();
        for symbol in symbols {
            Self::upsert_symbol(&tx, symbol, now)?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO file_metadata
             (file_path, file_hash, compile_args_hash, indexed_at, symbol_count,
              success, error_message, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                file,
                file_hash,
                compile_args_hash,
                now,
                symbols.len() as i64,
                success,
                error_message,
                retry_count as i64,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_file_cache(
        &self,
        file: &str,
        current_hash: &str,
        compile_args_hash: Option<&str>,
    ) -> StorageResult<Option<FileCacheEntry>> {
        let Some(meta) = self.get_file_metadata(file)? else {
            return Ok(None);
        };

        if meta.file_hash != current_hash {
            return Ok(None);
        }
        if let Some(args_hash) = compile_args_hash {
            if meta.compile_args_hash.as_deref() != Some(args_hash) {
                return Ok(None);
            }
        }

        let symbols = self.load_symbols_by_file(file)?;
        Ok(Some(FileCacheEntry {
            symbols,
            success: meta.success,
            error_message: meta.error_message,
            retry_count: meta.retry_count,
        }))
    }

    fn remove_file_cache(&self, file: &str) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file = ?1", [file])?;
        tx.execute("DELETE FROM call_sites WHERE file = ?1", [file])?;
        tx.execute("DELETE FROM type_aliases WHERE file = ?1", [file])?;
        tx.execute(
            "DELETE FROM file_dependencies WHERE source_file = ?1",
            [file],
        )?;
        tx.execute("DELETE FROM file_metadata WHERE file_path = ?1", [file])?;
        tx.commit()?;
        Ok(())
    }

    fn replace_call_sites(&self, caller_file: &str, sites: &[CallSite]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM call_sites WHERE file = ?1", [caller_file])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO call_sites (caller_usr, callee_usr, callee_name, file, line, "column")
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            )?;
            for site in sites {
                stmt.execute(params![
                    site.caller_usr,
                    site.callee_usr,
                    site.callee_name,
                    site.file,
                    site.line as i64,
                    site.column as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn call_sites_by_caller(&self, caller_usr: &str) -> StorageResult<Vec<CallSite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM call_sites WHERE caller_usr = ?1 ORDER BY file, line",
        )?;
        let rows = stmt
            .query_map([caller_usr], Self::call_site_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn call_sites_by_callee(&self, callee: &str) -> StorageResult<Vec<CallSite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM call_sites WHERE callee_usr = ?1 OR callee_name = ?1
             ORDER BY file, line",
        )?;
        let rows = stmt
            .query_map([callee], Self::call_site_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_all_call_sites(&self) -> StorageResult<Vec<CallSite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM call_sites ORDER BY file, line")?;
        let rows = stmt
            .query_map([], Self::call_site_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn replace_type_aliases(&self, file: &str, aliases: &[TypeAlias]) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM type_aliases WHERE file = ?1", [file])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO type_aliases
                 (alias_qualified_name, alias_name, canonical_type, file, line)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for alias in aliases {
                stmt.execute(params![
                    alias.alias_qualified_name,
                    alias.alias_name,
                    alias.canonical_type,
                    alias.file,
                    alias.line as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_type_aliases(&self) -> StorageResult<Vec<TypeAlias>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM type_aliases ORDER BY alias_qualified_name")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TypeAlias {
                    alias_name: row.get("alias_name")?,
                    alias_qualified_name: row.get("alias_qualified_name")?,
                    canonical_type: row.get("canonical_type")?,
                    file: row.get("file")?,
                    line: row.get::<_, i64>("line")? as u32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn replace_file_dependencies(
        &self,
        source_file: &str,
        deps: &[FileDependency],
    ) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM file_dependencies WHERE source_file = ?1",
            [source_file],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO file_dependencies
                 (source_file, included_file, is_direct, include_depth)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for dep in deps {
                stmt.execute(params![
                    dep.source_file,
                    dep.included_file,
                    dep.is_direct,
                    dep.include_depth as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_file_dependencies(&self) -> StorageResult<Vec<FileDependency>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM file_dependencies ORDER BY source_file, included_file")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FileDependency {
                    source_file: row.get("source_file")?,
                    included_file: row.get("included_file")?,
                    is_direct: row.get("is_direct")?,
                    include_depth: row.get::<_, i64>("include_depth")? as u32,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn set_cache_metadata(&self, key: &str, value: &str) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO cache_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now_unix()],
        )?;
        Ok(())
    }

    fn get_cache_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM cache_metadata WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn vacuum(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    fn analyze(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("ANALYZE")?;
        Ok(())
    }

    fn optimize_fts(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO symbols_fts(symbols_fts) VALUES('optimize')",
            [],
        )?;
        Ok(())
    }

    fn rebuild_fts(&self) -> StorageResult<()> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO symbols_fts(symbols_fts) VALUES('rebuild')", [])?;
        Ok(())
    }

    fn auto_maintenance(
        &self,
        vacuum_threshold_bytes: u64,
        vacuum_min_waste_bytes: u64,
    ) -> StorageResult<MaintenanceReport> {
        let (size_before, waste) = {
            let conn = self.conn.lock();
            Self::size_and_waste(&conn)?
        };

        let mut report = MaintenanceReport {
            size_before_bytes: size_before,
            ..Default::default()
        };

        self.analyze()?;
        report.analyzed = true;
        self.optimize_fts()?;
        report.fts_optimized = true;

        if size_before >= vacuum_threshold_bytes && waste >= vacuum_min_waste_bytes {
            self.vacuum()?;
            report.vacuumed = true;
        } else {
            debug!(
                "skipping vacuum: size {size_before} B, waste {waste} B below thresholds"
            );
        }

        let (size_after, _) = {
            let conn = self.conn.lock();
            Self::size_and_waste(&conn)?
        };
        report.size_after_bytes = size_after;
        Ok(report)
    }

    fn check_integrity(&self, full: bool) -> StorageResult<bool> {
        let conn = self.conn.lock();
        Self::integrity(&conn, full)
    }

    fn health_status(&self) -> StorageResult<HealthStatus> {
        let conn = self.conn.lock();

        let integrity_ok = Self::integrity(&conn, false)?;
        let (size_bytes, _) = Self::size_and_waste(&conn)?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;

        let symbol_rows: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        let fts_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM symbols_fts", [], |r| r.get(0))?;

        let mut table_counts = HashMap::new();
        for table in [
            "symbols",
            "file_metadata",
            "call_sites",
            "type_aliases",
            "file_dependencies",
            "cache_metadata",
        ] {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
            table_counts.insert(table.to_string(), count as u64);
        }

        let fts_in_sync = symbol_rows == fts_rows;
        let mut warnings = Vec::new();
        let mut errors = Vec::new();
        if !fts_in_sync {
            warnings.push(format!(
                "FTS index out of sync: {fts_rows} FTS rows vs {symbol_rows} symbols \
                 (run rebuild_fts)"
            ));
        }
        if !integrity_ok {
            errors.push("integrity check failed".to_string());
        }

        Ok(HealthStatus {
            healthy: integrity_ok && fts_in_sync,
            integrity_ok,
            size_bytes,
            symbol_rows: symbol_rows as u64,
            fts_rows: fts_rows as u64,
            fts_in_sync,
            journal_mode,
            table_counts,
            warnings,
            errors,
        })
    }

    fn stats(&self) -> StorageResult<StoreStats> {
        let conn = self.conn.lock();

        let total_symbols: i64 =
            conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;

        let mut by_kind = HashMap::new();
        let mut stmt =
            conn.prepare("SELECT kind, COUNT(*) FROM symbols GROUP BY kind ORDER BY 2 DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            by_kind.insert(kind, count as u64);
        }

        let project_symbols: i64 = conn.query_row(
            "SELECT COUNT(*) FROM symbols WHERE is_project = 1",
            [],
            |r| r.get(0),
        )?;
        let total_files: i64 =
            conn.query_row("SELECT COUNT(*) FROM file_metadata", [], |r| r.get(0))?;
        let (db_size_bytes, _) = Self::size_and_waste(&conn)?;

        Ok(StoreStats {
            total_symbols: total_symbols as u64,
            by_kind,
            project_symbols: project_symbols as u64,
            dependency_symbols: (total_symbols - project_symbols) as u64,
            total_files: total_files as u64,
            db_size_bytes,
        })
    }

    fn repair(&self) -> StorageResult<bool> {
        if self.check_integrity(true)? {
            debug!("integrity OK, no repair needed");
            return Ok(true);
        }

        let Some(db_path) = self.db_path.clone() else {
            return Ok(false);
        };

        info!("attempting dump-and-restore repair of {}", db_path.display());
        let temp_path = db_path.with_extension("repair_tmp");
        let _ = std::fs::remove_file(&temp_path);

        // Copy whatever rows are still readable into a fresh store.
        let fresh = SqliteStore::open(&temp_path)?;
        let recovered = self.load_all_symbols().unwrap_or_default();
        fresh.save_symbols_batch(&recovered)?;
        for meta in self.load_all_file_metadata().unwrap_or_default() {
            fresh.update_file_metadata(&meta)?;
        }
        let sites = self.load_all_call_sites().unwrap_or_default();
        let mut by_file: HashMap<String, Vec<CallSite>> = HashMap::new();
        for site in sites {
            by_file.entry(site.file.clone()).or_default().push(site);
        }
        for (file, sites) in by_file {
            fresh.replace_call_sites(&file, &sites)?;
        }
        drop(fresh);

        // Swap the repaired file in under the lock, then reconnect.
        let mut conn = self.conn.lock();
        *conn = Connection::open_in_memory()?;
        std::fs::remove_file(&db_path).map_err(|e| StorageError::Io {
            path: db_path.clone(),
            source: e,
        })?;
        std::fs::rename(&temp_path, &db_path).map_err(|e| StorageError::Io {
            path: db_path.clone(),
            source: e,
        })?;
        let new_conn = Connection::open(&db_path)?;
        Self::configure(&new_conn)?;
        *conn = new_conn;

        info!("repair complete: {} symbols recovered", recovered.len());
        Ok(true)
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for table in [
            "symbols",
            "file_metadata",
            "call_sites",
            "type_aliases",
            "file_dependencies",
            "cache_metadata",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;

    fn sample(usr: &str, name: &str, qualified: &str, file: &str) -> Symbol {
        let mut s = Symbol::new(usr, name, qualified, SymbolKind::Class, file, 1);
        s.is_definition = true;
        s
    }

    #[test]
    fn save_and_load_by_usr() {
        let store = SqliteStore::open_in_memory().unwrap();
        let symbol = sample("c:@S@Handler", "Handler", "app::Handler", "/p/h.h");
        store.save_symbol(&symbol).unwrap();

        let loaded = store.load_symbol_by_usr("c:@S@Handler").unwrap().unwrap();
        assert_eq!(loaded.name, "Handler");
        assert_eq!(loaded.qualified_name, "app::Handler");
        assert_eq!(loaded.namespace, "app");
        assert!(loaded.is_definition);
    }

    #[test]
    fn batch_save_counts_distinct_usrs() {
        let store = SqliteStore::open_in_memory().unwrap();
        let symbols = vec![
            sample("u1", "A", "A", "/p/a.h"),
            sample("u2", "B", "B", "/p/a.h"),
            sample("u1", "A", "A", "/p/a.h"),
        ];
        store.save_symbols_batch(&symbols).unwrap();
        // Duplicate USR in the batch upserts, so two rows remain.
        assert_eq!(store.count_symbols().unwrap(), 2);
    }

    #[test]
    fn delete_by_file_cascades_to_fts_and_call_sites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[
                sample("u1", "A", "A", "/p/a.cpp"),
                sample("u2", "B", "B", "/p/b.cpp"),
            ])
            .unwrap();
        store
            .replace_call_sites(
                "/p/a.cpp",
                &[CallSite {
                    caller_usr: "u1".into(),
                    callee_usr: "u2".into(),
                    callee_name: "B".into(),
                    file: "/p/a.cpp".into(),
                    line: 3,
                    column: 5,
                }],
            )
            .unwrap();

        let deleted = store.delete_symbols_by_file("/p/a.cpp").unwrap();
        assert_eq!(deleted, 1);
        assert!(store.load_symbols_by_file("/p/a.cpp").unwrap().is_empty());
        assert!(store.call_sites_by_caller("u1").unwrap().is_empty());

        let health = store.health_status().unwrap();
        assert!(health.fts_in_sync, "FTS rows must track symbol rows");
        assert_eq!(health.symbol_rows, 1);
    }

    #[test]
    fn fts_search_finds_by_simple_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[
                sample("u1", "Handler", "app::ui::Handler", "/p/h.h"),
                sample("u2", "Widget", "app::Widget", "/p/w.h"),
            ])
            .unwrap();

        let hits = store.search_fts("Handler", None, true).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].qualified_name, "app::ui::Handler");
    }

    #[test]
    fn fts_syntax_error_falls_back_to_regex() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[sample("u1", "Handler", "Handler", "/p/h.h")])
            .unwrap();

        // Unbalanced quote is an FTS5 syntax error; regex fallback treats it
        // as a non-matching pattern and returns empty instead of erroring.
        let hits = store.search_fts("\"Handler", None, true).unwrap();
        assert!(hits.is_empty() || hits[0].name == "Handler");
    }

    #[test]
    fn regex_search_is_fullmatch() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[
                sample("u1", "Handler", "Handler", "/p/h.h"),
                sample("u2", "HandlerFactory", "HandlerFactory", "/p/h.h"),
            ])
            .unwrap();

        let exact = store.search_regex("Handler", None, true).unwrap();
        assert_eq!(exact.len(), 1);

        let broad = store.search_regex("Handler.*", None, true).unwrap();
        assert_eq!(broad.len(), 2);
    }

    #[test]
    fn invalid_regex_returns_empty() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[sample("u1", "A", "A", "/p/a.h")])
            .unwrap();
        let hits = store.search_regex("[unclosed", None, true).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn file_cache_round_trip_and_hash_invalidation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let symbols = vec![sample("u1", "A", "A", "/p/a.h")];
        store
            .save_file_cache("/p/a.h", &symbols, "hash1", Some("args1"), true, None, 0)
            .unwrap();

        assert!(store
            .load_file_cache("/p/a.h", "hash1", Some("args1"))
            .unwrap()
            .is_some());
        assert!(store
            .load_file_cache("/p/a.h", "hash2", Some("args1"))
            .unwrap()
            .is_none());
        assert!(store
            .load_file_cache("/p/a.h", "hash1", Some("args2"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn failed_parse_is_cached_with_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_file_cache(
                "/p/broken.cpp",
                &[],
                "hash1",
                None,
                false,
                Some("unbalanced braces"),
                2,
            )
            .unwrap();

        let entry = store
            .load_file_cache("/p/broken.cpp", "hash1", None)
            .unwrap()
            .unwrap();
        assert!(!entry.success);
        assert_eq!(entry.error_message.as_deref(), Some("unbalanced braces"));
        assert_eq!(entry.retry_count, 2);
    }

    #[test]
    fn remove_file_cache_drops_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_file_cache(
                "/p/a.h",
                &[sample("u1", "A", "A", "/p/a.h")],
                "h",
                None,
                true,
                None,
                0,
            )
            .unwrap();
        store
            .replace_file_dependencies(
                "/p/a.h",
                &[FileDependency {
                    source_file: "/p/a.h".into(),
                    included_file: "/p/b.h".into(),
                    is_direct: true,
                    include_depth: 1,
                }],
            )
            .unwrap();

        store.remove_file_cache("/p/a.h").unwrap();
        assert!(store.get_file_metadata("/p/a.h").unwrap().is_none());
        assert!(store.load_symbols_by_file("/p/a.h").unwrap().is_empty());
        assert!(store.load_file_dependencies().unwrap().is_empty());
    }

    #[test]
    fn cache_metadata_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set_cache_metadata("include_dependencies", "true")
            .unwrap();
        assert_eq!(
            store
                .get_cache_metadata("include_dependencies")
                .unwrap()
                .as_deref(),
            Some("true")
        );
        assert!(store.get_cache_metadata("missing").unwrap().is_none());
    }

    #[test]
    fn rebuild_fts_restores_parity() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[sample("u1", "A", "A", "/p/a.h")])
            .unwrap();
        store.rebuild_fts().unwrap();
        let health = store.health_status().unwrap();
        assert!(health.fts_in_sync);
    }

    #[test]
    fn maintenance_reports_sizes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[sample("u1", "A", "A", "/p/a.h")])
            .unwrap();
        let report = store.auto_maintenance(u64::MAX, u64::MAX).unwrap();
        assert!(report.analyzed);
        assert!(report.fts_optimized);
        assert!(!report.vacuumed, "vacuum gated by thresholds");
        assert!(report.size_before_bytes > 0);
    }

    #[test]
    fn integrity_check_passes_on_fresh_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.check_integrity(false).unwrap());
        assert!(store.check_integrity(true).unwrap());
    }

    #[test]
    fn clear_keeps_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save_symbols_batch(&[sample("u1", "A", "A", "/p/a.h")])
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.count_symbols().unwrap(), 0);
        // Still usable after clear.
        store
            .save_symbols_batch(&[sample("u2", "B", "B", "/p/b.h")])
            .unwrap();
        assert_eq!(store.count_symbols().unwrap(), 1);
    }

    #[test]
    fn stats_break_down_by_kind_and_scope() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut external = sample("u2", "StdThing", "std::StdThing", "/usr/include/t.h");
        external.is_project = false;
        store
            .save_symbols_batch(&[sample("u1", "A", "A", "/p/a.h"), external])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_symbols, 2);
        assert_eq!(stats.project_symbols, 1);
        assert_eq!(stats.dependency_symbols, 1);
        assert_eq!(stats.by_kind.get("class"), Some(&2));
    }
}
