//! SqliteBackend — SQLite WAL persistent storage for coordination entries
//!
//! - WAL mode: readers see a consistent snapshot and never wait on writers
//! - Busy timeout: a writer waits a bounded time for the lock, then fails
//!   with a retryable [`StoreError::LockTimeout`]
//! - `synchronous` policy: the journal is synced before a write is acknowledged
//! - One table keyed by `(namespace, key)`; the unique index doubles as the
//!   prefix-search index for `GLOB` patterns within a namespace
//!
//! Several processes may open the same file; all mutation goes through
//! SQLite's own locking.

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{expired, BackendKind, MemoryBackend, UpdateFn, WriteRequest};
use crate::clock::{from_millis, Clock};
use crate::config::{StoreConfig, SyncMode};
use crate::entry::{Entry, KeyPattern, ListOptions, Metadata};
use crate::error::{target, Result, StoreError};

const ENTRY_COLUMNS: &str =
    "namespace, key, value, metadata, created_at, updated_at, expires_at";

/// Persistent backend over a single SQLite file
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    lock_timeout: Duration,
    cache_size_kib: u64,
    synchronous: SyncMode,
    /// Serializes writers inside this process; SQLite serializes across processes
    writer: Mutex<Connection>,
    /// Separate connection so in-process readers never queue behind a writer
    reader: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

/// Row as read from SQLite, before payload decoding
struct RawRow {
    namespace: String,
    key: String,
    value: String,
    metadata: Option<String>,
    created_at: i64,
    updated_at: i64,
    expires_at: Option<i64>,
}

impl SqliteBackend {
    /// Open (or create) the backing file and initialize it.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use coord_memory::{clock::SystemClock, config::StoreConfig, storage::SqliteBackend};
    /// let backend = SqliteBackend::open(&StoreConfig::default(), Arc::new(SystemClock)).unwrap();
    /// ```
    pub fn open(config: &StoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = config.db_path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::BackendFatal {
                operation: "initialize",
                target: parent.display().to_string(),
                message: format!("cannot create directory: {}", e),
            })?;
        }

        let backend = Self {
            lock_timeout: Duration::from_millis(config.lock_timeout_ms),
            cache_size_kib: config.cache_size_kib,
            synchronous: config.synchronous,
            writer: Mutex::new(open_connection(&path)?),
            reader: Mutex::new(open_connection(&path)?),
            path,
            clock,
        };
        backend.initialize()?;
        Ok(backend)
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(&self, conn: &Connection) -> Result<()> {
        conn.busy_timeout(self.lock_timeout)
            .map_err(|e| classify("initialize", self.path_target(), e))?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = {};
             PRAGMA cache_size = -{};",
            self.synchronous.pragma_value(),
            self.cache_size_kib
        ))
        .map_err(|e| classify("initialize", self.path_target(), e))
    }

    /// Idempotent DDL
    fn migrate(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- One row per (namespace, key); id preserves insertion order
            CREATE TABLE IF NOT EXISTS memory_entries (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       TEXT NOT NULL,
                metadata    TEXT,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL,
                expires_at  INTEGER,
                UNIQUE (namespace, key)
            );

            -- TTL sweep
            CREATE INDEX IF NOT EXISTS idx_memory_entries_expires
                ON memory_entries(expires_at)
                WHERE expires_at IS NOT NULL;
            ",
        )
        .map_err(|e| classify("initialize", self.path_target(), e))
    }

    fn path_target(&self) -> String {
        self.path.display().to_string()
    }

    fn query_entries(
        &self,
        operation: &'static str,
        namespace: &str,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Entry>> {
        let rows = {
            let conn = self.reader.lock();
            select_rows(&conn, sql, params)
                .map_err(|e| classify(operation, target(namespace, None), e))?
        };

        rows.into_iter().map(decode).collect()
    }
}

impl MemoryBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn initialize(&self) -> Result<()> {
        let writer = self.writer.lock();
        self.configure(&writer)?;
        self.migrate(&writer)?;
        drop(writer);

        let reader = self.reader.lock();
        self.configure(&reader)
    }

    fn store(&self, request: WriteRequest<'_>) -> Result<Entry> {
        let entry_target = target(request.namespace, Some(request.key));
        let (value_text, metadata_text) = encode(&request, &entry_target)?;
        let now_ms = self.clock.now_ms();
        let expires_ms = request.expires_at.map(|t| t.timestamp_millis());

        let created_at = {
            let mut conn = self.writer.lock();
            upsert(&mut conn, &request, &value_text, metadata_text.as_deref(), now_ms, expires_ms)
                .map_err(|e| classify("store", entry_target, e))?
        };

        Ok(written(&request, created_at, now_ms))
    }

    fn update(
        &self,
        namespace: &str,
        key: &str,
        apply: &mut UpdateFn<'_>,
    ) -> Result<Option<Entry>> {
        let entry_target = target(namespace, Some(key));
        let now_ms = self.clock.now_ms();

        let mut conn = self.writer.lock();
        // IMMEDIATE takes the write lock up front, so no other connection can
        // commit between the read and the write
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| classify("update", entry_target.clone(), e))?;
        let current = fetch_live(&tx, namespace, key, now_ms)
            .map_err(|e| classify("update", entry_target.clone(), e))?
            .map(decode)
            .transpose()?;

        // Dropping `tx` on any early return rolls back
        let Some(replacement) = apply(current.as_ref())? else {
            return Ok(current);
        };
        let request = replacement.as_request(namespace, key);
        let (value_text, metadata_text) = encode(&request, &entry_target)?;
        let expires_ms = request.expires_at.map(|t| t.timestamp_millis());

        let created_at = write_row(
            &tx,
            &request,
            &value_text,
            metadata_text.as_deref(),
            now_ms,
            expires_ms,
        )
        .map_err(|e| classify("update", entry_target.clone(), e))?;
        tx.commit().map_err(|e| classify("update", entry_target, e))?;

        Ok(Some(written(&request, created_at, now_ms)))
    }

    fn retrieve(&self, namespace: &str, key: &str) -> Result<Option<Entry>> {
        let now_ms = self.clock.now_ms();
        let raw = {
            let conn = self.reader.lock();
            fetch_live(&conn, namespace, key, now_ms)
                .map_err(|e| classify("retrieve", target(namespace, Some(key)), e))?
        };

        raw.map(decode).transpose()
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let now_ms = self.clock.now_ms();
        let conn = self.writer.lock();
        let removed: Option<Option<i64>> = conn
            .query_row(
                "DELETE FROM memory_entries WHERE namespace = ?1 AND key = ?2
                 RETURNING expires_at",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify("delete", target(namespace, Some(key)), e))?;

        Ok(matches!(removed, Some(exp) if !expired(exp, now_ms)))
    }

    fn list(&self, namespace: &str, options: ListOptions) -> Result<Vec<Entry>> {
        let now_ms = self.clock.now_ms();
        let limit = sql_limit(options);
        self.query_entries(
            "list",
            namespace,
            &format!(
                "SELECT {} FROM memory_entries
                 WHERE namespace = ?1 AND (expires_at IS NULL OR expires_at > ?2)
                 ORDER BY id LIMIT ?3",
                ENTRY_COLUMNS
            ),
            &[&namespace, &now_ms, &limit],
        )
    }

    fn search(
        &self,
        namespace: &str,
        pattern: &KeyPattern,
        options: ListOptions,
    ) -> Result<Vec<Entry>> {
        let now_ms = self.clock.now_ms();
        let limit = sql_limit(options);
        let glob = pattern.to_sql_glob();
        self.query_entries(
            "search",
            namespace,
            &format!(
                "SELECT {} FROM memory_entries
                 WHERE namespace = ?1 AND key GLOB ?2
                   AND (expires_at IS NULL OR expires_at > ?3)
                 ORDER BY id LIMIT ?4",
                ENTRY_COLUMNS
            ),
            &[&namespace, &glob, &now_ms, &limit],
        )
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let now_ms = self.clock.now_ms();
        let conn = self.writer.lock();
        conn.execute(
            "DELETE FROM memory_entries
             WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_ms],
        )
        .map_err(|e| classify("cleanup", self.path_target(), e))
    }

    fn namespaces(&self) -> Result<Vec<(String, usize)>> {
        let now_ms = self.clock.now_ms();
        let conn = self.reader.lock();
        namespace_counts(&conn, now_ms).map_err(|e| classify("namespaces", self.path_target(), e))
    }
}

fn decode(raw: RawRow) -> Result<Entry> {
    let entry_target = target(&raw.namespace, Some(&raw.key));
    let value = serde_json::from_str(&raw.value)
        .map_err(|e| StoreError::serialization(entry_target.clone(), e))?;
    let metadata = match raw.metadata {
        Some(text) => serde_json::from_str::<Metadata>(&text)
            .map_err(|e| StoreError::serialization(entry_target, e))?,
        None => Metadata::new(),
    };
    Ok(Entry {
        namespace: raw.namespace,
        key: raw.key,
        value,
        metadata,
        created_at: from_millis(raw.created_at),
        updated_at: from_millis(raw.updated_at),
        expires_at: raw.expires_at.map(from_millis),
    })
}

fn upsert(
    conn: &mut Connection,
    request: &WriteRequest<'_>,
    value_text: &str,
    metadata_text: Option<&str>,
    now_ms: i64,
    expires_ms: Option<i64>,
) -> rusqlite::Result<i64> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let created_at = write_row(&tx, request, value_text, metadata_text, now_ms, expires_ms)?;
    tx.commit()?;
    Ok(created_at)
}

/// Insert or replace inside an open transaction; returns `created_at`
fn write_row(
    conn: &Connection,
    request: &WriteRequest<'_>,
    value_text: &str,
    metadata_text: Option<&str>,
    now_ms: i64,
    expires_ms: Option<i64>,
) -> rusqlite::Result<i64> {
    // An expired row is logically absent: the new write is a fresh insert
    conn.execute(
        "DELETE FROM memory_entries
         WHERE namespace = ?1 AND key = ?2
           AND expires_at IS NOT NULL AND expires_at <= ?3",
        params![request.namespace, request.key, now_ms],
    )?;
    conn.query_row(
        "INSERT INTO memory_entries
             (namespace, key, value, metadata, created_at, updated_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)
         ON CONFLICT (namespace, key) DO UPDATE SET
             value      = excluded.value,
             metadata   = excluded.metadata,
             updated_at = excluded.updated_at,
             expires_at = excluded.expires_at
         RETURNING created_at",
        params![
            request.namespace,
            request.key,
            value_text,
            metadata_text,
            now_ms,
            expires_ms
        ],
        |row| row.get(0),
    )
}

fn fetch_live(
    conn: &Connection,
    namespace: &str,
    key: &str,
    now_ms: i64,
) -> rusqlite::Result<Option<RawRow>> {
    conn.prepare_cached(&format!(
        "SELECT {} FROM memory_entries
         WHERE namespace = ?1 AND key = ?2
           AND (expires_at IS NULL OR expires_at > ?3)",
        ENTRY_COLUMNS
    ))?
    .query_row(params![namespace, key, now_ms], read_row)
    .optional()
}

/// JSON text of the value and of non-empty metadata
fn encode(request: &WriteRequest<'_>, entry_target: &str) -> Result<(String, Option<String>)> {
    let value_text = serde_json::to_string(request.value)
        .map_err(|e| StoreError::serialization(entry_target, e))?;
    let metadata_text = if request.metadata.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(request.metadata)
                .map_err(|e| StoreError::serialization(entry_target, e))?,
        )
    };
    Ok((value_text, metadata_text))
}

fn written(request: &WriteRequest<'_>, created_at: i64, now_ms: i64) -> Entry {
    Entry {
        namespace: request.namespace.to_string(),
        key: request.key.to_string(),
        value: request.value.clone(),
        metadata: request.metadata.clone(),
        created_at: from_millis(created_at),
        updated_at: from_millis(now_ms),
        expires_at: request.expires_at.map(|t| from_millis(t.timestamp_millis())),
    }
}

fn select_rows(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> rusqlite::Result<Vec<RawRow>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, read_row)?;
    rows.collect()
}

fn namespace_counts(conn: &Connection, now_ms: i64) -> rusqlite::Result<Vec<(String, usize)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT namespace, COUNT(*) FROM memory_entries
         WHERE expires_at IS NULL OR expires_at > ?1
         GROUP BY namespace ORDER BY namespace",
    )?;
    let rows = stmt.query_map(params![now_ms], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    rows.collect()
}

fn open_connection(path: &Path) -> Result<Connection> {
    Connection::open(path).map_err(|e| classify("initialize", path.display().to_string(), e))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        namespace: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        metadata: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}

/// SQLite treats a negative LIMIT as "no limit"
fn sql_limit(options: ListOptions) -> i64 {
    options
        .limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

/// Busy/locked is transient contention; everything else is fatal for the file
fn classify(operation: &'static str, target: String, err: rusqlite::Error) -> StoreError {
    let message = err.to_string();
    match err {
        rusqlite::Error::SqliteFailure(ffi, _)
            if matches!(ffi.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StoreError::LockTimeout {
                operation,
                target,
                message,
            }
        }
        _ => StoreError::BackendFatal {
            operation,
            target,
            message,
        },
    }
}
