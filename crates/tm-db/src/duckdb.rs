//! DuckDB store backend implementation

use crate::error::{DbError, DbResult};
use crate::traits::{LockInfo, MigrationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::Mutex;
use tm_core::{ExecutionRecord, MigrationId};

/// Default schema holding the history and lock tables
pub const DEFAULT_HISTORY_SCHEMA: &str = "tidemark";

/// Lock table holds at most this single row.
const LOCK_ROW_ID: i32 = 1;

/// DuckDB store backend
///
/// A single connection guarded by a mutex; every store call runs to
/// completion while holding it.
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    schema: String,
}

impl DuckDbStore {
    /// Create a new in-memory DuckDB store
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    /// Create a new DuckDB store from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        Ok(Self::from_connection(conn))
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            schema: DEFAULT_HISTORY_SCHEMA.to_string(),
        }
    }

    /// Keep the history and lock tables in `schema` instead of the default.
    ///
    /// `schema` must be a plain identifier; `Config::validate` enforces this
    /// for configured values.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Schema holding the history and lock tables
    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn history_table(&self) -> String {
        format!("{}.schema_migrations", self.schema)
    }

    fn lock_table(&self) -> String {
        format!("{}.migration_lock", self.schema)
    }

    /// Execute batch SQL synchronously
    fn execute_batch_sync(&self, sql: &str) -> DbResult<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| DbError::ExecutionError(e.to_string()))
    }

    fn transaction_statement(&self, sql: &str) -> DbResult<()> {
        let conn = self.conn.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| DbError::TransactionError(format!("{sql} failed: {e}")))
    }

    fn ensure_history_sync(&self) -> DbResult<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {history} (
                 version      BIGINT PRIMARY KEY,
                 identifier   VARCHAR NOT NULL,
                 description  VARCHAR NOT NULL,
                 checksum     VARCHAR NOT NULL,
                 applied_at   VARCHAR NOT NULL,
                 execution_ms BIGINT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS {lock} (
                 lock_id     INTEGER PRIMARY KEY,
                 owner       VARCHAR NOT NULL,
                 acquired_at VARCHAR NOT NULL
             );",
            schema = self.schema,
            history = self.history_table(),
            lock = self.lock_table(),
        );
        log::debug!("Ensuring migration history in schema {}", self.schema);
        self.execute_batch_sync(&sql)
    }

    fn applied_records_sync(&self) -> DbResult<Vec<ExecutionRecord>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT identifier, description, checksum, applied_at, execution_ms
             FROM {} ORDER BY version",
            self.history_table()
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(identifier, description, checksum, applied_at, execution_ms)| {
                let identifier = MigrationId::parse(&identifier)
                    .map_err(|e| DbError::CorruptHistory(e.to_string()))?;
                let applied_at = DateTime::parse_from_rfc3339(&applied_at)
                    .map_err(|e| {
                        DbError::CorruptHistory(format!(
                            "applied_at '{applied_at}' for {identifier}: {e}"
                        ))
                    })?
                    .with_timezone(&Utc);
                let execution_ms = u64::try_from(execution_ms).map_err(|_| {
                    DbError::CorruptHistory(format!(
                        "execution_ms {execution_ms} for {identifier} is negative"
                    ))
                })?;
                Ok(ExecutionRecord {
                    identifier,
                    description,
                    checksum,
                    applied_at,
                    execution_ms,
                })
            })
            .collect()
    }

    fn record_applied_sync(&self, record: &ExecutionRecord) -> DbResult<()> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "INSERT INTO {} (version, identifier, description, checksum, applied_at, execution_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
            self.history_table()
        );
        // Identifiers are at most 18 digits, so the version always fits.
        let version = record.identifier.version() as i64;
        let execution_ms = i64::try_from(record.execution_ms).unwrap_or(i64::MAX);

        conn.execute(
            &sql,
            duckdb::params![
                version,
                record.identifier.as_str(),
                record.description,
                record.checksum,
                record.applied_at.to_rfc3339(),
                execution_ms,
            ],
        )
        .map_err(|e| {
            let msg = e.to_string();
            if is_constraint_violation(&msg) {
                DbError::DuplicateRecord(record.identifier.to_string())
            } else {
                DbError::ExecutionError(msg)
            }
        })?;
        Ok(())
    }

    fn try_acquire_lock_sync(&self, owner: &str) -> DbResult<bool> {
        let conn = self.conn.lock()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} (lock_id, owner, acquired_at) VALUES (?, ?, ?)
                 ON CONFLICT DO NOTHING",
                self.lock_table()
            ),
            duckdb::params![LOCK_ROW_ID, owner, Utc::now().to_rfc3339()],
        )?;
        if inserted > 0 {
            return Ok(true);
        }

        match lock_info_locked(&conn, &self.lock_table())? {
            Some(info) if info.owner == owner => Ok(true),
            Some(info) => {
                log::debug!("Migration lock held by {} since {}", info.owner, info.acquired_at);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn lock_info_sync(&self) -> DbResult<Option<LockInfo>> {
        let conn = self.conn.lock()?;
        lock_info_locked(&conn, &self.lock_table())
    }

    fn release_lock_sync(&self, owner: &str) -> DbResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE lock_id = ? AND owner = ?",
                self.lock_table()
            ),
            duckdb::params![LOCK_ROW_ID, owner],
        )?;
        Ok(())
    }

    /// Check if relation exists synchronously
    fn relation_exists_sync(&self, name: &str) -> DbResult<bool> {
        let conn = self.conn.lock()?;

        // Handle schema-qualified names
        let (schema, table) = match name.rfind('.') {
            Some(pos) => (&name[..pos], &name[pos + 1..]),
            None => ("main", name),
        };

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            duckdb::params![schema, table],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }
}

fn lock_info_locked(conn: &Connection, lock_table: &str) -> DbResult<Option<LockInfo>> {
    let row = conn.query_row(
        &format!("SELECT owner, acquired_at FROM {lock_table} WHERE lock_id = ?"),
        duckdb::params![LOCK_ROW_ID],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    );
    let (owner, acquired_at) = match row {
        Ok(row) => row,
        Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let acquired_at = DateTime::parse_from_rfc3339(&acquired_at)
        .map_err(|e| {
            DbError::CorruptHistory(format!("lock acquired_at '{acquired_at}' for {owner}: {e}"))
        })?
        .with_timezone(&Utc);
    Ok(Some(LockInfo { owner, acquired_at }))
}

/// DuckDB reports primary-key conflicts only through the error message.
fn is_constraint_violation(msg: &str) -> bool {
    msg.contains("Constraint Error")
        || msg.contains("Duplicate key")
        || msg.contains("PRIMARY KEY or UNIQUE constraint")
}

#[async_trait]
impl MigrationStore for DuckDbStore {
    async fn ensure_history(&self) -> DbResult<()> {
        self.ensure_history_sync()
    }

    async fn applied_records(&self) -> DbResult<Vec<ExecutionRecord>> {
        self.applied_records_sync()
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.execute_batch_sync(sql)
    }

    async fn record_applied(&self, record: &ExecutionRecord) -> DbResult<()> {
        self.record_applied_sync(record)
    }

    async fn try_acquire_lock(&self, owner: &str) -> DbResult<bool> {
        self.try_acquire_lock_sync(owner)
    }

    async fn release_lock(&self, owner: &str) -> DbResult<()> {
        self.release_lock_sync(owner)
    }

    async fn lock_info(&self) -> DbResult<Option<LockInfo>> {
        self.lock_info_sync()
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.relation_exists_sync(name)
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self) -> DbResult<()> {
        self.transaction_statement("BEGIN TRANSACTION")
    }

    async fn commit(&self) -> DbResult<()> {
        self.transaction_statement("COMMIT")
    }

    async fn rollback(&self) -> DbResult<()> {
        self.transaction_statement("ROLLBACK")
    }

    fn store_type(&self) -> &'static str {
        "duckdb"
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
