//! Migration store trait definition

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tm_core::ExecutionRecord;

/// Current holder of the advisory lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// Storage backend the migration runner drives.
///
/// The execution history lives in the same store being migrated.
/// Implementations must be Send + Sync for async operation.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Create the history and lock structures if they are absent.
    ///
    /// Must succeed without side effects when they already exist.
    async fn ensure_history(&self) -> DbResult<()>;

    /// Read every persisted execution record, ascending by identifier
    async fn applied_records(&self) -> DbResult<Vec<ExecutionRecord>>;

    /// Execute one or more schema-mutating statements
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Persist one execution record.
    ///
    /// Fails with [`DbError::DuplicateRecord`] if the identifier is already recorded.
    async fn record_applied(&self, record: &ExecutionRecord) -> DbResult<()>;

    /// Try to take the store-wide advisory lock for `owner`.
    ///
    /// Returns `false` without waiting when another owner holds it.
    async fn try_acquire_lock(&self, owner: &str) -> DbResult<bool>;

    /// Release the advisory lock if `owner` holds it
    async fn release_lock(&self, owner: &str) -> DbResult<()>;

    /// Who holds the advisory lock, if anyone.
    ///
    /// The lock outlives its holder's process, so callers use this to spot
    /// and break locks left behind by a crash.
    async fn lock_info(&self) -> DbResult<Option<LockInfo>>;

    /// Check if a table or view exists
    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        let _ = name;
        Err(self.not_implemented("relation_exists"))
    }

    /// Whether `begin`/`commit`/`rollback` wrap DDL and record writes atomically
    fn supports_transactions(&self) -> bool {
        false
    }

    /// Open a transaction
    async fn begin(&self) -> DbResult<()> {
        Err(self.not_implemented("begin"))
    }

    /// Commit the open transaction
    async fn commit(&self) -> DbResult<()> {
        Err(self.not_implemented("commit"))
    }

    /// Roll back the open transaction
    async fn rollback(&self) -> DbResult<()> {
        Err(self.not_implemented("rollback"))
    }

    /// Store type identifier for logging
    fn store_type(&self) -> &'static str;

    #[doc(hidden)]
    fn not_implemented(&self, feature: &str) -> DbError {
        DbError::NotImplemented {
            backend: self.store_type().to_string(),
            feature: feature.to_string(),
        }
    }
}
