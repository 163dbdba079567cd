//! Error types for tm-db

use thiserror::Error;

/// Store operation errors
#[derive(Error, Debug)]
pub enum DbError {
    /// Connection error (D001)
    #[error("[D001] Database connection failed: {0}")]
    ConnectionError(String),

    /// Statement execution error (D002)
    #[error("[D002] SQL execution failed: {0}")]
    ExecutionError(String),

    /// BEGIN / COMMIT / ROLLBACK failed (D003)
    #[error("[D003] Transaction failed: {0}")]
    TransactionError(String),

    /// A record for this identifier already exists (D004)
    #[error("[D004] Execution record already exists for migration {0}")]
    DuplicateRecord(String),

    /// Mutex poisoned (D005)
    #[error("[D005] Store mutex poisoned: {0}")]
    MutexPoisoned(String),

    /// Not implemented (D006)
    #[error("[D006] Feature not implemented for {backend}: {feature}")]
    NotImplemented { backend: String, feature: String },

    /// Failure injected by the in-memory store (D007)
    #[error("[D007] Injected failure: {0}")]
    InjectedFailure(String),

    /// Stored history row could not be decoded (D008)
    #[error("[D008] Corrupt history row: {0}")]
    CorruptHistory(String),
}

/// Result type alias for DbError
pub type DbResult<T> = Result<T, DbError>;

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::ExecutionError(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::MutexPoisoned(err.to_string())
    }
}
