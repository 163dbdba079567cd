//! Error types for tm-migrate

use crate::report::RunReport;
use thiserror::Error;
use tm_core::{CoreError, MigrationId};
use tm_db::DbError;

/// Migration runner errors
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Registry is ambiguous; nothing may run (M001)
    #[error("[M001] Migration registry rejected: {0}")]
    Registry(#[from] CoreError),

    /// History structure could not be created (M002)
    #[error("[M002] Failed to bootstrap migration history: {0}")]
    Bootstrap(#[source] DbError),

    /// Store failed while taking the advisory lock (M003)
    #[error("[M003] Failed to acquire migration lock: {0}")]
    Lock(#[source] DbError),

    /// Another run held the advisory lock for too long (M004)
    #[error("[M004] Timed out after {waited_ms}ms waiting for another migration run to finish")]
    LockTimeout { waited_ms: u64 },

    /// Execution history could not be read (M005)
    #[error("[M005] Failed to read migration history: {0}")]
    HistoryRead(#[source] DbError),

    /// A migration body failed; it was not recorded (M006)
    #[error("[M006] Migration {identifier} failed: {source}")]
    Apply {
        identifier: MigrationId,
        source: DbError,
        progress: RunReport,
    },

    /// A migration body succeeded but its record could not be written (M007)
    #[error("[M007] Migration {identifier} applied but not recorded ({}): {source}", rollback_note(.rolled_back))]
    HistoryWrite {
        identifier: MigrationId,
        /// True when the body's effects were rolled back with the failed write
        rolled_back: bool,
        source: DbError,
        progress: RunReport,
    },
}

impl MigrateError {
    /// Stable error code, e.g. `M006`
    pub fn code(&self) -> &'static str {
        match self {
            MigrateError::Registry(_) => "M001",
            MigrateError::Bootstrap(_) => "M002",
            MigrateError::Lock(_) => "M003",
            MigrateError::LockTimeout { .. } => "M004",
            MigrateError::HistoryRead(_) => "M005",
            MigrateError::Apply { .. } => "M006",
            MigrateError::HistoryWrite { .. } => "M007",
        }
    }

    /// Identifier of the migration that failed, if one was being applied
    pub fn failed_identifier(&self) -> Option<&MigrationId> {
        match self {
            MigrateError::Apply { identifier, .. }
            | MigrateError::HistoryWrite { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    /// What the run had executed and skipped before failing
    pub fn progress(&self) -> Option<&RunReport> {
        match self {
            MigrateError::Apply { progress, .. } | MigrateError::HistoryWrite { progress, .. } => {
                Some(progress)
            }
            _ => None,
        }
    }

    /// Whether the store was mutated without a matching history record.
    ///
    /// Retrying in this state would apply the body a second time, so an
    /// operator has to reconcile the store by hand first.
    pub fn requires_intervention(&self) -> bool {
        matches!(
            self,
            MigrateError::HistoryWrite {
                rolled_back: false,
                ..
            }
        )
    }
}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "rolled back"
    } else {
        "store left modified"
    }
}

/// Result type alias for MigrateError
pub type MigrateResult<T> = Result<T, MigrateError>;
