//! Persisted execution history entries.

use crate::migration_id::MigrationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successfully applied migration.
///
/// Written exactly once, when the migration's body completes, and never
/// mutated afterwards. Only `identifier` participates in identity; the other
/// fields are kept for drift detection and operator reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Identifier of the applied definition
    pub identifier: MigrationId,

    /// Description at the time of application
    pub description: String,

    /// Checksum of the body that was applied
    pub checksum: String,

    /// When the body completed
    pub applied_at: DateTime<Utc>,

    /// How long the body took to execute (in milliseconds)
    pub execution_ms: u64,
}

impl ExecutionRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        identifier: MigrationId,
        description: impl Into<String>,
        checksum: impl Into<String>,
        execution_ms: u64,
    ) -> Self {
        Self {
            identifier,
            description: description.into(),
            checksum: checksum.into(),
            applied_at: Utc::now(),
            execution_ms,
        }
    }
}
