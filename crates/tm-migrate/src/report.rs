//! Run summaries and status reports returned to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tm_core::{ExecutionRecord, MigrationId};

/// Outcome of one `run()` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Identifiers applied by this run, in application order
    pub executed: Vec<MigrationId>,

    /// Identifiers that were already applied, in registry order
    pub skipped: Vec<MigrationId>,

    /// Set when `executed` lists what would run rather than what ran
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

impl RunReport {
    /// Whether this run changed nothing
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Per-definition state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EntryState {
    /// Recorded in history
    Applied {
        applied_at: DateTime<Utc>,
        execution_ms: u64,
        /// False when the definition changed after it was applied
        checksum_matches: bool,
    },
    /// Not yet recorded
    Pending,
}

/// One registry definition and its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub identifier: MigrationId,
    pub description: String,
    #[serde(flatten)]
    pub state: EntryState,
}

/// Registry reconciled against history, without applying anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Every registry definition, ascending
    pub entries: Vec<StatusEntry>,

    /// History records with no matching definition in this build
    pub unknown: Vec<ExecutionRecord>,
}

impl MigrationStatus {
    /// Identifiers still to be applied, ascending
    pub fn pending(&self) -> Vec<&MigrationId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::Pending))
            .map(|e| &e.identifier)
            .collect()
    }

    /// Number of definitions already applied
    pub fn applied_count(&self) -> usize {
        self.entries.len() - self.pending().len()
    }

    /// Applied definitions whose body no longer matches what was applied
    pub fn drifted(&self) -> Vec<&MigrationId> {
        self.entries
            .iter()
            .filter(|e| {
                matches!(
                    e.state,
                    EntryState::Applied {
                        checksum_matches: false,
                        ..
                    }
                )
            })
            .map(|e| &e.identifier)
            .collect()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending().is_empty()
    }
}
