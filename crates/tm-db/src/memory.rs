//! In-memory store backend
//!
//! Keeps history, lock ownership, and the log of executed statements in
//! process memory. Statements are recorded, not interpreted. Failures can be
//! injected at each store operation so callers can exercise their error paths.

use crate::error::{DbError, DbResult};
use crate::traits::{LockInfo, MigrationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tm_core::{ExecutionRecord, MigrationId};

#[derive(Debug, Default, Clone)]
struct Snapshot {
    records: BTreeMap<MigrationId, ExecutionRecord>,
    statements: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bootstrapped: bool,
    data: Snapshot,
    lock: Option<LockInfo>,
    open_transaction: Option<Snapshot>,
    fail_bootstrap: bool,
    fail_history_read: bool,
    fail_statements: Vec<String>,
    fail_records: HashSet<MigrationId>,
}

/// In-memory store backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    transactional: bool,
}

impl MemoryStore {
    /// Create an empty store without transaction support
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store whose `begin`/`rollback` snapshot and restore state
    pub fn transactional() -> Self {
        Self {
            state: Mutex::default(),
            transactional: true,
        }
    }

    fn state(&self) -> DbResult<MutexGuard<'_, MemoryState>> {
        Ok(self.state.lock()?)
    }

    /// Pre-populate history as if `record` had been applied earlier
    pub fn seed_record(&self, record: ExecutionRecord) -> DbResult<()> {
        let mut state = self.state()?;
        state.bootstrapped = true;
        state.data.records.insert(record.identifier.clone(), record);
        Ok(())
    }

    /// Statements executed so far, in execution order
    pub fn executed_statements(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.data.statements.clone())
            .unwrap_or_default()
    }

    /// Identifiers currently recorded, ascending
    pub fn recorded_identifiers(&self) -> Vec<MigrationId> {
        self.state
            .lock()
            .map(|s| s.data.records.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current advisory lock holder
    pub fn lock_holder(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.lock.as_ref().map(|l| l.owner.clone()))
    }

    /// Install a lock as if `owner` had taken it at `acquired_at` and never released it
    pub fn seed_lock(&self, owner: impl Into<String>, acquired_at: DateTime<Utc>) -> DbResult<()> {
        self.state()?.lock = Some(LockInfo {
            owner: owner.into(),
            acquired_at,
        });
        Ok(())
    }

    /// Make `ensure_history` fail
    pub fn fail_bootstrap(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_bootstrap = true;
        }
    }

    /// Make `applied_records` fail
    pub fn fail_history_read(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_history_read = true;
        }
    }

    /// Make any batch containing `needle` fail
    pub fn fail_statements_containing(&self, needle: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_statements.push(needle.into());
        }
    }

    /// Make `record_applied` fail for `identifier`
    pub fn fail_record_for(&self, identifier: MigrationId) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_records.insert(identifier);
        }
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_bootstrap = false;
            state.fail_history_read = false;
            state.fail_statements.clear();
            state.fail_records.clear();
        }
    }
}

fn require_bootstrapped(state: &MemoryState) -> DbResult<()> {
    if state.bootstrapped {
        Ok(())
    } else {
        Err(DbError::ExecutionError(
            "history structure does not exist".to_string(),
        ))
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_history(&self) -> DbResult<()> {
        let mut state = self.state()?;
        if state.fail_bootstrap {
            return Err(DbError::InjectedFailure("ensure_history".to_string()));
        }
        state.bootstrapped = true;
        Ok(())
    }

    async fn applied_records(&self) -> DbResult<Vec<ExecutionRecord>> {
        let state = self.state()?;
        if state.fail_history_read {
            return Err(DbError::InjectedFailure("applied_records".to_string()));
        }
        require_bootstrapped(&state)?;
        Ok(state.data.records.values().cloned().collect())
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let mut state = self.state()?;
        if let Some(needle) = state.fail_statements.iter().find(|n| sql.contains(n.as_str())) {
            return Err(DbError::InjectedFailure(format!(
                "statement matching '{needle}'"
            )));
        }
        state.data.statements.push(sql.to_string());
        Ok(())
    }

    async fn record_applied(&self, record: &ExecutionRecord) -> DbResult<()> {
        let mut state = self.state()?;
        require_bootstrapped(&state)?;
        if state.fail_records.contains(&record.identifier) {
            return Err(DbError::InjectedFailure(format!(
                "record_applied {}",
                record.identifier
            )));
        }
        if state.data.records.contains_key(&record.identifier) {
            return Err(DbError::DuplicateRecord(record.identifier.to_string()));
        }
        state
            .data
            .records
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn try_acquire_lock(&self, owner: &str) -> DbResult<bool> {
        let mut state = self.state()?;
        match &state.lock {
            None => {
                state.lock = Some(LockInfo {
                    owner: owner.to_string(),
                    acquired_at: Utc::now(),
                });
                Ok(true)
            }
            Some(held) => Ok(held.owner == owner),
        }
    }

    async fn release_lock(&self, owner: &str) -> DbResult<()> {
        let mut state = self.state()?;
        if state.lock.as_ref().is_some_and(|l| l.owner == owner) {
            state.lock = None;
        }
        Ok(())
    }

    async fn lock_info(&self) -> DbResult<Option<LockInfo>> {
        Ok(self.state()?.lock.clone())
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    async fn begin(&self) -> DbResult<()> {
        if !self.transactional {
            return Err(self.not_implemented("begin"));
        }
        let mut state = self.state()?;
        if state.open_transaction.is_some() {
            return Err(DbError::TransactionError(
                "transaction already open".to_string(),
            ));
        }
        state.open_transaction = Some(state.data.clone());
        Ok(())
    }

    async fn commit(&self) -> DbResult<()> {
        if !self.transactional {
            return Err(self.not_implemented("commit"));
        }
        let mut state = self.state()?;
        state
            .open_transaction
            .take()
            .map(|_| ())
            .ok_or_else(|| DbError::TransactionError("no open transaction".to_string()))
    }

    async fn rollback(&self) -> DbResult<()> {
        if !self.transactional {
            return Err(self.not_implemented("rollback"));
        }
        let mut state = self.state()?;
        let snapshot = state
            .open_transaction
            .take()
            .ok_or_else(|| DbError::TransactionError("no open transaction".to_string()))?;
        state.data = snapshot;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
