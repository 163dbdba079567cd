//! Applies pending migrations from a registry to a store.

use crate::definition::MigrationDefinition;
use crate::error::{MigrateError, MigrateResult};
use crate::registry::MigrationRegistry;
use crate::report::{EntryState, MigrationStatus, RunReport, StatusEntry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tm_core::{ExecutionRecord, LockConfig, MigrationId};
use tm_db::{DbError, MigrationStore};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Runner behaviour that is not part of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    /// Give up waiting for another run's advisory lock after this long
    pub lock_timeout: Duration,

    /// Delay between lock acquisition attempts
    pub lock_poll_interval: Duration,

    /// Break another holder's lock once it has been held this long
    pub stale_lock_after: Option<Duration>,

    /// Report what would run without applying anything
    pub dry_run: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for RunnerOptions {
    fn from(lock: &LockConfig) -> Self {
        Self {
            lock_timeout: Duration::from_millis(lock.timeout_ms),
            lock_poll_interval: Duration::from_millis(lock.poll_interval_ms),
            stale_lock_after: lock.stale_after_ms.map(Duration::from_millis),
            dry_run: false,
        }
    }
}

/// How a single migration unit failed
enum UnitFailure {
    Apply(DbError),
    HistoryWrite { source: DbError, rolled_back: bool },
}

impl UnitFailure {
    fn into_error(self, identifier: MigrationId, progress: RunReport) -> MigrateError {
        match self {
            UnitFailure::Apply(source) => MigrateError::Apply {
                identifier,
                source,
                progress,
            },
            UnitFailure::HistoryWrite {
                source,
                rolled_back,
            } => MigrateError::HistoryWrite {
                identifier,
                rolled_back,
                source,
                progress,
            },
        }
    }
}

/// Store-side state a run must undo if its future is dropped midway.
///
/// Owns the in-process run guard, so when cleanup has to be deferred the
/// next run on the same runner waits until it has finished.
struct RunCleanup {
    store: Arc<dyn MigrationStore>,
    owner: String,
    in_transaction: bool,
    holds_lock: bool,
    run_guard: Option<OwnedMutexGuard<()>>,
}

impl RunCleanup {
    fn new(store: Arc<dyn MigrationStore>, owner: &str, run_guard: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            owner: owner.to_string(),
            in_transaction: false,
            holds_lock: false,
            run_guard: Some(run_guard),
        }
    }
}

impl Drop for RunCleanup {
    fn drop(&mut self) {
        if !self.in_transaction && !self.holds_lock {
            return;
        }
        log::warn!(
            "Migration run {} was cancelled, rolling back and releasing its lock",
            self.owner
        );

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::error!(
                "No runtime left to clean up cancelled migration run {}",
                self.owner
            );
            return;
        };

        let store = self.store.clone();
        let owner = std::mem::take(&mut self.owner);
        let (in_transaction, holds_lock) = (self.in_transaction, self.holds_lock);
        let run_guard = self.run_guard.take();
        handle.spawn(async move {
            if in_transaction {
                if let Err(e) = store.rollback().await {
                    log::error!("Rollback of cancelled migration run {} failed: {}", owner, e);
                }
            }
            if holds_lock {
                if let Err(e) = store.release_lock(&owner).await {
                    log::error!("Failed to release migration lock {}: {}", owner, e);
                }
            }
            drop(run_guard);
        });
    }
}

/// Brings a store up to date with a registry.
///
/// Each pending migration is applied at most once and recorded in the
/// store's own history. Runs on one runner are serialized in-process; runs
/// from different processes are serialized by the store's advisory lock.
///
/// Dropping a `run()` future midway rolls back the unit in progress and
/// releases the lock, so a later run retries that migration.
pub struct MigrationRunner {
    store: Arc<dyn MigrationStore>,
    registry: MigrationRegistry,
    options: RunnerOptions,
    owner: String,
    run_guard: Arc<Mutex<()>>,
}

impl MigrationRunner {
    /// Create a runner over an injected store
    pub fn new(
        store: Arc<dyn MigrationStore>,
        registry: MigrationRegistry,
        options: RunnerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            options,
            owner: format!("tm:{}:{}", std::process::id(), uuid::Uuid::new_v4()),
            run_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Validate `definitions` into a registry and create a runner over it.
    ///
    /// Fails with [`MigrateError::Registry`] on a duplicate or malformed
    /// identifier; nothing is run against the store.
    pub fn from_definitions(
        store: Arc<dyn MigrationStore>,
        definitions: Vec<MigrationDefinition>,
        options: RunnerOptions,
    ) -> MigrateResult<Self> {
        let registry = MigrationRegistry::new(definitions)?;
        Ok(Self::new(store, registry, options))
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MigrationStore> {
        &self.store
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Advisory lock owner token used by this runner
    pub fn lock_owner(&self) -> &str {
        &self.owner
    }

    /// Apply every pending migration in ascending order.
    ///
    /// Stops at the first failure; migrations after it are not attempted and
    /// the error carries what had run so far. Calling again after success is
    /// a no-op that reports every migration as skipped.
    pub async fn run(&self) -> MigrateResult<RunReport> {
        let run_guard = self.run_guard.clone().lock_owned().await;
        let mut cleanup = RunCleanup::new(self.store.clone(), &self.owner, run_guard);
        let started = Instant::now();

        self.store
            .ensure_history()
            .await
            .map_err(MigrateError::Bootstrap)?;

        if self.options.dry_run {
            return self.plan().await;
        }

        self.acquire_lock().await?;
        cleanup.holds_lock = true;
        let result = self.apply_pending(&mut cleanup).await;

        if let Err(e) = self.store.release_lock(&self.owner).await {
            log::warn!("Failed to release migration lock {}: {}", self.owner, e);
        }
        cleanup.holds_lock = false;

        match &result {
            Ok(report) => log::info!(
                "Migration run finished: {} executed, {} skipped ({}ms)",
                report.executed.len(),
                report.skipped.len(),
                started.elapsed().as_millis()
            ),
            Err(e) => log::error!("Migration run failed: {}", e),
        }
        result
    }

    /// Reconcile the registry against history without applying anything
    pub async fn status(&self) -> MigrateResult<MigrationStatus> {
        self.store
            .ensure_history()
            .await
            .map_err(MigrateError::Bootstrap)?;
        let mut history = self.read_history().await?;

        let entries = self
            .registry
            .list()
            .iter()
            .map(|definition| {
                let state = match history.remove(definition.identifier()) {
                    Some(record) => EntryState::Applied {
                        applied_at: record.applied_at,
                        execution_ms: record.execution_ms,
                        checksum_matches: record.checksum == definition.checksum(),
                    },
                    None => EntryState::Pending,
                };
                StatusEntry {
                    identifier: definition.identifier().clone(),
                    description: definition.description().to_string(),
                    state,
                }
            })
            .collect();

        let mut unknown: Vec<ExecutionRecord> = history.into_values().collect();
        unknown.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        Ok(MigrationStatus { entries, unknown })
    }

    async fn plan(&self) -> MigrateResult<RunReport> {
        let history = self.read_history().await?;
        self.warn_on_divergence(&history);

        let (skipped, executed): (Vec<_>, Vec<_>) = self
            .registry
            .identifiers()
            .into_iter()
            .partition(|id| history.contains_key(id));

        log::info!("Dry run: {} migration(s) pending", executed.len());
        Ok(RunReport {
            executed,
            skipped,
            dry_run: true,
        })
    }

    async fn acquire_lock(&self) -> MigrateResult<()> {
        let started = Instant::now();
        let mut waiting_logged = false;

        loop {
            let acquired = self
                .store
                .try_acquire_lock(&self.owner)
                .await
                .map_err(MigrateError::Lock)?;
            if acquired {
                log::debug!("Acquired migration lock as {}", self.owner);
                return Ok(());
            }
            if let Some(stale_after) = self.options.stale_lock_after {
                if self.break_stale_lock(stale_after).await? {
                    continue;
                }
            }

            let waited = started.elapsed();
            if waited >= self.options.lock_timeout {
                return Err(MigrateError::LockTimeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            if !waiting_logged {
                log::info!("Another migration run holds the lock, waiting");
                waiting_logged = true;
            }

            let remaining = self.options.lock_timeout - waited;
            tokio::time::sleep(self.options.lock_poll_interval.min(remaining)).await;
        }
    }

    /// Release another holder's lock if it has been held past `stale_after`
    async fn break_stale_lock(&self, stale_after: Duration) -> MigrateResult<bool> {
        let Some(holder) = self.store.lock_info().await.map_err(MigrateError::Lock)? else {
            return Ok(false);
        };
        let held_for = chrono::Utc::now()
            .signed_duration_since(holder.acquired_at)
            .to_std()
            .unwrap_or_default();
        if held_for < stale_after {
            return Ok(false);
        }

        log::warn!(
            "Breaking migration lock held by {} since {} ({}s, stale after {}s)",
            holder.owner,
            holder.acquired_at,
            held_for.as_secs(),
            stale_after.as_secs()
        );
        self.store
            .release_lock(&holder.owner)
            .await
            .map_err(MigrateError::Lock)?;
        Ok(true)
    }

    async fn read_history(&self) -> MigrateResult<HashMap<MigrationId, ExecutionRecord>> {
        let records = self
            .store
            .applied_records()
            .await
            .map_err(MigrateError::HistoryRead)?;
        Ok(records
            .into_iter()
            .map(|record| (record.identifier.clone(), record))
            .collect())
    }

    fn warn_on_divergence(&self, history: &HashMap<MigrationId, ExecutionRecord>) {
        let mut recorded: Vec<&ExecutionRecord> = history.values().collect();
        recorded.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        for record in recorded {
            match self.registry.get(&record.identifier) {
                None => log::warn!(
                    "History contains migration {} ({}) which this build does not define",
                    record.identifier,
                    record.description
                ),
                Some(definition) if definition.checksum() != record.checksum => log::warn!(
                    "Migration {} has changed since it was applied (checksum {} != {})",
                    record.identifier,
                    definition.checksum(),
                    record.checksum
                ),
                Some(_) => {}
            }
        }
    }

    async fn apply_pending(&self, cleanup: &mut RunCleanup) -> MigrateResult<RunReport> {
        let history = self.read_history().await?;
        self.warn_on_divergence(&history);

        let mut report = RunReport::default();
        for definition in self.registry.list() {
            let identifier = definition.identifier();
            if history.contains_key(identifier) {
                log::debug!("Skipping migration {}: already applied", identifier);
                report.skipped.push(identifier.clone());
                continue;
            }

            log::info!(
                "Applying migration {}: {}",
                identifier,
                definition.description()
            );
            let unit = if self.store.supports_transactions() {
                self.apply_atomic(definition, cleanup).await
            } else {
                self.apply_direct(definition).await
            };

            match unit {
                Ok(execution_ms) => {
                    log::debug!("Migration {} applied in {}ms", identifier, execution_ms);
                    report.executed.push(identifier.clone());
                }
                Err(failure) => return Err(failure.into_error(identifier.clone(), report)),
            }
        }
        Ok(report)
    }

    /// Body and record in one store transaction
    async fn apply_atomic(
        &self,
        definition: &MigrationDefinition,
        cleanup: &mut RunCleanup,
    ) -> Result<u64, UnitFailure> {
        let store = self.store.as_ref();
        store.begin().await.map_err(UnitFailure::Apply)?;
        cleanup.in_transaction = true;

        let started = Instant::now();
        if let Err(source) = definition.apply(store).await {
            self.rollback_quietly(definition.identifier()).await;
            cleanup.in_transaction = false;
            return Err(UnitFailure::Apply(source));
        }
        let execution_ms = started.elapsed().as_millis() as u64;

        if let Err(source) = store.record_applied(&record_for(definition, execution_ms)).await {
            let rolled_back = self.rollback_quietly(definition.identifier()).await;
            cleanup.in_transaction = false;
            return Err(UnitFailure::HistoryWrite {
                source,
                rolled_back,
            });
        }

        let committed = store.commit().await;
        if committed.is_err() {
            self.rollback_quietly(definition.identifier()).await;
        }
        cleanup.in_transaction = false;
        committed.map_err(UnitFailure::Apply)?;
        Ok(execution_ms)
    }

    /// Body then record, for stores without transactions
    async fn apply_direct(&self, definition: &MigrationDefinition) -> Result<u64, UnitFailure> {
        let store = self.store.as_ref();
        let started = Instant::now();
        definition.apply(store).await.map_err(UnitFailure::Apply)?;
        let execution_ms = started.elapsed().as_millis() as u64;

        store
            .record_applied(&record_for(definition, execution_ms))
            .await
            .map_err(|source| {
                log::error!(
                    "Migration {} changed the store but was not recorded",
                    definition.identifier()
                );
                UnitFailure::HistoryWrite {
                    source,
                    rolled_back: false,
                }
            })?;
        Ok(execution_ms)
    }

    async fn rollback_quietly(&self, identifier: &MigrationId) -> bool {
        match self.store.rollback().await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Rollback of migration {} failed: {}", identifier, e);
                false
            }
        }
    }
}

fn record_for(definition: &MigrationDefinition, execution_ms: u64) -> ExecutionRecord {
    ExecutionRecord::new(
        definition.identifier().clone(),
        definition.description(),
        definition.checksum(),
        execution_ms,
    )
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
