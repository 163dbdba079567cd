use super::*;
use crate::definition::SchemaOperation;
use async_trait::async_trait;
use tm_core::compute_checksum;
use tm_db::{DbResult, MemoryStore};

const USERS: &[(&str, &str, &str)] = &[
    ("001", "create table users", "CREATE TABLE users (id INTEGER, email VARCHAR)"),
    ("002", "add column users.name", "ALTER TABLE users ADD COLUMN name VARCHAR"),
    ("003", "create index on users.email", "CREATE INDEX idx_users_email ON users(email)"),
];

fn id(s: &str) -> MigrationId {
    MigrationId::parse(s).unwrap()
}

fn ids(list: &[MigrationId]) -> Vec<String> {
    list.iter().map(|i| i.to_string()).collect()
}

fn fast_options() -> RunnerOptions {
    RunnerOptions {
        lock_timeout: Duration::from_millis(200),
        lock_poll_interval: Duration::from_millis(10),
        stale_lock_after: None,
        dry_run: false,
    }
}

fn runner(store: &Arc<MemoryStore>, entries: &[(&str, &str, &str)]) -> MigrationRunner {
    let registry = MigrationRegistry::from_entries(entries).unwrap();
    MigrationRunner::new(store.clone(), registry, fast_options())
}

fn with_fourth() -> Vec<(&'static str, &'static str, &'static str)> {
    let mut entries = USERS.to_vec();
    entries.push(("004", "create table projects", "CREATE TABLE projects (id INTEGER)"));
    entries
}

#[tokio::test]
async fn test_users_scenario() {
    let store = Arc::new(MemoryStore::new());

    let first = runner(&store, USERS).run().await.unwrap();
    assert_eq!(ids(&first.executed), vec!["001", "002", "003"]);
    assert!(first.skipped.is_empty());

    let second = runner(&store, USERS).run().await.unwrap();
    assert!(second.executed.is_empty());
    assert_eq!(ids(&second.skipped), vec!["001", "002", "003"]);

    let third = runner(&store, &with_fourth()).run().await.unwrap();
    assert_eq!(ids(&third.executed), vec!["004"]);
    assert_eq!(ids(&third.skipped), vec!["001", "002", "003"]);
}

#[tokio::test]
async fn test_idempotent_on_same_runner() {
    let store = Arc::new(MemoryStore::new());
    let runner = runner(&store, USERS);

    runner.run().await.unwrap();
    let statements = store.executed_statements();

    let again = runner.run().await.unwrap();
    assert!(again.is_noop());
    assert_eq!(again.skipped.len(), 3);
    assert_eq!(store.executed_statements(), statements);
}

#[tokio::test]
async fn test_applies_in_ascending_order() {
    let store = Arc::new(MemoryStore::new());
    let entries = [("10", "ten", "SELECT 10"), ("2", "two", "SELECT 2"), ("1", "one", "SELECT 1")];

    let report = runner(&store, &entries).run().await.unwrap();

    assert_eq!(ids(&report.executed), vec!["1", "2", "10"]);
    assert_eq!(
        store.executed_statements(),
        vec!["SELECT 1", "SELECT 2", "SELECT 10"]
    );
}

#[tokio::test]
async fn test_resumes_from_partial_history() {
    let store = Arc::new(MemoryStore::new());
    for (identifier, description, sql) in &USERS[..2] {
        store
            .seed_record(ExecutionRecord::new(
                id(identifier),
                *description,
                compute_checksum(sql),
                1,
            ))
            .unwrap();
    }

    let report = runner(&store, &with_fourth()).run().await.unwrap();

    assert_eq!(ids(&report.executed), vec!["003", "004"]);
    assert_eq!(ids(&report.skipped), vec!["001", "002"]);
    assert_eq!(store.executed_statements().len(), 2);
}

#[tokio::test]
async fn test_stops_at_first_failure() {
    let store = Arc::new(MemoryStore::new());
    store.fail_statements_containing("ADD COLUMN");

    let err = runner(&store, &with_fourth()).run().await.unwrap_err();

    assert_eq!(err.code(), "M006");
    assert_eq!(err.failed_identifier().unwrap().as_str(), "002");
    let progress = err.progress().unwrap();
    assert_eq!(ids(&progress.executed), vec!["001"]);
    assert!(progress.skipped.is_empty());

    assert_eq!(ids(&store.recorded_identifiers()), vec!["001"]);
    assert_eq!(store.executed_statements().len(), 1);
    assert!(store.lock_holder().is_none());
}

#[tokio::test]
async fn test_retry_after_failure_picks_up_where_it_stopped() {
    let store = Arc::new(MemoryStore::new());
    store.fail_statements_containing("CREATE INDEX");
    assert!(runner(&store, USERS).run().await.is_err());

    store.clear_failures();
    let report = runner(&store, USERS).run().await.unwrap();
    assert_eq!(ids(&report.executed), vec!["003"]);
    assert_eq!(ids(&report.skipped), vec!["001", "002"]);
}

#[tokio::test]
async fn test_apply_failure_rolls_back_transactional_store() {
    let store = Arc::new(MemoryStore::transactional());
    store.fail_statements_containing("CREATE INDEX");

    let err = runner(&store, USERS).run().await.unwrap_err();

    assert!(matches!(err, MigrateError::Apply { .. }));
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001", "002"]);
    assert_eq!(store.executed_statements().len(), 2);
}

#[tokio::test]
async fn test_history_write_failure_without_transactions() {
    let store = Arc::new(MemoryStore::new());
    store.fail_record_for(id("002"));

    let err = runner(&store, USERS).run().await.unwrap_err();

    match &err {
        MigrateError::HistoryWrite {
            identifier,
            rolled_back,
            progress,
            ..
        } => {
            assert_eq!(identifier.as_str(), "002");
            assert!(!rolled_back);
            assert_eq!(ids(&progress.executed), vec!["001"]);
        }
        other => panic!("expected HistoryWrite, got {other}"),
    }
    assert!(err.requires_intervention());
    // The body ran but nothing says so
    assert_eq!(store.executed_statements().len(), 2);
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001"]);
}

#[tokio::test]
async fn test_history_write_failure_with_transactions() {
    let store = Arc::new(MemoryStore::transactional());
    store.fail_record_for(id("002"));

    let err = runner(&store, USERS).run().await.unwrap_err();

    assert!(matches!(
        err,
        MigrateError::HistoryWrite {
            rolled_back: true,
            ..
        }
    ));
    assert!(!err.requires_intervention());
    assert_eq!(store.executed_statements().len(), 1);
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001"]);
}

#[tokio::test]
async fn test_bootstrap_failure_attempts_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.fail_bootstrap();

    let err = runner(&store, USERS).run().await.unwrap_err();

    assert_eq!(err.code(), "M002");
    assert!(err.progress().is_none());
    assert!(store.executed_statements().is_empty());
    assert!(store.lock_holder().is_none());
}

#[tokio::test]
async fn test_history_read_failure_releases_lock() {
    let store = Arc::new(MemoryStore::new());
    store.fail_history_read();

    let err = runner(&store, USERS).run().await.unwrap_err();

    assert!(matches!(err, MigrateError::HistoryRead(_)));
    assert!(store.executed_statements().is_empty());
    assert!(store.lock_holder().is_none());
}

#[tokio::test]
async fn test_lock_timeout_when_held_elsewhere() {
    let store = Arc::new(MemoryStore::new());
    assert!(store.try_acquire_lock("someone-else").await.unwrap());

    let err = runner(&store, USERS).run().await.unwrap_err();

    match err {
        MigrateError::LockTimeout { waited_ms } => assert!(waited_ms >= 200),
        other => panic!("expected LockTimeout, got {other}"),
    }
    assert!(store.executed_statements().is_empty());
    assert_eq!(store.lock_holder().as_deref(), Some("someone-else"));
}

#[tokio::test]
async fn test_waits_for_lock_release() {
    let store = Arc::new(MemoryStore::new());
    assert!(store.try_acquire_lock("someone-else").await.unwrap());

    let releaser = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.release_lock("someone-else").await.unwrap();
        })
    };

    let report = runner(&store, USERS).run().await.unwrap();
    releaser.await.unwrap();
    assert_eq!(report.executed.len(), 3);
}

#[tokio::test]
async fn test_concurrent_runs_on_one_runner_serialize() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(runner(&store, USERS));

    let (a, b) = tokio::join!(runner.run(), runner.run());
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut executed = [a.executed.len(), b.executed.len()];
    executed.sort();
    assert_eq!(executed, [0, 3]);
    assert_eq!(store.executed_statements().len(), 3);
}

#[tokio::test]
async fn test_dry_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    runner(&store, &USERS[..1]).run().await.unwrap();

    let registry = MigrationRegistry::from_entries(USERS).unwrap();
    let options = RunnerOptions {
        dry_run: true,
        ..fast_options()
    };
    let report = MigrationRunner::new(store.clone(), registry, options)
        .run()
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(ids(&report.executed), vec!["002", "003"]);
    assert_eq!(ids(&report.skipped), vec!["001"]);
    assert_eq!(store.executed_statements().len(), 1);
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001"]);
}

#[tokio::test]
async fn test_status_reports_pending_drift_and_unknown() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_record(ExecutionRecord::new(id("001"), "create table users", "stale", 3))
        .unwrap();
    store
        .seed_record(ExecutionRecord::new(id("002"), "add column users.name", compute_checksum(USERS[1].2), 1))
        .unwrap();
    store
        .seed_record(ExecutionRecord::new(id("099"), "from a newer build", "x", 1))
        .unwrap();

    let status = runner(&store, USERS).status().await.unwrap();

    assert_eq!(status.entries.len(), 3);
    assert_eq!(status.applied_count(), 2);
    assert_eq!(status.pending(), vec![&id("003")]);
    assert_eq!(status.drifted(), vec![&id("001")]);
    assert!(!status.is_up_to_date());
    assert_eq!(ids(&status.unknown.iter().map(|r| r.identifier.clone()).collect::<Vec<_>>()), vec!["099"]);
    assert!(store.executed_statements().is_empty());
}

#[tokio::test]
async fn test_unknown_history_does_not_block_run() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_record(ExecutionRecord::new(id("500"), "removed", "x", 1))
        .unwrap();

    let report = runner(&store, USERS).run().await.unwrap();
    assert_eq!(report.executed.len(), 3);
}

#[test]
fn test_report_serializes_executed_and_skipped() {
    let report = RunReport {
        executed: vec![id("003")],
        skipped: vec![id("001"), id("002")],
        dry_run: false,
    };
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"executed": ["003"], "skipped": ["001", "002"]})
    );
}

#[test]
fn test_options_from_lock_config() {
    let lock = LockConfig {
        timeout_ms: 1500,
        poll_interval_ms: 50,
        stale_after_ms: Some(600_000),
    };
    let options = RunnerOptions::from(&lock);
    assert_eq!(options.lock_timeout, Duration::from_millis(1500));
    assert_eq!(options.lock_poll_interval, Duration::from_millis(50));
    assert_eq!(options.stale_lock_after, Some(Duration::from_secs(600)));
    assert!(!options.dry_run);
    assert_eq!(RunnerOptions::default().stale_lock_after, None);
}

/// Executes a statement, then keeps the unit open for `delay`
struct SlowBackfill {
    delay: Duration,
}

#[async_trait]
impl SchemaOperation for SlowBackfill {
    async fn apply(&self, store: &dyn MigrationStore) -> DbResult<()> {
        store.execute_batch("UPDATE users SET name = email").await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

fn with_slow_third(delay: Duration) -> Vec<MigrationDefinition> {
    vec![
        MigrationDefinition::sql(USERS[0].0, USERS[0].1, USERS[0].2).unwrap(),
        MigrationDefinition::sql(USERS[1].0, USERS[1].1, USERS[1].2).unwrap(),
        MigrationDefinition::operation("003", "backfill users.name", SlowBackfill { delay }).unwrap(),
    ]
}

fn slow_runner(store: &Arc<MemoryStore>, options: RunnerOptions) -> MigrationRunner {
    MigrationRunner::from_definitions(
        store.clone(),
        with_slow_third(Duration::from_millis(200)),
        options,
    )
    .unwrap()
}

#[tokio::test]
async fn test_cancelled_run_rolls_back_and_releases_lock() {
    let store = Arc::new(MemoryStore::transactional());
    let runner = slow_runner(&store, fast_options());

    let cancelled = tokio::time::timeout(Duration::from_millis(50), runner.run()).await;
    assert!(cancelled.is_err());

    // Cleanup of the dropped run finishes in the background
    for _ in 0..100 {
        if store.lock_holder().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(store.lock_holder().is_none());
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001", "002"]);
    assert_eq!(store.executed_statements(), vec![USERS[0].2, USERS[1].2]);

    // No transaction was left open
    store.begin().await.unwrap();
    store.rollback().await.unwrap();
}

#[tokio::test]
async fn test_same_runner_retries_unfinished_migration_after_cancel() {
    let store = Arc::new(MemoryStore::transactional());
    let runner = slow_runner(&store, fast_options());

    assert!(tokio::time::timeout(Duration::from_millis(50), runner.run())
        .await
        .is_err());

    let report = runner.run().await.unwrap();
    assert_eq!(ids(&report.executed), vec!["003"]);
    assert_eq!(ids(&report.skipped), vec!["001", "002"]);
    assert_eq!(
        store.executed_statements(),
        vec![USERS[0].2, USERS[1].2, "UPDATE users SET name = email"]
    );
    assert!(store.lock_holder().is_none());
}

#[tokio::test]
async fn test_fresh_runner_retries_unfinished_migration_after_cancel() {
    let store = Arc::new(MemoryStore::transactional());

    let abandoned = slow_runner(&store, fast_options());
    assert!(tokio::time::timeout(Duration::from_millis(50), abandoned.run())
        .await
        .is_err());

    let report = slow_runner(&store, fast_options()).run().await.unwrap();
    assert_eq!(ids(&report.executed), vec!["003"]);
    assert_eq!(ids(&report.skipped), vec!["001", "002"]);
    assert_eq!(ids(&store.recorded_identifiers()), vec!["001", "002", "003"]);
    assert_eq!(store.executed_statements().len(), 3);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_lock_leaves_holder_alone() {
    let store = Arc::new(MemoryStore::new());
    assert!(store.try_acquire_lock("someone-else").await.unwrap());

    let waiting = runner(&store, USERS);
    assert!(tokio::time::timeout(Duration::from_millis(30), waiting.run())
        .await
        .is_err());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(store.lock_holder().as_deref(), Some("someone-else"));
    assert!(store.executed_statements().is_empty());
}

fn stale_after(threshold: Duration) -> RunnerOptions {
    RunnerOptions {
        stale_lock_after: Some(threshold),
        ..fast_options()
    }
}

#[tokio::test]
async fn test_stale_lock_is_broken() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_lock("tm:1:crashed", chrono::Utc::now() - chrono::Duration::hours(1))
        .unwrap();

    let registry = MigrationRegistry::from_entries(USERS).unwrap();
    let report = MigrationRunner::new(store.clone(), registry, stale_after(Duration::from_secs(60)))
        .run()
        .await
        .unwrap();

    assert_eq!(ids(&report.executed), vec!["001", "002", "003"]);
    assert!(store.lock_holder().is_none());
}

#[tokio::test]
async fn test_recent_lock_is_not_broken() {
    let store = Arc::new(MemoryStore::new());
    store.seed_lock("tm:1:busy", chrono::Utc::now()).unwrap();

    let registry = MigrationRegistry::from_entries(USERS).unwrap();
    let err = MigrationRunner::new(store.clone(), registry, stale_after(Duration::from_secs(60)))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.code(), "M004");
    assert_eq!(store.lock_holder().as_deref(), Some("tm:1:busy"));
    assert!(store.executed_statements().is_empty());
}

#[tokio::test]
async fn test_orphaned_lock_blocks_without_stale_threshold() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_lock("tm:1:crashed", chrono::Utc::now() - chrono::Duration::days(1))
        .unwrap();

    let err = runner(&store, USERS).run().await.unwrap_err();

    assert!(matches!(err, MigrateError::LockTimeout { .. }));
    assert_eq!(store.lock_holder().as_deref(), Some("tm:1:crashed"));
}

#[test]
fn test_from_definitions_rejects_duplicates() {
    let store = Arc::new(MemoryStore::new());
    let definitions = vec![
        MigrationDefinition::sql("001", "first", "SELECT 1").unwrap(),
        MigrationDefinition::sql("1", "same number", "SELECT 2").unwrap(),
    ];

    match MigrationRunner::from_definitions(store.clone(), definitions, fast_options()) {
        Err(err) => {
            assert_eq!(err.code(), "M001");
            assert!(matches!(err, MigrateError::Registry(_)));
        }
        Ok(_) => panic!("expected a registry error"),
    }
    assert!(store.executed_statements().is_empty());
}
