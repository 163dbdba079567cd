//! Migration definitions compiled into a registry.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tm_core::{compute_checksum, CoreResult, MigrationId};
use tm_db::{DbResult, MigrationStore};

/// A structured schema change that drives the store directly.
///
/// Used when a change cannot be expressed as a single SQL batch, for
/// example when it inspects the store before deciding what to issue.
#[async_trait]
pub trait SchemaOperation: Send + Sync {
    /// Perform the mutation against `store`
    async fn apply(&self, store: &dyn MigrationStore) -> DbResult<()>;
}

/// How a migration mutates the schema
#[derive(Clone)]
pub enum MigrationBody {
    /// One or more statements executed as a single batch
    Sql(String),
    /// A structured operation
    Operation(Arc<dyn SchemaOperation>),
}

impl fmt::Debug for MigrationBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationBody::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            MigrationBody::Operation(_) => f.write_str("Operation(..)"),
        }
    }
}

/// One identified, immutable unit of schema change.
///
/// The body is not assumed idempotent; the runner guarantees it is applied
/// at most once per store.
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    identifier: MigrationId,
    description: String,
    body: MigrationBody,
    checksum: String,
}

impl MigrationDefinition {
    /// Define a migration whose body is a SQL batch.
    ///
    /// Fails with `MalformedIdentifier` if `identifier` is not a digit run.
    pub fn sql(
        identifier: &str,
        description: impl Into<String>,
        sql: impl Into<String>,
    ) -> CoreResult<Self> {
        let sql = sql.into();
        Ok(Self {
            identifier: MigrationId::parse(identifier)?,
            description: description.into(),
            checksum: compute_checksum(&sql),
            body: MigrationBody::Sql(sql),
        })
    }

    /// Define a migration whose body is a structured operation.
    ///
    /// The checksum is derived from the description until
    /// [`with_fingerprint`](Self::with_fingerprint) supplies something better.
    pub fn operation(
        identifier: &str,
        description: impl Into<String>,
        operation: impl SchemaOperation + 'static,
    ) -> CoreResult<Self> {
        let description = description.into();
        Ok(Self {
            identifier: MigrationId::parse(identifier)?,
            checksum: compute_checksum(&description),
            description,
            body: MigrationBody::Operation(Arc::new(operation)),
        })
    }

    /// Replace the checksum source for an operation body.
    ///
    /// SQL bodies are always fingerprinted by their text, so this is a no-op
    /// for them.
    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        if matches!(self.body, MigrationBody::Operation(_)) {
            self.checksum = compute_checksum(fingerprint);
        }
        self
    }

    pub fn identifier(&self) -> &MigrationId {
        &self.identifier
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn body(&self) -> &MigrationBody {
        &self.body
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Run the body against `store`
    pub async fn apply(&self, store: &dyn MigrationStore) -> DbResult<()> {
        match &self.body {
            MigrationBody::Sql(sql) => store.execute_batch(sql).await,
            MigrationBody::Operation(op) => op.apply(store).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tm_db::MemoryStore;

    struct CreateAuditTables;

    #[async_trait]
    impl SchemaOperation for CreateAuditTables {
        async fn apply(&self, store: &dyn MigrationStore) -> DbResult<()> {
            store.execute_batch("CREATE TABLE audit_log (id INTEGER)").await?;
            store.execute_batch("CREATE TABLE audit_archive (id INTEGER)").await
        }
    }

    #[test]
    fn test_sql_checksum_tracks_body() {
        let a = MigrationDefinition::sql("001", "users", "CREATE TABLE users (id INT)").unwrap();
        let b = MigrationDefinition::sql("001", "renamed", "CREATE TABLE users (id INT)").unwrap();
        let c = MigrationDefinition::sql("001", "users", "CREATE TABLE users (id BIGINT)").unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_malformed_identifier_rejected() {
        let err = MigrationDefinition::sql("v1", "bad", "SELECT 1").unwrap_err();
        assert!(err.is_registry_integrity());
    }

    #[test]
    fn test_fingerprint_only_affects_operations() {
        let sql = MigrationDefinition::sql("001", "d", "SELECT 1").unwrap();
        let before = sql.checksum().to_string();
        assert_eq!(sql.with_fingerprint("x").checksum(), before);

        let op = MigrationDefinition::operation("002", "audit", CreateAuditTables).unwrap();
        let default_sum = op.checksum().to_string();
        let op = op.with_fingerprint("audit-v2");
        assert_ne!(op.checksum(), default_sum);
        assert_eq!(op.checksum(), compute_checksum("audit-v2"));
    }

    #[tokio::test]
    async fn test_apply_dispatches_on_body() {
        let store = MemoryStore::new();
        MigrationDefinition::sql("001", "users", "CREATE TABLE users (id INT)")
            .unwrap()
            .apply(&store)
            .await
            .unwrap();
        MigrationDefinition::operation("002", "audit", CreateAuditTables)
            .unwrap()
            .apply(&store)
            .await
            .unwrap();

        assert_eq!(
            store.executed_statements(),
            vec![
                "CREATE TABLE users (id INT)",
                "CREATE TABLE audit_log (id INTEGER)",
                "CREATE TABLE audit_archive (id INTEGER)",
            ]
        );
    }

    #[test]
    fn test_debug_hides_operation() {
        let op = MigrationDefinition::operation("002", "audit", CreateAuditTables).unwrap();
        assert!(format!("{op:?}").contains("Operation(..)"));
    }
}
