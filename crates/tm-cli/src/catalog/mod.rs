//! Migrations compiled into the `tm` binary.
//!
//! Each migration is a numbered `.sql` file embedded via `include_str!`.
//! Add new files with a higher number; never edit or renumber one that has
//! shipped.

use tm_migrate::{MigrateResult, MigrationDefinition, MigrationRegistry};

/// `(identifier, description, sql)` for every shipped migration
static MIGRATIONS: &[(&str, &str, &str)] = &[
    (
        "001",
        "create table users",
        include_str!("v001_create_users.sql"),
    ),
    (
        "002",
        "add column users.name",
        include_str!("v002_add_users_name.sql"),
    ),
    (
        "003",
        "create index on users.email",
        include_str!("v003_index_users_email.sql"),
    ),
    (
        "004",
        "create table projects",
        include_str!("v004_create_projects.sql"),
    ),
];

/// Definitions of every shipped migration, in file order
pub(crate) fn definitions() -> MigrateResult<Vec<MigrationDefinition>> {
    definitions_from(MIGRATIONS)
}

/// Build the registry of shipped migrations
pub(crate) fn registry() -> MigrateResult<MigrationRegistry> {
    Ok(MigrationRegistry::new(definitions()?)?)
}

fn definitions_from(entries: &[(&str, &str, &str)]) -> MigrateResult<Vec<MigrationDefinition>> {
    let mut definitions = Vec::with_capacity(entries.len());
    for (identifier, description, sql) in entries {
        definitions.push(MigrationDefinition::sql(identifier, *description, *sql)?);
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid_and_ordered() {
        let registry = registry().unwrap();
        let ids: Vec<String> = registry.identifiers().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["001", "002", "003", "004"]);
    }

    #[test]
    fn test_malformed_entry_is_a_registry_error() {
        let err = definitions_from(&[("001", "ok", "SELECT 1"), ("v2", "bad", "SELECT 2")])
            .unwrap_err();
        assert_eq!(err.code(), "M001");
        assert!(err.to_string().contains("v2"), "{err}");
    }

    #[test]
    fn test_catalog_bodies_not_empty() {
        for (identifier, _, sql) in MIGRATIONS {
            assert!(!sql.trim().is_empty(), "migration {identifier} has no SQL");
        }
    }
}
