//! Ls command implementation

use anyhow::{Context, Result};
use tm_migrate::MigrationBody;

use crate::catalog;
use crate::commands::common::print_table;

/// Execute the ls command
pub async fn execute() -> Result<()> {
    let registry = catalog::registry().context("Shipped migration catalog is invalid")?;

    let rows: Vec<Vec<String>> = registry
        .list()
        .iter()
        .map(|definition| {
            let kind = match definition.body() {
                MigrationBody::Sql(_) => "sql",
                MigrationBody::Operation(_) => "operation",
            };
            vec![
                definition.identifier().to_string(),
                kind.to_string(),
                definition.checksum().chars().take(12).collect(),
                definition.description().to_string(),
            ]
        })
        .collect();

    print_table(&["ID", "KIND", "CHECKSUM", "DESCRIPTION"], &rows);
    println!("\n{} migration(s)", registry.len());
    Ok(())
}
