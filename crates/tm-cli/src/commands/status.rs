//! Status command implementation

use anyhow::{Context, Result};
use tm_migrate::{EntryState, MigrationStatus};

use crate::cli::{GlobalArgs, StatusArgs};
use crate::commands::common::print_table;
use crate::context::RuntimeContext;

/// Execute the status command
pub async fn execute(args: &StatusArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let status = ctx
        .runner(false)?
        .status()
        .await
        .context("Failed to read migration status")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(())
}

fn print_status(status: &MigrationStatus) {
    let rows: Vec<Vec<String>> = status
        .entries
        .iter()
        .map(|entry| {
            let (state, applied_at) = match &entry.state {
                EntryState::Applied {
                    applied_at,
                    checksum_matches,
                    ..
                } => {
                    let state = if *checksum_matches {
                        "applied"
                    } else {
                        "applied (changed)"
                    };
                    (state, applied_at.format("%Y-%m-%d %H:%M:%S").to_string())
                }
                EntryState::Pending => ("pending", String::new()),
            };
            vec![
                entry.identifier.to_string(),
                state.to_string(),
                applied_at,
                entry.description.clone(),
            ]
        })
        .collect();

    print_table(&["ID", "STATE", "APPLIED AT", "DESCRIPTION"], &rows);

    for record in &status.unknown {
        println!(
            "warning: {} ({}) is recorded but not defined in this build",
            record.identifier, record.description
        );
    }

    println!(
        "\n{} applied, {} pending",
        status.applied_count(),
        status.pending().len()
    );
}
