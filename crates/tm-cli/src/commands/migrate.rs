//! Migrate command implementation

use anyhow::Result;
use tm_migrate::{MigrateError, RunReport};

use crate::cli::{GlobalArgs, MigrateArgs};
use crate::commands::common::{exit_code_for, ErrorEnvelope, ExitCode};
use crate::context::RuntimeContext;

/// Execute the migrate command
pub async fn execute(args: &MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let ctx = RuntimeContext::new(global)?;
    let runner = ctx.runner(args.dry_run)?;

    match runner.run().await {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&ErrorEnvelope::from(&err))?);
            } else {
                print_failure(&err);
            }
            Err(ExitCode(exit_code_for(&err)).into())
        }
    }
}

fn print_report(report: &RunReport) {
    let verb = if report.dry_run { "Would apply" } else { "Applied" };
    for identifier in &report.executed {
        println!("  {verb} {identifier}");
    }

    if report.is_noop() {
        println!("Already up to date ({} applied)", report.skipped.len());
    } else if report.dry_run {
        println!(
            "\n{} pending, {} already applied (dry run, nothing changed)",
            report.executed.len(),
            report.skipped.len()
        );
    } else {
        println!(
            "\n{} applied, {} already applied",
            report.executed.len(),
            report.skipped.len()
        );
    }
}

fn print_failure(err: &MigrateError) {
    if let Some(progress) = err.progress() {
        for identifier in &progress.executed {
            println!("  Applied {identifier}");
        }
    }
    eprintln!("Error: {err}");

    if err.requires_intervention() {
        eprintln!(
            "The store was changed but the migration was not recorded. \
             Reconcile it by hand before running again."
        );
    }
}
