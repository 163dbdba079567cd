//! Shared utilities for CLI commands

use serde::Serialize;
use std::fmt;
use tm_core::MigrationId;
use tm_migrate::MigrateError;

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that destructors run before the process ends.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; nothing to show the user.
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Process exit code for a failed migration run.
///
/// 1 for ordinary failures, 2 when another run held the lock, and 3 when
/// the store was left changed without a history record.
pub(crate) fn exit_code_for(err: &MigrateError) -> i32 {
    if err.requires_intervention() {
        3
    } else if matches!(err, MigrateError::LockTimeout { .. }) {
        2
    } else {
        1
    }
}

/// JSON description of a failed run, shared by `migrate --json` and the trigger
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) code: &'static str,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) identifier: Option<MigrationId>,
    pub(crate) executed: Vec<MigrationId>,
    pub(crate) skipped: Vec<MigrationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) rolled_back: Option<bool>,
}

impl From<&MigrateError> for ErrorBody {
    fn from(err: &MigrateError) -> Self {
        let progress = err.progress().cloned().unwrap_or_default();
        let rolled_back = match err {
            MigrateError::HistoryWrite { rolled_back, .. } => Some(*rolled_back),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            identifier: err.failed_identifier().cloned(),
            executed: progress.executed,
            skipped: progress.skipped,
            rolled_back,
        }
    }
}

/// Wraps an [`ErrorBody`] as `{"error": {...}}`
#[derive(Debug, Serialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ErrorBody,
}

impl From<&MigrateError> for ErrorEnvelope {
    fn from(err: &MigrateError) -> Self {
        Self { error: err.into() }
    }
}

/// Print rows as an aligned table under a header row
pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.len());
            }
        }
    }

    println!("{}", render_row(headers, &widths));
    println!(
        "{}",
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  ")
    );
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        println!("{}", render_row(&cells, &widths));
    }
}

fn render_row(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}
