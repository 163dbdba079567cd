//! tm-migrate - Migration registry and runner for Tidemark
//!
//! A [`MigrationRegistry`] holds every [`MigrationDefinition`] the build
//! knows about. A [`MigrationRunner`] brings a store up to date with it,
//! applying each pending migration exactly once and recording it in the
//! store's own history.

pub mod definition;
pub mod error;
pub mod registry;
pub mod report;
pub mod runner;

pub use definition::{MigrationBody, MigrationDefinition, SchemaOperation};
pub use error::{MigrateError, MigrateResult};
pub use registry::MigrationRegistry;
pub use report::{EntryState, MigrationStatus, RunReport, StatusEntry};
pub use runner::{MigrationRunner, RunnerOptions};
