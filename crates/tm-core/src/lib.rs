//! tm-core - Core library for Tidemark
//!
//! This crate provides the types shared by every Tidemark component:
//! migration identifiers, persisted execution records, body checksums,
//! and `tidemark.yml` configuration parsing.

pub mod checksum;
pub mod config;
pub mod error;
pub mod migration_id;
pub mod record;

pub use checksum::compute_checksum;
pub use config::{Config, DbType, LockConfig};
pub use error::{CoreError, CoreResult};
pub use migration_id::MigrationId;
pub use record::ExecutionRecord;
