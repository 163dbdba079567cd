//! tm-db - Store abstraction layer for Tidemark
//!
//! This crate provides the `MigrationStore` trait the runner drives and
//! its implementations for DuckDB and for process memory.

pub mod duckdb;
pub mod error;
pub mod memory;
pub mod traits;

pub use self::duckdb::{DuckDbStore, DEFAULT_HISTORY_SCHEMA};
pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use traits::{LockInfo, MigrationStore};
