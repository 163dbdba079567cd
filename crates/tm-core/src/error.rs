//! Error types for tm-core

use thiserror::Error;

/// Core error type for Tidemark
#[derive(Error, Debug)]
pub enum CoreError {
    /// T001: Two migration definitions share an identifier
    #[error("[T001] Duplicate migration identifier: {identifier}")]
    DuplicateIdentifier { identifier: String },

    /// T002: Identifier cannot be totally ordered against the others
    #[error("[T002] Malformed migration identifier '{identifier}': {reason}")]
    MalformedIdentifier { identifier: String, reason: String },

    /// T003: Configuration file not found
    #[error("[T003] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// T004: Failed to parse configuration file
    #[error("[T004] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// T005: Invalid configuration value
    #[error("[T005] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// T006: IO error with file path context
    #[error("[T006] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },
}

impl CoreError {
    /// Whether this error means the registry is ambiguous and must not run.
    pub fn is_registry_integrity(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateIdentifier { .. } | CoreError::MalformedIdentifier { .. }
        )
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::ConfigParseError {
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
