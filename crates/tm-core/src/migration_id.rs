//! Strongly-typed migration identifier.
//!
//! An identifier is a run of ASCII digits such as `001` or `20240115093000`.
//! Identity and ordering use the numeric value, so `003` and `3` name the same
//! migration; the original text is kept for display and persistence.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Longest digit run that always fits in a signed 64-bit store column.
const MAX_DIGITS: usize = 18;

/// Totally ordered migration identifier.
#[derive(Debug, Clone)]
pub struct MigrationId {
    version: u64,
    raw: String,
}

impl MigrationId {
    /// Parse an identifier, rejecting anything that is not a plain digit run.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let malformed = |reason: &str| CoreError::MalformedIdentifier {
            identifier: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(malformed("identifier must not be empty"));
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("identifier must contain only ASCII digits"));
        }
        if raw.len() > MAX_DIGITS {
            return Err(malformed(&format!(
                "identifier must be at most {MAX_DIGITS} digits"
            )));
        }

        let version = raw
            .parse::<u64>()
            .map_err(|e| malformed(&e.to_string()))?;

        Ok(Self {
            version,
            raw: raw.to_string(),
        })
    }

    /// Numeric value used for ordering and identity.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Original textual form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for MigrationId {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for MigrationId {}

impl Hash for MigrationId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl PartialOrd for MigrationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MigrationId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for MigrationId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for MigrationId {
    type Error = CoreError;

    fn try_from(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl Serialize for MigrationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for MigrationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        MigrationId::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "migration_id_test.rs"]
mod tests;
