//! Ordered, immutable catalog of migration definitions.

use crate::definition::MigrationDefinition;
use tm_core::{CoreError, CoreResult, MigrationId};

/// Every migration known to the current build, ascending by identifier.
///
/// Validated once at construction; there is no way to add or remove
/// definitions afterwards.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    definitions: Vec<MigrationDefinition>,
}

impl MigrationRegistry {
    /// Build a registry, sorting by identifier.
    ///
    /// Fails with `DuplicateIdentifier` when two definitions share an
    /// identifier, so an ambiguous sequence can never reach a runner.
    pub fn new(mut definitions: Vec<MigrationDefinition>) -> CoreResult<Self> {
        definitions.sort_by(|a, b| a.identifier().cmp(b.identifier()));

        if let Some(pair) = definitions
            .windows(2)
            .find(|pair| pair[0].identifier() == pair[1].identifier())
        {
            let (first, second) = (pair[0].identifier(), pair[1].identifier());
            let identifier = if first.as_str() == second.as_str() {
                first.to_string()
            } else {
                format!("{first} (also declared as {second})")
            };
            return Err(CoreError::DuplicateIdentifier { identifier });
        }

        Ok(Self { definitions })
    }

    /// Build a registry of SQL migrations from `(identifier, description, sql)` triples
    pub fn from_entries(entries: &[(&str, &str, &str)]) -> CoreResult<Self> {
        let definitions = entries
            .iter()
            .map(|(identifier, description, sql)| {
                MigrationDefinition::sql(identifier, *description, *sql)
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Self::new(definitions)
    }

    /// All definitions, ascending by identifier
    pub fn list(&self) -> &[MigrationDefinition] {
        &self.definitions
    }

    /// All identifiers, ascending
    pub fn identifiers(&self) -> Vec<MigrationId> {
        self.definitions
            .iter()
            .map(|d| d.identifier().clone())
            .collect()
    }

    /// Look up a definition by identifier
    pub fn get(&self, identifier: &MigrationId) -> Option<&MigrationDefinition> {
        self.definitions
            .binary_search_by(|d| d.identifier().cmp(identifier))
            .ok()
            .map(|idx| &self.definitions[idx])
    }

    /// Highest-identified definition
    pub fn latest(&self) -> Option<&MigrationDefinition> {
        self.definitions.last()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
