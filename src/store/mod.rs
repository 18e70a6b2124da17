//! Content and job stores
//!
//! Read/write contracts the pipeline needs from its collaborators: a term repository,
//! a content unit store keyed by (term_id, column_id), and a job store that keeps job
//! snapshots and checkpoints so a restarted process can rehydrate them.

pub mod jobs;
pub mod memory;
pub mod persistence;

pub use jobs::{InMemoryJobStore, JobStore, SledJobStore};
pub use memory::InMemoryContentStore;
pub use persistence::SledContentStore;

use crate::content::{ContentUnit, Term};
use crate::error::StorageError;

/// Term selection for a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermFilter {
    /// Restrict to these term ids
    pub ids: Option<Vec<String>>,
    /// Case-insensitive prefix on the term name
    pub name_prefix: Option<String>,
    pub limit: Option<usize>,
    /// Bottom-up order
    pub reverse: bool,
}

impl TermFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, term: &Term) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &term.id) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !term
                .name
                .to_lowercase()
                .starts_with(&prefix.to_lowercase())
            {
                return false;
            }
        }
        true
    }

    /// Apply the filter to terms already sorted by id.
    pub fn apply(&self, sorted_terms: impl DoubleEndedIterator<Item = Term>) -> Vec<Term> {
        let limit = self.limit.unwrap_or(usize::MAX);
        if self.reverse {
            sorted_terms
                .rev()
                .filter(|t| self.matches(t))
                .take(limit)
                .collect()
        } else {
            sorted_terms.filter(|t| self.matches(t)).take(limit).collect()
        }
    }
}

/// Term repository interface
pub trait TermRepository: Send + Sync {
    fn list_terms(&self, filter: &TermFilter) -> Result<Vec<Term>, StorageError>;
    fn has_existing_content(&self, term_id: &str, column_id: &str) -> Result<bool, StorageError>;
}

/// Content unit store interface
///
/// Implementations must refuse a write that would move a stored unit backwards in
/// its processing phase, whatever prompt version the incoming unit carries.
pub trait ContentUnitStore: Send + Sync {
    fn write_unit(&self, unit: &ContentUnit) -> Result<(), StorageError>;
    fn read_unit(&self, term_id: &str, column_id: &str)
        -> Result<Option<ContentUnit>, StorageError>;
    fn list_units(&self, column_id: &str) -> Result<Vec<ContentUnit>, StorageError>;
}

/// Reject phase regressions and prompt-version downgrades.
pub(crate) fn check_forward_write(
    existing: Option<&ContentUnit>,
    incoming: &ContentUnit,
) -> Result<(), StorageError> {
    let Some(current) = existing else {
        return Ok(());
    };
    if current.processing_phase > incoming.processing_phase {
        return Err(StorageError::Conflict(format!(
            "unit ({}, {}) is already {}; refusing to write {}",
            incoming.term_id,
            incoming.column_id,
            current.processing_phase,
            incoming.processing_phase
        )));
    }
    if current.prompt_version > incoming.prompt_version {
        return Err(StorageError::Conflict(format!(
            "unit ({}, {}) is at prompt version {}; refusing version {}",
            incoming.term_id, incoming.column_id, current.prompt_version, incoming.prompt_version
        )));
    }
    Ok(())
}
