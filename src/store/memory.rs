//! In-memory term repository and content unit store.

use crate::content::{ContentUnit, Term};
use crate::error::StorageError;
use crate::store::{check_forward_write, ContentUnitStore, TermFilter, TermRepository};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
pub struct InMemoryContentStore {
    terms: RwLock<BTreeMap<String, Term>>,
    units: RwLock<HashMap<(String, String), ContentUnit>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_terms(terms: impl IntoIterator<Item = Term>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.terms.write();
            for term in terms {
                guard.insert(term.id.clone(), term);
            }
        }
        store
    }

    pub fn put_term(&self, term: Term) {
        self.terms.write().insert(term.id.clone(), term);
    }

    pub fn unit_count(&self) -> usize {
        self.units.read().len()
    }
}

impl TermRepository for InMemoryContentStore {
    fn list_terms(&self, filter: &TermFilter) -> Result<Vec<Term>, StorageError> {
        let terms = self.terms.read();
        Ok(filter.apply(terms.values().cloned().collect::<Vec<_>>().into_iter()))
    }

    fn has_existing_content(&self, term_id: &str, column_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .units
            .read()
            .contains_key(&(term_id.to_string(), column_id.to_string())))
    }
}

impl ContentUnitStore for InMemoryContentStore {
    fn write_unit(&self, unit: &ContentUnit) -> Result<(), StorageError> {
        let mut units = self.units.write();
        let key = (unit.term_id.clone(), unit.column_id.clone());
        check_forward_write(units.get(&key), unit)?;
        units.insert(key, unit.clone());
        Ok(())
    }

    fn read_unit(
        &self,
        term_id: &str,
        column_id: &str,
    ) -> Result<Option<ContentUnit>, StorageError> {
        Ok(self
            .units
            .read()
            .get(&(term_id.to_string(), column_id.to_string()))
            .cloned())
    }

    fn list_units(&self, column_id: &str) -> Result<Vec<ContentUnit>, StorageError> {
        let mut units: Vec<ContentUnit> = self
            .units
            .read()
            .values()
            .filter(|u| u.column_id == column_id)
            .cloned()
            .collect();
        units.sort_by(|a, b| a.term_id.cmp(&b.term_id));
        Ok(units)
    }
}
