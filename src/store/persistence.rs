//! Sled persistence for terms and content units

use crate::content::{ContentUnit, Term};
use crate::error::StorageError;
use crate::store::{check_forward_write, ContentUnitStore, TermFilter, TermRepository};
use sled::{Db, Tree};
use std::path::Path;

const TREE_TERMS: &str = "terms";
const TREE_UNITS: &str = "units";

/// Sled-based implementation of TermRepository and ContentUnitStore
#[derive(Clone)]
pub struct SledContentStore {
    db: Db,
    terms: Tree,
    units: Tree,
}

impl SledContentStore {
    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::new(db)
    }

    pub fn new(db: Db) -> Result<Self, StorageError> {
        let terms = db.open_tree(TREE_TERMS)?;
        let units = db.open_tree(TREE_UNITS)?;
        Ok(Self { db, terms, units })
    }

    /// Get the underlying sled database (shared with the cache and job store)
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn put_term(&self, term: &Term) -> Result<(), StorageError> {
        let value = serde_json::to_vec(term)?;
        self.terms.insert(term.id.as_bytes(), value)?;
        Ok(())
    }

    /// Import many terms; returns how many were written
    pub fn import_terms(&self, terms: &[Term]) -> Result<usize, StorageError> {
        let mut batch = sled::Batch::default();
        for term in terms {
            batch.insert(term.id.as_bytes(), serde_json::to_vec(term)?);
        }
        self.terms.apply_batch(batch)?;
        Ok(terms.len())
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn unit_key(column_id: &str, term_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(column_id.len() + term_id.len() + 1);
    key.extend_from_slice(column_id.as_bytes());
    key.push(0);
    key.extend_from_slice(term_id.as_bytes());
    key
}

fn column_prefix(column_id: &str) -> Vec<u8> {
    let mut prefix = column_id.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

impl TermRepository for SledContentStore {
    fn list_terms(&self, filter: &TermFilter) -> Result<Vec<Term>, StorageError> {
        let mut terms = Vec::with_capacity(self.terms.len());
        for item in self.terms.iter() {
            let (_, value) = item?;
            terms.push(serde_json::from_slice::<Term>(&value)?);
        }
        Ok(filter.apply(terms.into_iter()))
    }

    fn has_existing_content(&self, term_id: &str, column_id: &str) -> Result<bool, StorageError> {
        Ok(self.units.contains_key(unit_key(column_id, term_id))?)
    }
}

impl ContentUnitStore for SledContentStore {
    fn write_unit(&self, unit: &ContentUnit) -> Result<(), StorageError> {
        let key = unit_key(&unit.column_id, &unit.term_id);
        let existing = self.read_unit(&unit.term_id, &unit.column_id)?;
        check_forward_write(existing.as_ref(), unit)?;
        let value = bincode::serialize(unit)?;
        self.units.insert(key, value)?;
        Ok(())
    }

    fn read_unit(
        &self,
        term_id: &str,
        column_id: &str,
    ) -> Result<Option<ContentUnit>, StorageError> {
        match self.units.get(unit_key(column_id, term_id))? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn list_units(&self, column_id: &str) -> Result<Vec<ContentUnit>, StorageError> {
        let mut units = Vec::new();
        for item in self.units.scan_prefix(column_prefix(column_id)) {
            let (_, value) = item?;
            units.push(bincode::deserialize(&value)?);
        }
        Ok(units)
    }
}
