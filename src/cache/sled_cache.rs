//! Durable sled-backed response cache.

use crate::cache::{CacheEntry, CacheKey, ResponseCache};
use crate::error::StorageError;
use sled::{Db, Tree};

const TREE_RESPONSE_CACHE: &str = "response_cache";

#[derive(Clone)]
pub struct SledResponseCache {
    tree: Tree,
}

impl SledResponseCache {
    pub fn new(db: &Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(TREE_RESPONSE_CACHE)?;
        Ok(Self { tree })
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl ResponseCache for SledResponseCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        let Some(raw) = self.tree.get(key.as_str().as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(entry)?;
        self.tree.insert(key.as_str().as_bytes(), value)?;
        Ok(())
    }
}
