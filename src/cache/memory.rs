//! In-process response cache with optional TTL and LRU capacity bound.

use crate::cache::{CacheEntry, CacheKey, ResponseCache};
use crate::error::StorageError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Slot {
    entry: CacheEntry,
    inserted_at: Instant,
    last_used: u64,
}

struct Inner {
    slots: HashMap<CacheKey, Slot>,
    clock: u64,
}

pub struct MemoryResponseCache {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
    ttl: Option<Duration>,
}

impl MemoryResponseCache {
    /// Unbounded cache without expiry
    pub fn new() -> Self {
        Self::with_limits(None, None)
    }

    pub fn with_limits(capacity: Option<usize>, ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                clock: 0,
            }),
            capacity,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, slot: &Slot) -> bool {
        self.ttl
            .map(|ttl| slot.inserted_at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

impl Default for MemoryResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for MemoryResponseCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let now = inner.clock;

        let expired = match inner.slots.get(key) {
            Some(slot) => self.is_expired(slot),
            None => return Ok(None),
        };
        if expired {
            inner.slots.remove(key);
            return Ok(None);
        }

        Ok(inner.slots.get_mut(key).map(|slot| {
            slot.last_used = now;
            slot.entry.clone()
        }))
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let now = inner.clock;

        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return Ok(());
            }
            if !inner.slots.contains_key(key) && inner.slots.len() >= capacity {
                let victim = inner
                    .slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    inner.slots.remove(&victim);
                }
            }
        }

        inner.slots.insert(
            key.clone(),
            Slot {
                entry: entry.clone(),
                inserted_at: Instant::now(),
                last_used: now,
            },
        );
        Ok(())
    }
}
