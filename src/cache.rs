//! Response cache
//!
//! Content-hash keyed store of prior completions. A hit replays the stored text at zero
//! cost, which makes re-running a job with unchanged prompts free and byte-identical.
//! Stale entries are never purged: bumping a column's prompt version changes every key.

pub mod memory;
pub mod sled_cache;

use crate::error::StorageError;
use crate::model::ModelTier;
use blake3::Hasher;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub use memory::MemoryResponseCache;
pub use sled_cache::SledResponseCache;

/// Hex-encoded blake3 digest identifying one prompt invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// CacheKey = hash(term_id || column_id || prompt_version || model_tier || prompt_text)
    ///
    /// Every field is length-prefixed so adjacent fields can never run together.
    pub fn compute(
        term_id: &str,
        column_id: &str,
        prompt_version: u32,
        model_tier: ModelTier,
        prompt_text: &str,
    ) -> Self {
        let mut hasher = Hasher::new();
        for field in [
            term_id.as_bytes(),
            column_id.as_bytes(),
            &prompt_version.to_le_bytes(),
            model_tier.as_str().as_bytes(),
            prompt_text.as_bytes(),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        CacheKey(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored completion and the cost originally paid for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub cost_units: f64,
    pub model_tier: ModelTier,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(text: impl Into<String>, cost_units: f64, model_tier: ModelTier) -> Self {
        Self {
            text: text.into(),
            cost_units,
            model_tier,
            created_at: Utc::now(),
        }
    }
}

/// Cache storage adapter
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StorageError>;
    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), StorageError>;
}

/// Wraps any adapter so that store failures degrade to misses instead of errors.
#[derive(Clone)]
pub struct ResilientCache {
    inner: Option<Arc<dyn ResponseCache>>,
    degraded: Arc<AtomicU64>,
}

impl ResilientCache {
    pub fn new(inner: Arc<dyn ResponseCache>) -> Self {
        Self {
            inner: Some(inner),
            degraded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A cache that always misses
    pub fn disabled() -> Self {
        Self {
            inner: None,
            degraded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let inner = self.inner.as_ref()?;
        match inner.get(key) {
            Ok(entry) => entry,
            Err(err) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                warn!(cache_key = %key, error = %err, "Cache read failed, treating as miss");
                None
            }
        }
    }

    pub fn put(&self, key: &CacheKey, entry: &CacheEntry) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        if let Err(err) = inner.put(key, entry) {
            self.degraded.fetch_add(1, Ordering::Relaxed);
            warn!(cache_key = %key, error = %err, "Cache write failed, entry dropped");
        }
    }

    /// Number of cache operations that failed and were degraded
    pub fn degraded_operations(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }
}
