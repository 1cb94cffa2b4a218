//! Cache entry stores.

use crate::key::CacheKey;
use crate::validity::{Validity, now_ms};
use folio_events::{CanonicalEncode, EventBuffer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A memoized stream
///
/// Entries are replaced wholesale and never mutated after being stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key the entry is stored under
    pub key: CacheKey,
    /// Validity read after production
    pub validity: Validity,
    /// Recorded events
    pub events: EventBuffer,
    /// When the entry was stored, milliseconds since the Unix epoch
    pub stored_at_ms: u64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    #[must_use]
    pub fn new(key: CacheKey, validity: Validity, events: EventBuffer) -> Self {
        Self {
            key,
            validity,
            events,
            stored_at_ms: now_ms(),
        }
    }
}

impl CanonicalEncode for CacheEntry {}

/// Cache store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Backing storage failed
    #[error("cache I/O error: {reason}")]
    Io { reason: String },
    /// Entry could not be encoded or decoded
    #[error("cache entry encoding error: {reason}")]
    Encoding { reason: String },
    /// Stored entry does not belong to the requested key
    #[error("cache entry for '{expected}' holds key '{found}'")]
    KeyMismatch { expected: String, found: String },
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Entries currently held
    pub entry_count: usize,
    /// Lookups
    pub read_count: u64,
    /// Stores
    pub write_count: u64,
    /// Removals of present entries
    pub remove_count: u64,
}

/// Storage behind the cache coordinator
///
/// Implementations must be safe to share across threads. Eviction is left
/// to whoever owns the store; the coordinator only reads and writes.
pub trait CacheStore: Send + Sync {
    /// Look up an entry
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage fails
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError>;

    /// Store an entry, replacing any entry under the same key
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage fails
    fn put(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove an entry, returning whether one was present
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage fails
    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Keys currently held
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage fails
    fn keys(&self) -> Result<Vec<CacheKey>, CacheError>;

    /// Number of entries currently held
    fn len(&self) -> usize;

    /// Whether the store holds nothing
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store statistics
    fn stats(&self) -> StoreStats;
}

/// In-memory cache store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    stats: RwLock<StoreStats>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = StoreStats::default();
    }

    /// Whether an entry exists for `key`
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub(crate) fn insert_shared(&self, entry: Arc<CacheEntry>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.key.clone(), entry);
        let count = entries.len();
        drop(entries);

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.entry_count = count;
        stats.write_count += 1;
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .read_count += 1;
        Ok(entry)
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.insert_shared(Arc::new(entry));
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let removed = entries.remove(key).is_some();
        let count = entries.len();
        drop(entries);

        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.entry_count = count;
        if removed {
            stats.remove_count += 1;
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn stats(&self) -> StoreStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
