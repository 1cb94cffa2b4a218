//! Filesystem-backed cache store.
//!
//! Each entry is one postcard-encoded file named by the BLAKE3 digest of
//! its key. An in-memory store sits in front so repeated lookups do not
//! touch the disk.

use crate::key::CacheKey;
use crate::store::{CacheEntry, CacheError, CacheStore, MemoryStore, StoreStats};
use folio_events::{CanonicalDecode, CanonicalEncode};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const ENTRY_EXTENSION: &str = "entry";

/// File store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStoreConfig {
    /// Directory holding entry files
    pub dir: PathBuf,
}

impl Default for FsStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".folio/cache"),
        }
    }
}

impl FsStoreConfig {
    /// Set the directory
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

/// Persistent cache store backed by a directory
#[derive(Debug)]
pub struct FsStore {
    memory: MemoryStore,
    dir: PathBuf,
    // orders publish + front update so disk and memory agree on the last writer
    publish: Mutex<()>,
}

impl FsStore {
    /// Open the store, creating its directory if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open(config: FsStoreConfig) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&config.dir).map_err(|e| CacheError::Io {
            reason: format!("failed to create cache directory {}: {}", config.dir.display(), e),
        })?;
        Ok(Self {
            memory: MemoryStore::new(),
            dir: config.dir,
            publish: Mutex::new(()),
        })
    }

    /// Directory holding entry files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.digest().to_hex(), ENTRY_EXTENSION))
    }

    fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Io {
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };
        CacheEntry::decode(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Encoding {
                reason: format!("{}: {}", path.display(), e),
            })
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let dir = std::fs::read_dir(&self.dir).map_err(|e| CacheError::Io {
            reason: format!("failed to list {}: {}", self.dir.display(), e),
        })?;
        let mut files = Vec::new();
        for item in dir {
            let path = item
                .map_err(|e| CacheError::Io {
                    reason: e.to_string(),
                })?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl CacheStore for FsStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
        if let Some(entry) = self.memory.get(key)? {
            return Ok(Some(entry));
        }

        let Some(entry) = Self::read_entry(&self.entry_path(key))? else {
            return Ok(None);
        };
        if &entry.key != key {
            return Err(CacheError::KeyMismatch {
                expected: key.to_string(),
                found: entry.key.to_string(),
            });
        }
        debug!(key = %key, "cache entry loaded from disk");
        let entry = Arc::new(entry);
        self.memory.insert_shared(Arc::clone(&entry));
        Ok(Some(entry))
    }

    fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let bytes = entry.encode().map_err(|e| CacheError::Encoding {
            reason: e.to_string(),
        })?;
        let path = self.entry_path(&entry.key);
        let io_error = |e: std::io::Error| CacheError::Io {
            reason: format!("failed to write {}: {}", path.display(), e),
        };

        // each put stages its own file so concurrent writers never share one
        let mut staging = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_error)?;
        staging.write_all(&bytes).map_err(io_error)?;

        let _publish = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        staging.persist(&path).map_err(|e| io_error(e.error))?;
        self.memory.put(entry)
    }

    fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let in_memory = self.memory.remove(key)?;
        let on_disk = match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                return Err(CacheError::Io {
                    reason: e.to_string(),
                });
            }
        };
        Ok(in_memory || on_disk)
    }

    fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys = Vec::new();
        for path in self.entry_files()? {
            if let Some(entry) = Self::read_entry(&path)? {
                keys.push(entry.key);
            }
        }
        Ok(keys)
    }

    fn len(&self) -> usize {
        self.entry_files()
            .map(|files| files.len())
            .unwrap_or_else(|_| self.memory.len())
    }

    fn stats(&self) -> StoreStats {
        let mut stats = self.memory.stats();
        stats.entry_count = self.len();
        stats
    }
}
