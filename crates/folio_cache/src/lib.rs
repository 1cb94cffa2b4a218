//! FOLIO Cache
//!
//! Memoization of event streams: keys, tri-state validities, in-memory
//! and file-backed stores, and the coordinator that decides between
//! replaying a stored stream and producing a fresh one.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod fs;
pub mod key;
pub mod store;
pub mod validity;

pub use coordinator::{CacheConfig, CacheCoordinator, CacheOutcome, CachePolicy, CoordinatorStats, Memoizable};
pub use fs::{FsStore, FsStoreConfig};
pub use key::CacheKey;
pub use store::{CacheEntry, CacheError, CacheStore, MemoryStore, StoreStats};
pub use validity::{Validity, ValidityState, now_ms};
