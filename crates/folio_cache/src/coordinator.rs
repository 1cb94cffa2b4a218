//! Cache coordination around a memoizable producer.
//!
//! The coordinator asks the producer for a key, consults the store, and
//! either replays the stored events or runs the producer while teeing its
//! events into a recorder. The validity is read after production so that
//! producers which only learn it while running can report it.
//!
//! Store faults never fail an execution: they are logged and the
//! producer runs uncached.

use crate::key::CacheKey;
use crate::store::{CacheEntry, CacheStore};
use crate::validity::{Validity, ValidityState};
use folio_events::{ContentHandler, EventBuffer, StreamError, Tee};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Something whose output can be memoized
pub trait Memoizable {
    /// Key identifying the output, `None` when it must not be cached
    fn cache_key(&self) -> Option<CacheKey>;

    /// Current validity, `None` when unknown
    fn validity(&self) -> Option<Validity>;

    /// Produce the output
    ///
    /// # Errors
    ///
    /// Returns error if production or a downstream handler fails
    fn produce(&mut self, out: &mut dyn ContentHandler) -> Result<(), StreamError>;
}

/// What the coordinator did for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    /// Stored events were replayed
    Hit,
    /// The producer ran with a key
    Miss,
    /// The producer ran without consulting the cache
    Bypass,
}

impl CacheOutcome {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Bypass => "bypass",
        }
    }
}

/// Behavior when several executions compute the same key at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Computations race and the last store wins
    #[default]
    LastWriterWins,
    /// Lookup, computation and store run as one critical section per key
    SingleFlight,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Consult the cache at all
    pub enabled: bool,
    /// Concurrency policy
    pub policy: CachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: CachePolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Enable or disable caching
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the concurrency policy
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Coordinator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Replays from the store
    pub hits: u64,
    /// Keyed productions
    pub misses: u64,
    /// Productions that skipped the cache
    pub bypasses: u64,
    /// Entries written
    pub stores: u64,
    /// Store errors swallowed
    pub faults: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    stores: AtomicU64,
    faults: AtomicU64,
}

/// Mediates between memoizable producers and a [`CacheStore`]
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    flights: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl CacheCoordinator {
    /// Create a coordinator over `store`
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            flights: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
        }
    }

    /// Replay cached output for `producer` into `out`, or produce and store it
    ///
    /// # Errors
    ///
    /// Returns the producer's or a downstream handler's error; nothing is
    /// stored when production fails
    pub fn fetch_or_compute(
        &self,
        producer: &mut dyn Memoizable,
        out: &mut dyn ContentHandler,
    ) -> Result<CacheOutcome, StreamError> {
        if !self.config.enabled {
            return self.bypass(producer, out);
        }
        let Some(key) = producer.cache_key() else {
            return self.bypass(producer, out);
        };

        match self.config.policy {
            CachePolicy::LastWriterWins => self.lookup_or_produce(&key, producer, out),
            CachePolicy::SingleFlight => {
                let flight = self.join_flight(&key);
                let result = {
                    let _guard = flight.lock().unwrap_or_else(PoisonError::into_inner);
                    self.lookup_or_produce(&key, producer, out)
                };
                self.leave_flight(&key, flight);
                result
            }
        }
    }

    fn bypass(
        &self,
        producer: &mut dyn Memoizable,
        out: &mut dyn ContentHandler,
    ) -> Result<CacheOutcome, StreamError> {
        producer.produce(out)?;
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
        Ok(CacheOutcome::Bypass)
    }

    fn lookup_or_produce(
        &self,
        key: &CacheKey,
        producer: &mut dyn Memoizable,
        out: &mut dyn ContentHandler,
    ) -> Result<CacheOutcome, StreamError> {
        match self.store.get(key) {
            Ok(Some(entry)) => {
                if Self::still_valid(&entry.validity, producer) {
                    debug!(key = %key, events = entry.events.len(), "cache hit");
                    entry.events.replay(out)?;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(CacheOutcome::Hit);
                }
                debug!(key = %key, "cache entry stale");
            }
            Ok(None) => debug!(key = %key, "cache miss"),
            Err(error) => {
                warn!(key = %key, %error, "cache lookup failed, continuing uncached");
                self.counters.faults.fetch_add(1, Ordering::Relaxed);
                return self.bypass(producer, out);
            }
        }

        let mut recorder = EventBuffer::new();
        producer.produce(&mut Tee::new(&mut recorder, &mut *out))?;
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        match producer.validity() {
            Some(validity) => {
                let events = recorder.len();
                match self.store.put(CacheEntry::new(key.clone(), validity, recorder)) {
                    Ok(()) => {
                        debug!(key = %key, events, "cache entry stored");
                        self.counters.stores.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        warn!(key = %key, %error, "cache store failed, entry dropped");
                        self.counters.faults.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            None => debug!(key = %key, "no validity after production, not stored"),
        }
        Ok(CacheOutcome::Miss)
    }

    fn still_valid(stored: &Validity, producer: &dyn Memoizable) -> bool {
        match stored.is_valid() {
            ValidityState::Valid => true,
            ValidityState::Invalid => false,
            ValidityState::Unknown => producer
                .validity()
                .is_some_and(|fresh| stored.compare(&fresh) == ValidityState::Valid),
        }
    }

    fn join_flight(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(flights.entry(key.clone()).or_default())
    }

    fn leave_flight(&self, key: &CacheKey, flight: Arc<Mutex<()>>) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        // the map holds one reference and we hold the other
        if Arc::strong_count(&flight) <= 2 {
            flights.remove(key);
        }
    }
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("config", &self.config)
            .field("entries", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CacheError, MemoryStore, StoreStats};
    use folio_events::Event;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Counted {
        key: Option<CacheKey>,
        validity: Option<Validity>,
        produced: Arc<AtomicUsize>,
        text: String,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Counted {
        fn new(key: &str, validity: Validity, produced: &Arc<AtomicUsize>) -> Self {
            Self {
                key: Some(CacheKey::new(key)),
                validity: Some(validity),
                produced: Arc::clone(produced),
                text: "body".to_string(),
                fail: false,
                delay: None,
            }
        }
    }

    impl Memoizable for Counted {
        fn cache_key(&self) -> Option<CacheKey> {
            self.key.clone()
        }

        fn validity(&self) -> Option<Validity> {
            self.validity.clone()
        }

        fn produce(&mut self, out: &mut dyn ContentHandler) -> Result<(), StreamError> {
            self.produced.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            out.handle(Event::StartDocument)?;
            out.handle(Event::start("doc"))?;
            if self.fail {
                return Err(StreamError::stage("counted", "boom"));
            }
            out.handle(Event::text(&self.text))?;
            out.handle(Event::end("doc"))?;
            out.handle(Event::EndDocument)
        }
    }

    fn coordinator(config: CacheConfig) -> CacheCoordinator {
        CacheCoordinator::new(Arc::new(MemoryStore::new()), config)
    }

    #[test]
    fn test_round_trip_hit_and_revalidation() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));

        let mut first = Vec::new();
        let mut producer = Counted::new("k1", Validity::Timestamp(1), &produced);
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut first).unwrap(),
            CacheOutcome::Miss
        );
        assert_eq!(cache.store().len(), 1);

        let mut second = Vec::new();
        let mut producer = Counted::new("k1", Validity::Timestamp(1), &produced);
        producer.text = "ignored".to_string();
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut second).unwrap(),
            CacheOutcome::Hit
        );
        assert_eq!(first, second);
        assert_eq!(produced.load(Ordering::SeqCst), 1);

        let mut third = Vec::new();
        let mut producer = Counted::new("k1", Validity::Timestamp(2), &produced);
        producer.text = "fresh".to_string();
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut third).unwrap(),
            CacheOutcome::Miss
        );
        assert_eq!(produced.load(Ordering::SeqCst), 2);
        let stored = cache.store().get(&CacheKey::new("k1")).unwrap().unwrap();
        assert_eq!(stored.validity, Validity::Timestamp(2));
        assert_eq!(stored.events.events(), third.as_slice());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.stores), (1, 2, 2));
    }

    #[test]
    fn test_always_valid_skips_fresh_validity() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut producer = Counted::new("k", Validity::Always, &produced);
        cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap();

        let mut producer = Counted::new("k", Validity::Always, &produced);
        producer.validity = None;
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap(),
            CacheOutcome::Hit
        );
    }

    #[test]
    fn test_different_kind_is_a_miss() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut producer = Counted::new("k", Validity::Timestamp(1), &produced);
        cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap();

        let mut producer = Counted::new("k", Validity::Digest(folio_core::Hash::empty()), &produced);
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap(),
            CacheOutcome::Miss
        );
        assert_eq!(produced.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_no_key_is_never_cached() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let mut producer = Counted::new("k", Validity::Always, &produced);
            producer.key = None;
            assert_eq!(
                cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap(),
                CacheOutcome::Bypass
            );
        }
        assert_eq!(produced.load(Ordering::SeqCst), 2);
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_no_validity_is_not_stored() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut producer = Counted::new("k", Validity::Always, &produced);
        producer.validity = None;
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap(),
            CacheOutcome::Miss
        );
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_failed_production_stores_nothing() {
        let cache = coordinator(CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut producer = Counted::new("k", Validity::Always, &produced);
        producer.fail = true;
        assert!(cache.fetch_or_compute(&mut producer, &mut Vec::new()).is_err());
        assert!(cache.store().is_empty());
    }

    #[test]
    fn test_disabled_cache_bypasses() {
        let cache = coordinator(CacheConfig::default().with_enabled(false));
        let produced = Arc::new(AtomicUsize::new(0));
        let mut producer = Counted::new("k", Validity::Always, &produced);
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut Vec::new()).unwrap(),
            CacheOutcome::Bypass
        );
        assert!(cache.store().is_empty());
    }

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get(&self, _key: &CacheKey) -> Result<Option<Arc<CacheEntry>>, CacheError> {
            Err(CacheError::Io {
                reason: "offline".into(),
            })
        }

        fn put(&self, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Io {
                reason: "offline".into(),
            })
        }

        fn remove(&self, _key: &CacheKey) -> Result<bool, CacheError> {
            Ok(false)
        }

        fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
            Ok(Vec::new())
        }

        fn len(&self) -> usize {
            0
        }

        fn stats(&self) -> StoreStats {
            StoreStats::default()
        }
    }

    #[test]
    fn test_store_fault_continues_uncached() {
        let cache = CacheCoordinator::new(Arc::new(BrokenStore), CacheConfig::default());
        let produced = Arc::new(AtomicUsize::new(0));
        let mut out = Vec::new();
        let mut producer = Counted::new("k", Validity::Always, &produced);
        assert_eq!(
            cache.fetch_or_compute(&mut producer, &mut out).unwrap(),
            CacheOutcome::Bypass
        );
        assert_eq!(out.len(), 5);
        assert_eq!(cache.stats().faults, 1);
    }

    #[test]
    fn test_single_flight_computes_once() {
        let cache = coordinator(CacheConfig::default().with_policy(CachePolicy::SingleFlight));
        let produced = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let cache = &cache;
                let produced = &produced;
                scope.spawn(move || {
                    let mut producer = Counted::new("shared", Validity::Always, produced);
                    producer.delay = Some(Duration::from_millis(20));
                    let mut out = Vec::new();
                    cache.fetch_or_compute(&mut producer, &mut out).unwrap();
                    assert_eq!(out.len(), 5);
                });
            }
        });

        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 3);
        assert!(cache.flights.lock().unwrap().is_empty());
    }

    #[test]
    fn test_policy_serde_names() {
        let json = serde_json::to_string(&CachePolicy::SingleFlight).unwrap();
        assert_eq!(json, "\"single-flight\"");
        let config: CacheConfig = serde_json::from_str(r#"{"policy":"last-writer-wins"}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.policy, CachePolicy::LastWriterWins);
    }
}
