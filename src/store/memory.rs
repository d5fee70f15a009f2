//! In-process TTL store.
//!
//! Entries live in a sharded [`DashMap`] keyed by string. Every entry carries
//! its absolute deadline, and every operation checks it, so an expired entry is
//! never observed as live no matter when the background sweep last ran. The
//! sweep only reclaims memory.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::{CacheError, Delta, Expiration, Store, encode_counter, parse_counter};

/// Default TTL used by [`InMemoryStore::default`].
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Sweep interval used by [`InMemoryStore::default`].
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    // `None` never expires.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Shared {
    entries: DashMap<String, Entry>,
    default_ttl: Option<Duration>,
}

impl Shared {
    /// A deadline past what `Instant` can represent never expires.
    fn deadline(&self, ttl: Expiration, now: Instant) -> Option<Instant> {
        ttl.resolve(self.default_ttl).and_then(|ttl| now.checked_add(ttl))
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn adjust(&self, key: &str, delta: Delta) -> Result<u64, CacheError> {
        let now = Instant::now();
        let MapEntry::Occupied(mut occupied) = self.entries.entry(key.to_owned()) else {
            return Err(CacheError::CacheMiss);
        };
        if occupied.get().is_expired(now) {
            occupied.remove();
            return Err(CacheError::CacheMiss);
        }

        let current = parse_counter(&occupied.get().value).ok_or(CacheError::NotStored)?;
        let next = delta.apply(current);
        occupied.get_mut().value = encode_counter(next);
        Ok(next)
    }
}

/// A concurrent, process-local store with per-entry expiry.
///
/// Single-key operations are linearizable: each one runs under the lock of
/// the shard that owns the key, so concurrent increments never lose updates.
///
/// When built inside a Tokio runtime with a non-zero cleanup interval, a
/// background task periodically drops expired entries. The task stops when the
/// store is dropped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::store::{Expiration, InMemoryStore, Store, StoreExt};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), rttp_cache::store::CacheError> {
/// let store = InMemoryStore::new(Duration::from_secs(60), Duration::from_secs(5));
///
/// store.set_value("hits", &10, Expiration::Default).await?;
/// assert_eq!(store.increment("hits", 5).await?, 15);
/// assert_eq!(store.get_value::<u64>("hits").await?, 15);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryStore {
    shared: Arc<Shared>,
    janitor: Option<JoinHandle<()>>,
}

impl InMemoryStore {
    /// Creates a store.
    ///
    /// - `default_ttl`: TTL for writes using [`Expiration::Default`]; zero
    ///   means such entries never expire.
    /// - `cleanup_interval`: how often expired entries are swept; zero
    ///   disables the sweep and leaves reclamation to the read path.
    pub fn new(default_ttl: Duration, cleanup_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            entries: DashMap::new(),
            default_ttl: super::default_ttl(default_ttl),
        });

        let janitor = if cleanup_interval.is_zero() {
            None
        } else {
            spawn_janitor(Arc::downgrade(&shared), cleanup_interval)
        };

        Self { shared, janitor }
    }

    /// Number of entries physically held, including expired entries that
    /// have not been swept yet.
    pub fn len(&self) -> usize {
        self.shared.entries.len()
    }

    /// Returns `true` if no entries are physically held.
    pub fn is_empty(&self) -> bool {
        self.shared.entries.is_empty()
    }

    /// Removes every expired entry now and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    fn store(&self, key: &str, value: Bytes, ttl: Expiration) {
        let expires_at = self.shared.deadline(ttl, Instant::now());
        self.shared
            .entries
            .insert(key.to_owned(), Entry { value, expires_at });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CLEANUP_INTERVAL)
    }
}

impl Drop for InMemoryStore {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }
    }
}

fn spawn_janitor(shared: Weak<Shared>, every: Duration) -> Option<JoinHandle<()>> {
    let Ok(runtime) = Handle::try_current() else {
        warn!(
            interval = ?every,
            "no Tokio runtime; expired entries are reclaimed on access only"
        );
        return None;
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let purged = shared.purge_expired();
            if purged > 0 {
                debug!(purged, remaining = shared.entries.len(), "swept expired entries");
            }
        }
    }))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.shared.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(entry.value.clone());
            }
        }
        // Shard guard released above; drop the stale entry unless a writer
        // has refreshed it in the meantime.
        self.shared
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        Err(CacheError::CacheMiss)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        self.store(key, value, ttl);
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: self.shared.deadline(ttl, now),
        };
        match self.shared.entries.entry(key.to_owned()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(now) {
                    return Err(CacheError::NotStored);
                }
                occupied.insert(entry);
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    async fn replace(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let now = Instant::now();
        let MapEntry::Occupied(mut occupied) = self.shared.entries.entry(key.to_owned()) else {
            return Err(CacheError::NotStored);
        };
        if occupied.get().is_expired(now) {
            occupied.remove();
            return Err(CacheError::NotStored);
        }
        occupied.insert(Entry {
            value,
            expires_at: self.shared.deadline(ttl, now),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let now = Instant::now();
        match self.shared.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired(now) => Ok(()),
            _ => Err(CacheError::CacheMiss),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        self.shared.adjust(key, Delta::Increment(delta))
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        self.shared.adjust(key, Delta::Decrement(delta))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.shared.entries.clear();
        Ok(())
    }
}
