//! Store backed by a [`moka`](::moka) concurrent cache.
//!
//! moka owns eviction and expiry; each value carries its own deadline, which a
//! custom [`Expiry`] hands back to moka on every create and update. Conditional
//! writes and counters go through moka's atomic `and_compute_with`.

use std::time::{Duration, Instant};

use ::moka::Expiry;
use ::moka::ops::compute::{CompResult, Op};
use ::moka::sync::Cache;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use super::{CacheError, Delta, Expiration, Store, encode_counter, parse_counter};

/// Longest TTL handed to moka; anything longer is clamped to it.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct MokaEntry {
    data: Bytes,
    expires_at: Option<Instant>,
}

impl MokaEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

struct PerEntryExpiry;

impl Expiry<String, MokaEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MokaEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        value.remaining(created_at)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MokaEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.remaining(updated_at)
    }
}

/// A process-local store on top of `moka::sync::Cache`.
///
/// Unlike [`InMemoryStore`](super::InMemoryStore) it can be bounded: once
/// `max_capacity` entries are held, moka evicts by its admission policy.
#[derive(Clone)]
pub struct MokaStore {
    cache: Cache<String, MokaEntry>,
    default_ttl: Option<Duration>,
}

impl MokaStore {
    /// Creates a store. A zero `default_ttl` keeps [`Expiration::Default`]
    /// entries forever; `max_capacity` of `None` leaves the cache unbounded.
    pub fn new(default_ttl: Duration, max_capacity: Option<u64>) -> Self {
        let mut builder = Cache::builder().expire_after(PerEntryExpiry);
        if let Some(max) = max_capacity {
            builder = builder.max_capacity(max);
        }
        Self {
            cache: builder.build(),
            default_ttl: super::default_ttl(default_ttl),
        }
    }

    fn entry(&self, data: Bytes, ttl: Expiration, now: Instant) -> MokaEntry {
        MokaEntry {
            data,
            expires_at: ttl
                .resolve(self.default_ttl)
                .and_then(|ttl| now.checked_add(ttl.min(MAX_TTL))),
        }
    }

    fn adjust(&self, key: &str, delta: Delta) -> Result<u64, CacheError> {
        let now = Instant::now();
        let mut outcome = Err(CacheError::CacheMiss);

        self.cache
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let Some(current) = current.map(|e| e.into_value()) else {
                    return Op::Nop;
                };
                if !current.is_live(now) {
                    return Op::Remove;
                }
                let Some(value) = parse_counter(&current.data) else {
                    outcome = Err(CacheError::NotStored);
                    return Op::Nop;
                };
                let next = delta.apply(value);
                outcome = Ok(next);
                Op::Put(MokaEntry {
                    data: encode_counter(next),
                    expires_at: current.expires_at,
                })
            });

        outcome
    }
}

#[async_trait]
impl Store for MokaStore {
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        match self.cache.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(entry.data),
            _ => Err(CacheError::CacheMiss),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let entry = self.entry(value, ttl, Instant::now());
        self.cache.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn add(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = self.entry(value, ttl, now);

        let result = self.cache.entry_by_ref(key).and_compute_with(|current| {
            match current {
                Some(current) if current.value().is_live(now) => Op::Nop,
                _ => Op::Put(entry),
            }
        });

        match result {
            CompResult::Inserted(_) | CompResult::ReplacedWith(_) => Ok(()),
            _ => Err(CacheError::NotStored),
        }
    }

    async fn replace(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = self.entry(value, ttl, now);

        let result = self.cache.entry_by_ref(key).and_compute_with(|current| {
            match current {
                Some(current) if current.value().is_live(now) => Op::Put(entry),
                Some(_) => Op::Remove,
                None => Op::Nop,
            }
        });

        match result {
            CompResult::ReplacedWith(_) => Ok(()),
            _ => Err(CacheError::NotStored),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self.cache.remove(key) {
            Some(entry) if entry.is_live(Instant::now()) => Ok(()),
            _ => Err(CacheError::CacheMiss),
        }
    }

    async fn increment(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        self.adjust(key, Delta::Increment(delta))
    }

    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        self.adjust(key, Delta::Decrement(delta))
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        trace!("moka store flushed");
        Ok(())
    }
}
