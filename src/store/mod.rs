//! Key/value stores behind one contract.
//!
//! Every backend implements [`Store`]: an async, object-safe set of operations
//! over raw byte values, shared as `Arc<dyn Store>`. Typed access goes through
//! [`StoreExt`], which serializes values with `serde_json`.
//!
//! | Backend               | Where the data lives                     |
//! |-----------------------|------------------------------------------|
//! | [`InMemoryStore`]     | this process, lazy + swept TTL map       |
//! | [`MokaStore`]         | this process, `moka` concurrent cache    |
//! | [`MemcachedStore`]    | a memcached cluster                      |
//!
//! All backends report outcomes with the same [`CacheError`] taxonomy, so the
//! response cache never needs to know which one it talks to.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

pub mod config;
mod error;
pub mod memcached;
pub mod memory;
pub mod moka;

pub use config::StoreConfig;
pub use error::CacheError;
pub use memcached::MemcachedStore;
pub use memory::InMemoryStore;
pub use self::moka::MokaStore;

/// How long a written entry stays live.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_cache::store::Expiration;
///
/// let default_ttl = Some(Duration::from_secs(60));
/// assert_eq!(Expiration::Default.resolve(default_ttl), default_ttl);
/// assert_eq!(Expiration::Forever.resolve(default_ttl), None);
/// assert_eq!(Expiration::from(Duration::ZERO), Expiration::Default);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Use the backend's configured default TTL.
    #[default]
    Default,
    /// Never expire.
    Forever,
    /// Expire this long after the write. A zero duration means [`Expiration::Default`].
    After(Duration),
}

impl Expiration {
    /// Resolves to a concrete TTL, `None` meaning "never expires".
    ///
    /// `default_ttl` is the backend default, itself `None` when the backend
    /// keeps entries forever by default.
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::After(ttl) if !ttl.is_zero() => Some(ttl),
            Self::After(_) | Self::Default => default_ttl,
        }
    }
}

impl From<Duration> for Expiration {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Default
        } else {
            Self::After(ttl)
        }
    }
}

/// The operations every cache backend provides.
///
/// Values are opaque bytes. Counters are ASCII decimal `u64` values, which is
/// also what [`StoreExt::set_value`] produces for integers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the live value for `key`, or [`CacheError::CacheMiss`].
    async fn get(&self, key: &str) -> Result<Bytes, CacheError>;

    /// Stores `value` unconditionally.
    async fn set(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError>;

    /// Stores `value` only if no live entry exists, else [`CacheError::NotStored`].
    async fn add(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError>;

    /// Stores `value` only if a live entry exists, else [`CacheError::NotStored`].
    async fn replace(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError>;

    /// Removes a live entry, or fails with [`CacheError::CacheMiss`].
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Adds `delta` to a counter, wrapping on overflow, and returns the new value.
    async fn increment(&self, key: &str, delta: u64) -> Result<u64, CacheError>;

    /// Subtracts `delta` from a counter, stopping at zero, and returns the new value.
    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, CacheError>;

    /// Removes every entry.
    async fn flush(&self) -> Result<(), CacheError>;
}

/// Typed access to any [`Store`] through `serde_json`.
///
/// A stored value that does not decode as the requested type is reported as
/// [`CacheError::NotStored`], not as a miss.
#[async_trait]
pub trait StoreExt: Store {
    /// Reads and decodes the value stored under `key`.
    async fn get_value<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: DeserializeOwned,
    {
        let raw = self.get(key).await?;
        serde_json::from_slice(&raw).map_err(|_| CacheError::NotStored)
    }

    /// Encodes `value` and [`set`](Store::set)s it.
    async fn set_value<T>(&self, key: &str, value: &T, ttl: Expiration) -> Result<(), CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        self.set(key, raw, ttl).await
    }

    /// Encodes `value` and [`add`](Store::add)s it.
    async fn add_value<T>(&self, key: &str, value: &T, ttl: Expiration) -> Result<(), CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        self.add(key, raw, ttl).await
    }

    /// Encodes `value` and [`replace`](Store::replace)s it.
    async fn replace_value<T>(
        &self,
        key: &str,
        value: &T,
        ttl: Expiration,
    ) -> Result<(), CacheError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = encode(value)?;
        self.replace(key, raw, ttl).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, CacheError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|_| CacheError::NotStored)
}

/// A backend default TTL of zero keeps entries forever.
pub(crate) fn default_ttl(ttl: Duration) -> Option<Duration> {
    (!ttl.is_zero()).then_some(ttl)
}

/// A counter adjustment.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Delta {
    Increment(u64),
    Decrement(u64),
}

impl Delta {
    pub(crate) fn apply(self, current: u64) -> u64 {
        match self {
            Self::Increment(n) => current.wrapping_add(n),
            Self::Decrement(n) => current.saturating_sub(n),
        }
    }
}

pub(crate) fn parse_counter(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

pub(crate) fn encode_counter(value: u64) -> Bytes {
    Bytes::from(value.to_string())
}

/// Behavior every backend must share, run by each backend's test module.
#[cfg(test)]
pub(crate) mod contract {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::{CacheError, Expiration, Store, StoreExt};

    /// Store built with a default TTL of one hour.
    pub(crate) async fn typical_get_set(store: &dyn Store) {
        store
            .set_value("value", "foo", Expiration::Default)
            .await
            .unwrap();
        let got: String = store.get_value("value").await.unwrap();
        assert_eq!(got, "foo");
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn incr_decr(store: &dyn Store) {
        store.set_value("int", &10, Expiration::Default).await.unwrap();

        assert_eq!(store.increment("int", 50).await.unwrap(), 60);
        assert_eq!(store.decrement("int", 50).await.unwrap(), 10);

        // wraps
        assert_eq!(store.increment("int", u64::MAX - 5).await.unwrap(), 4);

        // floors at zero
        assert_eq!(store.decrement("int", 25).await.unwrap(), 0);

        let got: u64 = store.get_value("int").await.unwrap();
        assert_eq!(got, 0);
    }

    /// Store built with a default TTL of one second.
    pub(crate) async fn expiration(store: &dyn Store) {
        let with_default = async {
            store.set_value("int1", &10, Expiration::Default).await.unwrap();
            sleep(Duration::from_secs(2)).await;
            assert!(store.get_value::<i32>("int1").await.unwrap_err().is_miss());
        };

        let short = async {
            store
                .set_value("int2", &10, Expiration::After(Duration::from_secs(1)))
                .await
                .unwrap();
            sleep(Duration::from_secs(2)).await;
            assert!(store.get_value::<i32>("int2").await.unwrap_err().is_miss());
        };

        let long = async {
            store
                .set_value("int3", &10, Expiration::After(Duration::from_secs(3600)))
                .await
                .unwrap();
            sleep(Duration::from_secs(2)).await;
            assert_eq!(store.get_value::<i32>("int3").await.unwrap(), 10);
        };

        let forever = async {
            store.set_value("int4", &10, Expiration::Forever).await.unwrap();
            sleep(Duration::from_secs(2)).await;
            assert_eq!(store.get_value::<i32>("int4").await.unwrap(), 10);
        };

        tokio::join!(with_default, short, long, forever);
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn empty_cache(store: &dyn Store) {
        assert!(store.get("notexist").await.unwrap_err().is_miss());
        assert!(store.delete("notexist").await.unwrap_err().is_miss());
        assert!(store.increment("notexist", 1).await.unwrap_err().is_miss());
        assert!(store.decrement("notexist", 1).await.unwrap_err().is_miss());
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn replace(store: &dyn Store) {
        let err = store
            .replace_value("notexist", &1, Expiration::Forever)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::NotStored));

        let one_sec = Expiration::After(Duration::from_secs(1));
        store.set_value("int", &1, one_sec).await.unwrap();
        store.replace_value("int", &2, one_sec).await.unwrap();
        assert_eq!(store.get_value::<i32>("int").await.unwrap(), 2);

        sleep(Duration::from_secs(2)).await;
        let err = store.replace_value("int", &3, one_sec).await.unwrap_err();
        assert!(matches!(err, CacheError::NotStored));
        assert!(store.get_value::<i32>("int").await.unwrap_err().is_miss());
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn add(store: &dyn Store) {
        let one_sec = Expiration::After(Duration::from_secs(1));
        store.add_value("int", &1, one_sec).await.unwrap();

        let err = store.add_value("int", &2, one_sec).await.unwrap_err();
        assert!(matches!(err, CacheError::NotStored));

        sleep(Duration::from_secs(2)).await;
        store.add_value("int", &3, one_sec).await.unwrap();
        assert_eq!(store.get_value::<i32>("int").await.unwrap(), 3);
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn delete_and_flush(store: &dyn Store) {
        store.set_value("a", "1", Expiration::Default).await.unwrap();
        store.set_value("b", "2", Expiration::Default).await.unwrap();

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap_err().is_miss());
        assert!(store.delete("a").await.unwrap_err().is_miss());

        store.flush().await.unwrap();
        assert!(store.get("b").await.unwrap_err().is_miss());
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn delete_expired(store: &dyn Store) {
        store
            .set_value("gone", "1", Expiration::After(Duration::from_secs(1)))
            .await
            .unwrap();
        sleep(Duration::from_secs(2)).await;

        assert!(store.delete("gone").await.unwrap_err().is_miss());
        assert!(store.get("gone").await.unwrap_err().is_miss());
    }

    /// Any store; the longest representable TTL is accepted everywhere.
    pub(crate) async fn longest_ttl(store: &dyn Store) {
        let longest = Expiration::After(Duration::MAX);

        store.set_value("far", &1, longest).await.unwrap();
        assert_eq!(store.get_value::<u64>("far").await.unwrap(), 1);

        store.replace_value("far", &2, longest).await.unwrap();
        store.add_value("farther", &3, longest).await.unwrap();
        assert_eq!(store.increment("far", 1).await.unwrap(), 3);
        assert_eq!(store.get_value::<u64>("farther").await.unwrap(), 3);
    }

    /// Store built with a default TTL of one hour.
    pub(crate) async fn type_mismatch(store: &dyn Store) {
        store
            .set_value("word", "not a number", Expiration::Default)
            .await
            .unwrap();

        let err = store.get_value::<u64>("word").await.unwrap_err();
        assert!(matches!(err, CacheError::NotStored));

        let err = store.increment("word", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::NotStored));
    }
}
