//! Store backed by a memcached cluster.
//!
//! The `memcache` client is synchronous, so every call is moved onto Tokio's
//! blocking pool. Keys are distributed over the configured servers by the
//! client itself.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use memcache::{Client, CommandError, MemcacheError};
use tracing::{debug, instrument};

use super::{CacheError, Expiration, Store};

/// Relative expirations longer than this are read by memcached as Unix
/// timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// A store that talks to one or more memcached servers.
#[derive(Clone)]
pub struct MemcachedStore {
    client: Arc<Client>,
    default_ttl: Option<Duration>,
}

impl MemcachedStore {
    /// Connects to `servers`, each given as `host:port` or a full
    /// `memcache://` URL. A zero `default_ttl` keeps entries forever.
    ///
    /// Connecting opens the client's pools and blocks the calling thread.
    pub fn connect<I, S>(servers: I, default_ttl: Duration) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = servers
            .into_iter()
            .map(|server| server_url(server.as_ref()))
            .collect();
        debug!(servers = ?urls, "connecting to memcached");

        let client = Client::connect(urls).map_err(CacheError::backend)?;
        Ok(Self::with_client(client, default_ttl))
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client, default_ttl: Duration) -> Self {
        Self {
            client: Arc::new(client),
            default_ttl: super::default_ttl(default_ttl),
        }
    }

    fn expiration(&self, ttl: Expiration) -> u32 {
        expiration_secs(ttl.resolve(self.default_ttl), SystemTime::now())
    }

    async fn call<T, F>(
        &self,
        op: F,
        on_error: fn(MemcacheError) -> CacheError,
    ) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, MemcacheError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || op(&client))
            .await
            .map_err(CacheError::backend)?
            .map_err(on_error)
    }
}

fn server_url(server: &str) -> String {
    if server.contains("://") {
        server.to_owned()
    } else {
        format!("memcache://{server}")
    }
}

/// Converts a TTL into memcached's expiration field.
///
/// `None` maps to 0 (never). Sub-second TTLs round up to one second, since 0
/// would mean forever. TTLs beyond 30 days become absolute Unix timestamps.
fn expiration_secs(ttl: Option<Duration>, now: SystemTime) -> u32 {
    let Some(ttl) = ttl else {
        return 0;
    };
    let mut secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 || secs == 0 {
        secs = secs.saturating_add(1);
    }
    if secs > MAX_RELATIVE_EXPIRATION {
        let epoch = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        secs = secs.saturating_add(epoch);
    }
    u32::try_from(secs).unwrap_or(u32::MAX)
}

fn miss_or_backend(err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound) => CacheError::CacheMiss,
        other => CacheError::backend(other),
    }
}

// The server refused a conditional write: the key exists (add) or is missing
// (replace).
fn not_stored_or_backend(err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::CommandError(_) => CacheError::NotStored,
        other => CacheError::backend(other),
    }
}

// Non-numeric counters surface as command or client errors depending on the
// protocol in use.
fn counter_error(err: MemcacheError) -> CacheError {
    match err {
        MemcacheError::CommandError(CommandError::KeyNotFound) => CacheError::CacheMiss,
        MemcacheError::CommandError(_) | MemcacheError::ClientError(_) => CacheError::NotStored,
        other => CacheError::backend(other),
    }
}

#[async_trait]
impl Store for MemcachedStore {
    #[instrument(level = "trace", skip(self))]
    async fn get(&self, key: &str) -> Result<Bytes, CacheError> {
        let key = key.to_owned();
        self.call(move |c| c.get::<Vec<u8>>(&key), miss_or_backend)
            .await?
            .map(Bytes::from)
            .ok_or(CacheError::CacheMiss)
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn set(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let key = key.to_owned();
        let exp = self.expiration(ttl);
        self.call(move |c| c.set(&key, value.as_ref(), exp), CacheError::backend)
            .await
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn add(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let key = key.to_owned();
        let exp = self.expiration(ttl);
        self.call(move |c| c.add(&key, value.as_ref(), exp), not_stored_or_backend)
            .await
    }

    #[instrument(level = "trace", skip(self, value))]
    async fn replace(&self, key: &str, value: Bytes, ttl: Expiration) -> Result<(), CacheError> {
        let key = key.to_owned();
        let exp = self.expiration(ttl);
        self.call(move |c| c.replace(&key, value.as_ref(), exp), not_stored_or_backend)
            .await
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_owned();
        let deleted = self.call(move |c| c.delete(&key), miss_or_backend).await?;
        if deleted { Ok(()) } else { Err(CacheError::CacheMiss) }
    }

    #[instrument(level = "trace", skip(self))]
    async fn increment(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        let key = key.to_owned();
        self.call(move |c| c.increment(&key, delta), counter_error)
            .await
    }

    #[instrument(level = "trace", skip(self))]
    async fn decrement(&self, key: &str, delta: u64) -> Result<u64, CacheError> {
        let key = key.to_owned();
        self.call(move |c| c.decrement(&key, delta), counter_error)
            .await
    }

    #[instrument(level = "trace", skip(self))]
    async fn flush(&self) -> Result<(), CacheError> {
        self.call(|c| c.flush(), CacheError::backend).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn bare_hosts_get_a_scheme() {
        assert_eq!(server_url("127.0.0.1:11211"), "memcache://127.0.0.1:11211");
        assert_eq!(
            server_url("memcache://cache:11211?protocol=ascii"),
            "memcache://cache:11211?protocol=ascii"
        );
    }

    #[test]
    fn expiration_rounds_up_to_whole_seconds() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(expiration_secs(None, now), 0);
        assert_eq!(expiration_secs(Some(Duration::from_millis(1)), now), 1);
        assert_eq!(expiration_secs(Some(Duration::from_millis(1500)), now), 2);
        assert_eq!(expiration_secs(Some(Duration::from_secs(60)), now), 60);
    }

    #[test]
    fn long_expiration_becomes_timestamp() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let forty_days = Duration::from_secs(60 * 60 * 24 * 40);
        assert_eq!(
            expiration_secs(Some(forty_days), now),
            1_700_000_000 + 60 * 60 * 24 * 40
        );
    }

    #[test]
    fn longest_expiration_saturates() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(expiration_secs(Some(Duration::MAX), now), u32::MAX);
        assert_eq!(
            expiration_secs(Some(Duration::from_secs(u64::MAX)), now),
            u32::MAX
        );
    }

    fn local(default_ttl: Duration) -> MemcachedStore {
        MemcachedStore::connect(["127.0.0.1:11211"], default_ttl)
            .expect("memcached on localhost:11211")
    }

    async fn flushed(default_ttl: Duration) -> MemcachedStore {
        let store = local(default_ttl);
        store.flush().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn typical_get_set() {
        contract::typical_get_set(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn incr_decr() {
        contract::incr_decr(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn expiration() {
        contract::expiration(&flushed(Duration::from_secs(1)).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn empty_cache() {
        contract::empty_cache(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn replace() {
        contract::replace(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn add() {
        contract::add(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn delete_and_flush() {
        contract::delete_and_flush(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn type_mismatch() {
        contract::type_mismatch(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn delete_expired() {
        contract::delete_expired(&flushed(HOUR).await).await;
    }

    #[tokio::test]
    #[ignore = "needs memcached on localhost:11211"]
    async fn longest_ttl() {
        contract::longest_ttl(&flushed(HOUR).await).await;
    }
}
