//! Response caching middleware.
//!
//! A cached route serves its first response from the handler and records it in
//! a [`Store`]; later requests for the same URI are answered from the store
//! without running the handler until the entry expires.
//!
//! - [`ResponseCache`] caches every route below it in the middleware chain.
//! - [`cache_handler`] caches a single endpoint.
//! - [`StoreProvider`] hands handlers a [`SharedStore`] for their own use.
//!
//! Both caching entry points share one code path. The cache never turns a
//! response into an error: store read failures count as misses and store write
//! failures are logged.
//!
//! Concurrent misses for the same URI each run the handler; the last write
//! wins.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Response,
    context::Context,
    http::{ResponseBuffer, ResponseWriter},
    middleware::{Handler, Middleware, Next, ResponseFuture},
    store::{CacheError, Expiration, Store, StoreExt},
};

mod captured;
mod key;
mod writer;

pub use captured::CapturedResponse;
pub use key::{MAX_ESCAPED_KEY_LEN, derive_key};
pub use writer::CachedWriter;

/// Key prefix used when none is configured.
pub const DEFAULT_RESPONSE_CACHE_PREFIX: &str = "rttp.response-cache";

/// Decides per request whether to bypass the cache entirely.
pub type Skipper = Arc<dyn Fn(&Context) -> bool + Send + Sync + 'static>;

/// Never bypasses the cache.
pub fn never_skip(_ctx: &Context) -> bool {
    false
}

/// Bypasses the cache when the client asks for a fresh response with
/// `Cache-Control: no-cache`, `Cache-Control: no-store` or `Pragma: no-cache`.
pub fn skip_no_cache(ctx: &Context) -> bool {
    let headers = ctx.request().headers();
    let has_directive = |name: &str, wanted: &[&str]| {
        headers.get_all(name).any(|value| {
            value
                .split(',')
                .map(str::trim)
                .any(|directive| wanted.iter().any(|w| directive.eq_ignore_ascii_case(w)))
        })
    };
    has_directive("cache-control", &["no-cache", "no-store"]) || has_directive("pragma", &["no-cache"])
}

/// Bypasses the cache for anything but GET, HEAD, OPTIONS and TRACE.
pub fn skip_unsafe_methods(ctx: &Context) -> bool {
    !ctx.request().method().is_safe()
}

/// Configuration shared by [`ResponseCache`] and [`cache_handler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use rttp_cache::cache::{ResponseCacheConfig, skip_unsafe_methods};
/// use rttp_cache::store::InMemoryStore;
///
/// # #[tokio::main] async fn main() {
/// let config = ResponseCacheConfig::new(Arc::new(InMemoryStore::default()))
///     .key_prefix("pages")
///     .skipper(skip_unsafe_methods)
///     .expire(Duration::from_secs(30));
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseCacheConfig {
    store: Arc<dyn Store>,
    key_prefix: String,
    skipper: Skipper,
    expire: Expiration,
}

impl ResponseCacheConfig {
    /// Caches into `store` with the default prefix, no skipper and the store's
    /// default expiration.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_RESPONSE_CACHE_PREFIX.to_owned(),
            skipper: Arc::new(never_skip),
            expire: Expiration::Default,
        }
    }

    /// Sets the namespace prepended to every key. An empty prefix keeps the
    /// default.
    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if !prefix.is_empty() {
            self.key_prefix = prefix;
        }
        self
    }

    /// Sets the predicate that bypasses the cache for a request.
    #[must_use]
    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skipper = Arc::new(skipper);
        self
    }

    /// Sets how long captured responses live. A zero duration means the
    /// store's default.
    #[must_use]
    pub fn expire(mut self, expire: impl Into<Expiration>) -> Self {
        self.expire = expire.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.key_prefix
    }

    async fn serve<S, F, Fut>(self: Arc<Self>, ctx: Context, downstream: F) -> Response
    where
        S: ReplaySink,
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Response>,
    {
        if (self.skipper)(&ctx) {
            return downstream(ctx).await;
        }

        let key = derive_key(&self.key_prefix, ctx.request().request_uri());
        match self.store.get_value::<CapturedResponse>(&key).await {
            Ok(captured) => {
                debug!(%key, status = %captured.status, "response cache hit");
                let mut sink = S::default();
                match captured.replay_onto(&mut sink).await {
                    Ok(()) => return sink.finish(),
                    Err(err) => {
                        warn!(%key, error = %err, "cached response replay failed; serving fresh")
                    }
                }
            }
            Err(CacheError::CacheMiss) => debug!(%key, "response cache miss"),
            Err(err) => warn!(%key, error = %err, "response cache read failed; serving fresh"),
        }

        let response = downstream(ctx).await;
        let mut writer = CachedWriter::new(
            ResponseBuffer::new(),
            Arc::clone(&self.store),
            key,
            self.expire,
        );
        // ResponseBuffer never fails a write.
        if let Err(err) = response.write_to(&mut writer).await {
            warn!(error = %err, "failed to emit response through cache");
        }
        writer.into_inner().into_response()
    }
}

impl fmt::Debug for ResponseCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseCacheConfig")
            .field("key_prefix", &self.key_prefix)
            .field("expire", &self.expire)
            .finish_non_exhaustive()
    }
}

/// Where a cache hit is replayed before it becomes the response.
trait ReplaySink: ResponseWriter + Default {
    fn finish(self) -> Response;
}

impl ReplaySink for ResponseBuffer {
    fn finish(self) -> Response {
        self.into_response()
    }
}

/// Middleware that caches every response produced below it in the chain.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{Response, StatusCode};
/// use rttp_cache::cache::{ResponseCache, ResponseCacheConfig};
/// use rttp_cache::context::Context;
/// use rttp_cache::middleware::{Handler, Next, ResponseFuture, from_handler, from_middleware};
/// use rttp_cache::store::InMemoryStore;
///
/// # #[tokio::main] async fn main() {
/// let cache = ResponseCache::new(ResponseCacheConfig::new(Arc::new(InMemoryStore::default())));
/// let hello: Handler = Arc::new(|_ctx: Context| -> ResponseFuture {
///     Box::pin(async { Response::new(StatusCode::OK).body("hi") })
/// });
/// let chain = vec![from_middleware(Arc::new(cache)), from_handler(hello)];
/// # let _ = Next::new(chain);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResponseCache {
    config: Arc<ResponseCacheConfig>,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl Middleware for ResponseCache {
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture {
        let config = Arc::clone(&self.config);
        Box::pin(config.serve::<ResponseBuffer, _, _>(ctx, |ctx| next.run(ctx)))
    }
}

/// Wraps a single endpoint so its responses are cached.
pub fn cache_handler(config: ResponseCacheConfig, handler: Handler) -> Handler {
    let config = Arc::new(config);
    Arc::new(move |ctx: Context| -> ResponseFuture {
        let config = Arc::clone(&config);
        let handler = Arc::clone(&handler);
        Box::pin(config.serve::<ResponseBuffer, _, _>(ctx, move |ctx| handler(ctx)))
    })
}

/// A store handle placed in the request [`Context`] by [`StoreProvider`].
///
/// ```
/// # use rttp_cache::{context::Context, cache::SharedStore};
/// # fn handler(ctx: &Context) {
/// if let Some(store) = ctx.extensions().get::<SharedStore>() {
///     // `store` derefs to `dyn Store`
///     # let _ = store;
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct SharedStore(Arc<dyn Store>);

impl SharedStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self(store)
    }

    pub fn into_inner(self) -> Arc<dyn Store> {
        self.0
    }
}

impl Deref for SharedStore {
    type Target = dyn Store;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedStore").finish_non_exhaustive()
    }
}

/// Middleware that makes a store available to every downstream handler as a
/// [`SharedStore`] extension.
#[derive(Clone)]
pub struct StoreProvider {
    store: SharedStore,
}

impl StoreProvider {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store: SharedStore::new(store),
        }
    }
}

impl Middleware for StoreProvider {
    fn handle(&self, mut ctx: Context, next: Next) -> ResponseFuture {
        ctx.extensions_mut().insert(self.store.clone());
        Box::pin(next.run(ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::http::Headers;
    use crate::{Request, StatusCode};
    use crate::middleware::{MiddlewareHandler, from_handler, from_middleware};
    use crate::store::InMemoryStore;

    fn request(raw: &str) -> Context {
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req)
    }

    fn get(path: &str) -> Context {
        request(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n"))
    }

    fn store() -> Arc<dyn Store> {
        Arc::new(InMemoryStore::new(Duration::from_secs(60), Duration::ZERO))
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |ctx: Context| -> ResponseFuture {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let path = ctx.request().path().to_owned();
            Box::pin(async move {
                Response::new(StatusCode::CREATED)
                    .header("Content-Type", "text/plain")
                    .header("X-Call", n.to_string())
                    .body(format!("{path} #{n}"))
            })
        })
    }

    fn cached_chain(config: ResponseCacheConfig, endpoint: Handler) -> Vec<MiddlewareHandler> {
        vec![
            from_middleware(Arc::new(ResponseCache::new(config))),
            from_handler(endpoint),
        ]
    }

    #[tokio::test]
    async fn second_request_is_served_from_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = cached_chain(
            ResponseCacheConfig::new(store()),
            counting_handler(Arc::clone(&calls)),
        );

        let first = Next::new(chain.clone()).run(get("/items?page=2")).await;
        let second = Next::new(chain.clone()).run(get("/items?page=2")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.status(), first.status());
        assert_eq!(second.content(), first.content());
        assert_eq!(second.headers().get("x-call"), Some("1"));
        assert!(second.headers().get("last-modified").is_some());
        assert!(first.headers().get("last-modified").is_none());

        Next::new(chain).run(get("/items?page=3")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entries_are_stored_under_the_prefix() {
        let store = store();
        let config = ResponseCacheConfig::new(Arc::clone(&store)).key_prefix("pages");
        let chain = cached_chain(config, counting_handler(Arc::default()));

        Next::new(chain).run(get("/a")).await;

        let captured: CapturedResponse = store.get_value("pages:%2Fa").await.unwrap();
        assert_eq!(captured.data, Bytes::from_static(b"/a #1"));
    }

    #[test]
    fn empty_prefix_keeps_default() {
        let config = ResponseCacheConfig::new(store()).key_prefix("");
        assert_eq!(config.prefix(), DEFAULT_RESPONSE_CACHE_PREFIX);
    }

    #[tokio::test]
    async fn skipped_requests_bypass_the_store() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = store();
        let config = ResponseCacheConfig::new(Arc::clone(&store)).skipper(skip_no_cache);
        let chain = cached_chain(config, counting_handler(Arc::clone(&calls)));

        let no_cache = "GET /x HTTP/1.1\r\nCache-Control: max-age=0, No-Cache\r\n\r\n";
        Next::new(chain.clone()).run(request(no_cache)).await;
        Next::new(chain.clone()).run(request(no_cache)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let key = derive_key(DEFAULT_RESPONSE_CACHE_PREFIX, "/x");
        assert!(store.get(&key).await.unwrap_err().is_miss());

        Next::new(chain).run(get("/x")).await;
        assert!(store.get(&key).await.is_ok());
    }

    #[test]
    fn provided_skippers() {
        assert!(!never_skip(&get("/")));
        assert!(skip_unsafe_methods(&request("POST / HTTP/1.1\r\n\r\n")));
        assert!(!skip_unsafe_methods(&get("/")));
        assert!(skip_no_cache(&request("GET / HTTP/1.1\r\nPragma: no-cache\r\n\r\n")));
        assert!(!skip_no_cache(&request(
            "GET / HTTP/1.1\r\nCache-Control: max-age=60\r\n\r\n"
        )));
    }

    struct Unreachable;

    #[async_trait]
    impl Store for Unreachable {
        async fn get(&self, _key: &str) -> Result<Bytes, CacheError> {
            Err(CacheError::backend(std::io::Error::other("connection refused")))
        }

        async fn set(&self, _: &str, _: Bytes, _: Expiration) -> Result<(), CacheError> {
            Err(CacheError::backend(std::io::Error::other("connection refused")))
        }

        async fn add(&self, _: &str, _: Bytes, _: Expiration) -> Result<(), CacheError> {
            Err(CacheError::Unsupported)
        }

        async fn replace(&self, _: &str, _: Bytes, _: Expiration) -> Result<(), CacheError> {
            Err(CacheError::Unsupported)
        }

        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unsupported)
        }

        async fn increment(&self, _: &str, _: u64) -> Result<u64, CacheError> {
            Err(CacheError::Unsupported)
        }

        async fn decrement(&self, _: &str, _: u64) -> Result<u64, CacheError> {
            Err(CacheError::Unsupported)
        }

        async fn flush(&self) -> Result<(), CacheError> {
            Err(CacheError::Unsupported)
        }
    }

    #[tokio::test]
    async fn store_failures_fall_through_to_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = cached_chain(
            ResponseCacheConfig::new(Arc::new(Unreachable)),
            counting_handler(Arc::clone(&calls)),
        );

        let first = Next::new(chain.clone()).run(get("/")).await;
        let second = Next::new(chain).run(get("/")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.content().as_ref(), b"/ #2");
    }

    #[tokio::test]
    async fn corrupt_entries_count_as_misses() {
        let store = store();
        let key = derive_key(DEFAULT_RESPONSE_CACHE_PREFIX, "/");
        store
            .set(&key, Bytes::from_static(b"not json"), Expiration::Default)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let chain = cached_chain(
            ResponseCacheConfig::new(Arc::clone(&store)),
            counting_handler(Arc::clone(&calls)),
        );
        let res = Next::new(chain).run(get("/")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.status(), StatusCode::CREATED);
        assert!(store.get_value::<CapturedResponse>(&key).await.is_ok());
    }

    #[derive(Default)]
    struct ClosedSink(Headers);

    #[async_trait]
    impl ResponseWriter for ClosedSink {
        fn headers(&self) -> &Headers {
            &self.0
        }

        fn headers_mut(&mut self) -> &mut Headers {
            &mut self.0
        }

        fn write_header(&mut self, _status: StatusCode) {}

        async fn write(&mut self, _data: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    impl ReplaySink for ClosedSink {
        fn finish(self) -> Response {
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }

    #[tokio::test]
    async fn entries_with_impossible_status_count_as_misses() {
        let store = store();
        let key = derive_key(DEFAULT_RESPONSE_CACHE_PREFIX, "/");
        let raw = br#"{"status":0,"header":[],"data":""}"#;
        store
            .set(&key, Bytes::from_static(raw), Expiration::Default)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let chain = cached_chain(
            ResponseCacheConfig::new(Arc::clone(&store)),
            counting_handler(Arc::clone(&calls)),
        );
        let res = Next::new(chain).run(get("/")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(res.status(), StatusCode::CREATED);
        let captured: CapturedResponse = store.get_value(&key).await.unwrap();
        assert_eq!(captured.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn failed_replay_serves_a_fresh_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = counting_handler(Arc::clone(&calls));
        let config = Arc::new(ResponseCacheConfig::new(store()));

        let first = Arc::clone(&config)
            .serve::<ResponseBuffer, _, _>(get("/"), |ctx| handler(ctx))
            .await;
        let second = Arc::clone(&config)
            .serve::<ClosedSink, _, _>(get("/"), |ctx| handler(ctx))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.status(), StatusCode::CREATED);
        assert_eq!(second.content().as_ref(), b"/ #2");
    }

    #[tokio::test]
    async fn longest_expiry_still_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = ResponseCacheConfig::new(store()).expire(Duration::MAX);
        let chain = cached_chain(config, counting_handler(Arc::clone(&calls)));

        let first = Next::new(chain.clone()).run(get("/")).await;
        let second = Next::new(chain).run(get("/")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(second.content(), first.content());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_run_the_handler_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = ResponseCacheConfig::new(store()).expire(Duration::from_secs(5));
        let chain = cached_chain(config, counting_handler(Arc::clone(&calls)));

        Next::new(chain.clone()).run(get("/")).await;
        Next::new(chain.clone()).run(get("/")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        Next::new(chain).run(get("/")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn per_endpoint_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cached = cache_handler(
            ResponseCacheConfig::new(store()),
            counting_handler(Arc::clone(&calls)),
        );

        let a = cached(get("/one")).await;
        let b = cached(get("/one")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.content(), b.content());
    }

    #[tokio::test]
    async fn provider_injects_shared_store() {
        let store = store();
        let endpoint: Handler = Arc::new(|ctx: Context| -> ResponseFuture {
            Box::pin(async move {
                let Some(store) = ctx.extensions().get::<SharedStore>().cloned() else {
                    return Response::new(StatusCode::INTERNAL_SERVER_ERROR);
                };
                let hits = match store.increment("hits", 1).await {
                    Ok(n) => n,
                    Err(_) => {
                        let _ = store.set_value("hits", &1, Expiration::Default).await;
                        1
                    }
                };
                Response::new(StatusCode::OK).body(hits.to_string())
            })
        });
        let chain = vec![
            from_middleware(Arc::new(StoreProvider::new(Arc::clone(&store)))),
            from_handler(endpoint),
        ];

        let first = Next::new(chain.clone()).run(get("/")).await;
        let second = Next::new(chain).run(get("/")).await;

        assert_eq!(first.content().as_ref(), b"1");
        assert_eq!(second.content().as_ref(), b"2");
        assert_eq!(store.get_value::<u64>("hits").await.unwrap(), 2);
    }
}
