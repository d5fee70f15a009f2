//! # rttp-cache
//!
//! Pluggable key/value stores and response caching middleware for the rttp
//! middleware pipeline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rttp_cache::cache::{ResponseCache, ResponseCacheConfig};
//! use rttp_cache::context::Context;
//! use rttp_cache::middleware::{Handler, Next, ResponseFuture, from_handler, from_middleware};
//! use rttp_cache::store::StoreConfig;
//! use rttp_cache::{Request, Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StoreConfig::default().build()?;
//!     let cache = ResponseCache::new(
//!         ResponseCacheConfig::new(store).expire(Duration::from_secs(60)),
//!     );
//!     let report: Handler = Arc::new(|_ctx: Context| -> ResponseFuture {
//!         Box::pin(async { Response::new(StatusCode::OK).body("expensive report") })
//!     });
//!     let chain = vec![from_middleware(Arc::new(cache)), from_handler(report)];
//!
//!     let (req, _) = Request::parse(b"GET /report HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
//!     let response = Next::new(chain).run(Context::new(req)).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`store`]: the [`Store`](store::Store) contract and its in-process,
//!   moka and memcached backends.
//! - [`cache`]: response capture, replay and the caching middleware.
//! - [`middleware`], [`context`], [`http`]: the pipeline the cache plugs into.

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;
pub mod store;

pub use cache::{ResponseCache, ResponseCacheConfig, StoreProvider};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use store::{CacheError, Expiration, Store, StoreExt};
