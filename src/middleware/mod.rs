//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling handlers
//! to infrastructure concerns. The response cache is one such layer: on a hit
//! it short-circuits, on a miss it decorates the downstream response.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Handler`]: type-erased endpoint that turns a [`Context`] into a [`Response`].
//! - [`from_middleware`] / [`from_handler`]: adapters into [`MiddlewareHandler`].

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Response, StatusCode, context::Context};

/// A boxed, `Send` future resolving to a [`Response`].
pub type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware (or returns a fallback `500` response when the chain is exhausted
/// without any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler = Arc<dyn Fn(Context, Next) -> ResponseFuture + Send + Sync + 'static>;

/// A type-erased, reference-counted endpoint handler.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::{Response, StatusCode, context::Context};
/// use rttp_cache::middleware::{Handler, ResponseFuture};
///
/// let ping: Handler = Arc::new(|_ctx: Context| -> ResponseFuture {
///     Box::pin(async { Response::new(StatusCode::OK).body("pong") })
/// });
/// ```
pub type Handler = Arc<dyn Fn(Context) -> ResponseFuture + Send + Sync + 'static>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rttp_cache::cache::{ResponseCache, ResponseCacheConfig};
/// use rttp_cache::middleware::from_middleware;
/// use rttp_cache::store::InMemoryStore;
///
/// # #[tokio::main] async fn main() {
/// let store = Arc::new(InMemoryStore::default());
/// let handler = from_middleware(Arc::new(ResponseCache::new(ResponseCacheConfig::new(store))));
/// # }
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Turns an endpoint [`Handler`] into the terminal entry of a middleware stack.
///
/// The endpoint never calls further down the chain.
pub fn from_handler(handler: Handler) -> MiddlewareHandler {
    Arc::new(move |ctx: Context, _next: Next| handler(ctx))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If no handler remains (i.e. the chain is exhausted without producing a
    /// response), a `500 Internal Server Error` response is returned as a safe
    /// fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks, and should not hold `&mut` references to shared state across
/// an `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> ResponseFuture;
}
