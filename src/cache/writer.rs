use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::BytesMut;
use tracing::{trace, warn};

use super::CapturedResponse;
use crate::http::{Headers, ResponseWriter, StatusCode};
use crate::store::{Expiration, Store, StoreExt};

const LAST_MODIFIED: &str = "Last-Modified";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    HeaderWritten(StatusCode),
    BodyCaptured(StatusCode),
}

/// A [`ResponseWriter`] that forwards everything to an inner sink and records
/// the response in a store as it goes.
///
/// Each successful body write persists the status, a snapshot of the inner
/// sink's headers and all body bytes seen so far under one key, so the entry
/// always mirrors what the client has received. Store failures are logged and
/// never reach the caller.
pub struct CachedWriter<W> {
    inner: W,
    store: Arc<dyn Store>,
    key: String,
    expire: Expiration,
    state: State,
    body: BytesMut,
}

impl<W: ResponseWriter> CachedWriter<W> {
    pub fn new(inner: W, store: Arc<dyn Store>, key: impl Into<String>, expire: Expiration) -> Self {
        Self {
            inner,
            store,
            key: key.into(),
            expire,
            state: State::Pending,
            body: BytesMut::new(),
        }
    }

    /// The status recorded so far.
    pub fn status(&self) -> Option<StatusCode> {
        match self.state {
            State::Pending => None,
            State::HeaderWritten(status) | State::BodyCaptured(status) => Some(status),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn snapshot(&self, status: StatusCode) -> CapturedResponse {
        let mut header = self.inner.headers().clone();
        if !header.contains(LAST_MODIFIED) {
            header.insert(LAST_MODIFIED, httpdate::fmt_http_date(SystemTime::now()));
        }
        CapturedResponse {
            status,
            header,
            data: self.body.clone().freeze(),
        }
    }
}

async fn persist(store: &dyn Store, key: &str, captured: &CapturedResponse, expire: Expiration) {
    match store.set_value(key, captured, expire).await {
        Ok(()) => trace!(key, bytes = captured.data.len(), "response captured"),
        Err(err) => warn!(key, error = %err, "failed to store captured response"),
    }
}

#[async_trait]
impl<W: ResponseWriter> ResponseWriter for CachedWriter<W> {
    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.state == State::Pending {
            self.state = State::HeaderWritten(status);
            self.inner.write_header(status);
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state == State::Pending {
            self.write_header(StatusCode::OK);
        }

        let written = self.inner.write(data).await?;
        self.body.extend_from_slice(&data[..written.min(data.len())]);

        let status = match self.state {
            State::HeaderWritten(status) | State::BodyCaptured(status) => status,
            State::Pending => StatusCode::OK,
        };
        self.state = State::BodyCaptured(status);

        let captured = self.snapshot(status);
        persist(self.store.as_ref(), &self.key, &captured, self.expire).await;

        Ok(written)
    }
}
