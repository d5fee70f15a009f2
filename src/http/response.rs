//! HTTP response builder.
//!
//! Handlers build a [`Response`] with the fluent API below; the pipeline then
//! emits it into a [`ResponseWriter`] sink with [`Response::write_to`].

use std::io;

use bytes::Bytes;

use super::{Headers, ResponseWriter, StatusCode};

/// An HTTP response produced by a handler or replayed from the cache.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.headers().get("content-type"), Some("application/json"));
/// assert_eq!(response.content().as_ref(), br#"{"status":"ok"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the response body.
    pub fn content(&self) -> &Bytes {
        &self.body
    }

    /// Emits this response into `writer`.
    ///
    /// Headers are copied into the sink's header map, then the status is
    /// written, then the whole body is written with a single call (even when
    /// empty), so decorating sinks observe exactly one header write and one
    /// body write per response.
    ///
    /// # Errors
    ///
    /// Returns the error reported by the sink's body write.
    pub async fn write_to<W>(self, writer: &mut W) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        let Self {
            status,
            headers,
            body,
        } = self;

        writer.headers_mut().extend(headers.iter());

        writer.write_header(status);
        writer.write(&body).await?;
        Ok(())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
