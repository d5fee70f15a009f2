//! Response sinks.
//!
//! A [`ResponseWriter`] receives a response as a sequence of calls: header map
//! edits, one status write, then body writes. Decorators such as the response
//! cache's capturing writer wrap another sink and observe the same calls.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;

use super::{Headers, Response, StatusCode};

/// The outbound side of a request: where status, headers and body go.
///
/// Writing the body before any status implies `200 OK`, and only the first
/// status write counts.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Returns the headers that will be sent with the response.
    fn headers(&self) -> &Headers;

    /// Returns the headers for modification before the status is written.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Records the response status.
    fn write_header(&mut self, status: StatusCode);

    /// Writes a chunk of the body, returning how many bytes were accepted.
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// An in-memory sink that materializes everything written to it as a [`Response`].
///
/// # Examples
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// use rttp_cache::http::{ResponseBuffer, ResponseWriter, StatusCode};
///
/// let mut sink = ResponseBuffer::new();
/// sink.headers_mut().insert("Content-Type", "text/plain");
/// sink.write(b"pong").await?;
///
/// let response = sink.into_response();
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.content().as_ref(), b"pong");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
}

impl ResponseBuffer {
    /// Creates an empty sink with no status written yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status written so far, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Returns the body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Converts the sink into a response. A sink that never saw a status
    /// produces `200 OK`.
    pub fn into_response(self) -> Response {
        let mut response =
            Response::new(self.status.unwrap_or_default()).body_bytes(self.body.freeze());
        *response.headers_mut() = self.headers;
        response
    }
}

#[async_trait]
impl ResponseWriter for ResponseBuffer {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}
