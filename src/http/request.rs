//! Request head parsing on top of [`httparse`].

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request head is incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line has no {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.x request.
///
/// The request target is kept exactly as sent. The response cache keys on it
/// through [`request_uri`](Self::request_uri), so two requests share a cache
/// entry only when their path and query match byte for byte, whatever the
/// method.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.request_uri(), "/hello?name=world");
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    headers: Headers,
    body: Bytes,
}

impl Request {
    const MAX_HEADERS: usize = 64;

    /// Parses a request head from `buf`.
    ///
    /// Returns the request and the offset where the body starts. Everything
    /// after the head is taken as the body; framing is the caller's concern.
    /// Header values that are not UTF-8 are dropped.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut head = httparse::Request::new(&mut slots);

        let httparse::Status::Complete(body_at) = head.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = head
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
            .unwrap_or_else(|never| match never {});
        let target = head
            .path
            .ok_or(RequestError::MissingField { field: "target" })?
            .to_owned();

        let headers = head
            .headers
            .iter()
            .filter_map(|h| Some((h.name, std::str::from_utf8(h.value).ok()?)))
            .collect();

        let request = Self {
            method,
            target,
            headers,
            body: Bytes::copy_from_slice(&buf[body_at..]),
        };
        Ok((request, body_at))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target up to the first `?`.
    pub fn path(&self) -> &str {
        self.split_target().0
    }

    /// The raw query after the first `?`, possibly empty.
    pub fn query_string(&self) -> Option<&str> {
        self.split_target().1
    }

    /// Path plus `?query` as sent on the request line. An empty query (`/a?`)
    /// stays distinct from none (`/a`).
    pub fn request_uri(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn split_target(&self) -> (&str, Option<&str>) {
        match self.target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (&self.target, None),
        }
    }
}
