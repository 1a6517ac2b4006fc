//! Request references and the response a resource writes into.
//!
//! A [`Response`] is split in two: a [`ResponseHead`] (status and headers)
//! shared behind a lock so authorization callbacks can mutate it while the
//! pipeline holds the body, and a body buffer owned by the response. The
//! resource opens the body with [`Response::open_body_stream`] and hands the
//! stream to the pipeline; closing it is the response's job, not theirs.

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The target of a request: path plus query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference(Uri);

impl Reference {
    pub fn new(uri: Uri) -> Self {
        Self(uri)
    }

    pub fn uri(&self) -> &Uri {
        &self.0
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.0.query()
    }

    /// First value of a query parameter, form-urlencoded decoded.
    pub fn first_query_value(&self, name: &str) -> Option<String> {
        let query = self.0.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

/// Cloneable handle to a response head.
///
/// All clones see the same status and headers.
#[derive(Debug, Clone, Default)]
pub struct SharedHead(Arc<Mutex<ResponseHead>>);

impl SharedHead {
    fn lock(&self) -> MutexGuard<'_, ResponseHead> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> StatusCode {
        self.lock().status
    }

    pub fn set_status(&self, status: StatusCode) {
        self.lock().status = status;
    }

    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.lock().headers.get(name).cloned()
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    pub fn remove_header(&self, name: &HeaderName) {
        self.lock().headers.remove(name);
    }

    /// Copy of the current head.
    pub fn snapshot(&self) -> ResponseHead {
        self.lock().clone()
    }
}

/// A response under construction.
#[derive(Debug, Default)]
pub struct Response {
    head: SharedHead,
    body: Vec<u8>,
    body_opened: bool,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the head, for collaborators that mutate status or headers.
    pub fn head(&self) -> SharedHead {
        self.head.clone()
    }

    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    pub fn set_status(&self, status: StatusCode) {
        self.head.set_status(status);
    }

    pub fn header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.head.header(name)
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.head.set_header(name, value);
    }

    /// Open the body for writing. The returned stream must not be closed by
    /// the caller; the bytes stay with the response.
    pub fn open_body_stream(&mut self) -> BodyStream<'_> {
        self.body_opened = true;
        BodyStream {
            buffer: &mut self.body,
        }
    }

    pub fn body_opened(&self) -> bool {
        self.body_opened
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into an axum response.
    pub fn into_http(self) -> axum::response::Response {
        let head = self.head.snapshot();
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}

/// Write half of a response body.
#[derive(Debug)]
pub struct BodyStream<'a> {
    buffer: &'a mut Vec<u8>,
}

impl Write for BodyStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Plain-text response with the given status.
pub fn plain_text(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    let mut response = axum::response::Response::new(Body::from(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
