//! Response representation and finalization.
//!
//! # Responsibilities
//! - Hold status, headers and the buffered body
//! - Apply default headers the handler did not set
//! - Derive `content-length` and the keep-alive marker before writing
//!
//! # Design Decisions
//! - Keep-alive mirrors the request unless the handler asked to close
//! - HEAD responses keep an explicit `content-length` and send no body

use std::borrow::Cow;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use hyper::{StatusCode, Version};

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain-text response with the given status.
    pub fn plain(code: u16, body: impl Into<Bytes>) -> Self {
        let mut res = Self::new();
        res.set_status(code);
        res.set_header(header::CONTENT_TYPE, "text/plain");
        res.body = body.into();
        res
    }

    /// Build from a hyper response head and an already collected body.
    pub fn from_parts(parts: hyper::http::response::Parts, body: Bytes) -> Self {
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            body,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Set the status. Codes outside 100..=999 become 500.
    pub fn set_status(&mut self, code: u16) {
        self.status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: impl hyper::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set a header. Values that are not legal header text are ignored.
    pub fn set_header<K: IntoHeaderName>(&mut self, name: K, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::warn!(value, "Ignoring invalid header value"),
        }
    }

    /// Whether the response allows the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        !self
            .header(header::CONNECTION)
            .is_some_and(|c| c.eq_ignore_ascii_case("close"))
    }

    /// Ask for the connection to be closed after this response.
    pub fn close(&mut self) {
        self.headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }

    /// Prepare the response for writing.
    ///
    /// `version` and keep-alive mirror the request, and defaults fill headers
    /// the handler left unset. `content-length` is derived from the body
    /// unless the handler set one; an explicit value is written as is, so it
    /// must match the body (on HEAD it describes the omitted body).
    pub fn finalize(&mut self, defaults: &HeaderMap, version: Version, keep_alive: bool, head: bool) {
        self.version = version;

        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }

        if !keep_alive {
            self.close();
        }

        if self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            self.headers.remove(header::CONTENT_LENGTH);
            self.body = Bytes::new();
            return;
        }

        if !self.headers.contains_key(header::CONTENT_LENGTH) {
            self.headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
        if head {
            self.body = Bytes::new();
        }
    }

    /// Convert into a hyper response.
    pub fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let mut res = hyper::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}
