//! Request representation shared by the server and the client.
//!
//! # Responsibilities
//! - Hold method, target, headers and the buffered body
//! - Carry the fields dispatch derives: `path` captures and query `params`
//! - Convert to and from hyper's request types
//!
//! # Design Decisions
//! - Bodies are fully buffered; handlers see the whole payload
//! - `params` is a list, so repeated keys are all kept

use std::borrow::Cow;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use hyper::{Method, Version};

use crate::routing::query::split_target;

/// An HTTP request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: Method,
    /// Raw request target, including any query string.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Index 0 is the whole matched path, 1..n the route's capture groups.
    pub path: Vec<String>,
    /// Query parameters, decoded. Keys may repeat.
    pub params: Vec<(String, String)>,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            ..Self::default()
        }
    }

    /// Build from a hyper request head and an already collected body.
    pub fn from_parts(parts: hyper::http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            target: target_of(&parts.uri),
            version: parts.version,
            headers: parts.headers,
            body,
            path: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Build from a hyper request without touching its body.
    pub fn from_head<B>(req: &hyper::Request<B>) -> Self {
        Self {
            method: req.method().clone(),
            target: target_of(req.uri()),
            version: req.version(),
            headers: req.headers().clone(),
            ..Self::default()
        }
    }

    /// Target without the query string.
    pub fn path_only(&self) -> &str {
        split_target(&self.target).0
    }

    /// Raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        split_target(&self.target).1
    }

    /// Header value as text.
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

    /// Builder-style header setter.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Builder-style body setter.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder-style query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// First value for a query key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for a query key, in order of appearance.
    pub fn params_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the peer expects the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header(header::CONNECTION).map(str::to_ascii_lowercase);
        match self.version {
            Version::HTTP_10 => connection.is_some_and(|c| c.contains("keep-alive")),
            _ => !connection.is_some_and(|c| c.contains("close")),
        }
    }

    /// Set or clear the `Connection: close` marker.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        if keep_alive {
            if self.header(header::CONNECTION).is_some_and(|c| c.eq_ignore_ascii_case("close")) {
                self.headers.remove(header::CONNECTION);
            }
        } else {
            self.headers
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Convert into a hyper request for sending on a client connection.
    pub fn to_hyper(&self) -> Result<hyper::Request<Full<Bytes>>, hyper::http::Error> {
        let mut builder = hyper::Request::builder()
            .method(self.method.clone())
            .uri(self.target.as_str())
            .version(Version::HTTP_11);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
        }
        builder.body(Full::new(self.body.clone()))
    }
}

fn target_of(uri: &hyper::Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_split() {
        let req = Request::new(Method::GET, "/search?q=rust&page=2");
        assert_eq!(req.path_only(), "/search");
        assert_eq!(req.query(), Some("q=rust&page=2"));
    }

    #[test]
    fn keep_alive_by_version() {
        let mut req = Request::new(Method::GET, "/");
        assert!(req.keep_alive());

        req.set_keep_alive(false);
        assert!(!req.keep_alive());
        req.set_keep_alive(true);
        assert!(req.keep_alive());

        req.version = Version::HTTP_10;
        assert!(!req.keep_alive());
        req.set_header(header::CONNECTION, "keep-alive");
        assert!(req.keep_alive());
    }

    #[test]
    fn repeated_params() {
        let req = Request::new(Method::GET, "/")
            .with_param("a", "1")
            .with_param("a", "2")
            .with_param("b", "");
        assert_eq!(req.param("a"), Some("1"));
        assert_eq!(req.params_all("a").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(req.param("b"), Some(""));
        assert_eq!(req.param("c"), None);
    }

    #[test]
    fn converts_to_hyper() {
        let req = Request::new(Method::POST, "/post")
            .with_header(header::CONTENT_TYPE, "text/plain")
            .with_body("hello");
        let hyper_req = req.to_hyper().unwrap();
        assert_eq!(hyper_req.method(), Method::POST);
        assert_eq!(hyper_req.uri().path(), "/post");
        assert_eq!(hyper_req.headers()[header::CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn invalid_header_value_is_ignored() {
        let mut req = Request::new(Method::GET, "/");
        req.set_header("x-test", "bad\nvalue");
        assert!(req.header("x-test").is_none());
    }
}
