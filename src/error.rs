//! Error types shared across the engine.
//!
//! Transport failures (`ClientError`, the I/O side of `ServerError`) tear a
//! connection down. `HandlerError` is not a transport failure: the HTTP
//! engine always turns it into a well-formed error response.

use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::net::listener::ListenerError;

/// Result type returned by route handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Outcome a handler reports instead of a normal return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Abort response construction and answer with this status code.
    #[error("handler signaled status {0}")]
    Status(u16),

    /// Unexpected fault; answered with 500.
    #[error("handler fault: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Status code the error path answers with.
    pub fn status(&self) -> u16 {
        match self {
            HandlerError::Status(code) => *code,
            HandlerError::Internal(_) => 500,
        }
    }
}

impl From<u16> for HandlerError {
    fn from(code: u16) -> Self {
        HandlerError::Status(code)
    }
}

/// A route pattern that could not be compiled.
#[derive(Debug, Error)]
#[error("invalid route pattern `{pattern}`: {source}")]
pub struct RouteError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// Fatal server startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("failed to build runtime: {0}")]
    Runtime(std::io::Error),
}

/// Errors reported through the client's error callback.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("failed to connect: {0}")]
    Connect(std::io::Error),

    #[error("tls handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("invalid server name `{0}`")]
    InvalidServerName(String),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("batch deadline elapsed")]
    BatchTimeout,
}

impl ClientError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Resolve { .. } | ClientError::NoAddress(_) => "resolve",
            ClientError::Connect(_) => "connect",
            ClientError::Handshake(_) | ClientError::InvalidServerName(_) => "handshake",
            ClientError::Http(_) => "http",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::Timeout(_) => "timeout",
            ClientError::BatchTimeout => "batch_timeout",
        }
    }
}
