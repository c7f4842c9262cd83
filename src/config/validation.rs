//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (threads > 0, timeouts > 0, address parses)
//! - Check default headers are legal HTTP header names and values
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::IpAddr;

use hyper::header::{HeaderName, HeaderValue};

use crate::config::schema::{ClientConfig, ServerConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a server configuration.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.address",
            format!("`{}` is not an IP address", config.listener.address),
        ));
    }
    if config.listener.threads == 0 {
        errors.push(ValidationError::new("listener.threads", "must be at least 1"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
    }
    if config.timeouts.socket_secs == 0 {
        errors.push(ValidationError::new("timeouts.socket_secs", "must be greater than 0"));
    }

    for (name, value) in &config.http.default_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "http.default_headers",
                format!("invalid header name `{}`", name),
            ));
        }
        if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new(
                "http.default_headers",
                format!("invalid value for header `{}`", name),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a client configuration.
pub fn validate_client_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.address.is_empty() {
        errors.push(ValidationError::new("address", "must not be empty"));
    }
    if config.port == 0 {
        errors.push(ValidationError::new("port", "must not be 0"));
    }
    if config.step_timeout_ms == 0 {
        errors.push(ValidationError::new("step_timeout_ms", "must be greater than 0"));
    }
    if HeaderValue::from_str(&config.user_agent).is_err() {
        errors.push(ValidationError::new("user_agent", "not a valid header value"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
