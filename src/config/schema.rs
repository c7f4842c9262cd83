//! Configuration schema definitions.
//!
//! This module defines the configuration structures for the server and the
//! client. All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (address, port, threads, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request serving settings.
    pub http: HttpConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen address (e.g., "127.0.0.1").
    pub address: String,

    /// Listen port. 0 binds an ephemeral port.
    pub port: u16,

    /// Worker threads driving the event loop.
    pub threads: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl ListenerConfig {
    /// `address:port` as a single string.
    pub fn bind_address(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            threads: 1,
            max_connections: 10_000,
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one read-dispatch-respond cycle, in seconds.
    pub socket_secs: u64,

    /// Idle limit for WebSocket sessions in seconds (0 = no limit).
    pub websocket_idle_secs: u64,

    /// How long shutdown waits for live connections to drain.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn socket(&self) -> Duration {
        Duration::from_secs(self.socket_secs)
    }

    pub fn websocket_idle(&self) -> Option<Duration> {
        (self.websocket_idle_secs > 0).then(|| Duration::from_secs(self.websocket_idle_secs))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            socket_secs: 15,
            websocket_idle_secs: 0,
            shutdown_grace_secs: 5,
        }
    }
}

/// Request serving configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Directory static files are served from.
    pub public_dir: Option<String>,

    /// Serve static files when no dynamic route matches.
    pub static_enabled: bool,

    /// Dispatch to registered routes.
    pub dynamic_enabled: bool,

    /// Accept WebSocket upgrade requests.
    pub websocket_enabled: bool,

    /// Headers added to every response that does not set them itself.
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("server".to_string(), "carillon".to_string());
        Self {
            public_dir: None,
            static_enabled: true,
            dynamic_enabled: true,
            websocket_enabled: true,
            default_headers,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Configuration for the pipelining client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote host name or address.
    pub address: String,

    /// Remote port.
    pub port: u16,

    /// Wrap the connection in TLS.
    pub tls: bool,

    /// Default `User-Agent` for requests that do not set one.
    pub user_agent: String,

    /// Per-step deadline (resolve, connect, handshake, each exchange).
    pub step_timeout_ms: u64,

    /// Upper bound for draining the whole queue.
    pub batch_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            tls: false,
            user_agent: concat!("carillon/", env!("CARGO_PKG_VERSION")).to_string(),
            step_timeout_ms: 10_000,
            batch_timeout_ms: None,
        }
    }
}
