//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig / ClientConfig (validated, immutable)
//!     → shared via Arc to every connection
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts accepting
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_client_config, load_config, ConfigError};
pub use schema::{
    ClientConfig, HttpConfig, ListenerConfig, ObservabilityConfig, ServerConfig, TimeoutConfig,
    TlsConfig,
};
