//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, shared state, TLS)
//!     → connection.rs (per-socket engine, deadline, keep-alive)
//!     → request.rs (buffered request, captures, params)
//!     → [routing decides the handler]
//!     → static_files.rs (fallback for GET/HEAD)
//!     → response.rs (defaults, content-length, keep-alive)
//!     → Send to client
//! ```

pub(crate) mod connection;
pub mod context;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use context::{HttpCtx, HttpHandler, HttpHook};
pub use request::Request;
pub use response::Response;
pub use server::Server;
