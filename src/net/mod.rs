//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (identity, lifecycle tracking)
//!     → deadline.rs (per-connection deadline timer)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod deadline;
pub mod listener;
pub mod tls;

use tokio::io::{AsyncRead, AsyncWrite};

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, Phase};
pub use deadline::Deadline;
pub use listener::{ConnectionPermit, Listener, ListenerError};

/// A plain or TLS-wrapped byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased connection stream.
pub type BoxedStream = Box<dyn Stream>;
