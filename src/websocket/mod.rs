//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP connection sees an upgrade request
//!     → session.rs (route match, handshake, session loop)
//!     → channel.rs (join channel, fan-out on broadcast)
//!     → per-session writer task (one frame in flight, FIFO)
//! ```
//!
//! # Design Decisions
//! - Channels hold connection ids; sessions own their sockets
//! - Leaving the channel happens before the `end` callback
//! - The registry is shared across worker threads

pub mod channel;
pub mod session;

pub use channel::Channels;
pub use session::{is_upgrade_request, WsCallback, WsCtx, WsRoute};
