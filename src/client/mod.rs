//! Client subsystem.
//!
//! # Data Flow
//! ```text
//! on_http* → FIFO queue of (request, callback)
//! connect()
//!     → connector.rs (resolve → connect → TLS, per-step timeouts)
//!     → pipeline.rs (write front → read response → callback → pop)
//!     → repeat until empty, error, or batch timeout
//! ```

mod connector;
pub mod pipeline;

pub use pipeline::{Client, ClientCtx, ErrorCallback, ResponseCallback};
