//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request target ("/path?query")
//!     → query.rs (split path / query, decode params)
//!     → router.rs (ordered route lookup)
//!     → matcher.rs (full-string regex match, captures)
//!     → Return: handler + captures, or NoMatch
//! ```
//!
//! # Design Decisions
//! - Routes registered before serving, immutable at runtime
//! - Deterministic: registration order decides which route wins
//! - Same table type backs HTTP routes and WebSocket routes

pub mod matcher;
pub mod query;
pub mod router;

pub use matcher::RoutePattern;
pub use router::{MethodFilter, RouteMatch, RouteTable};
