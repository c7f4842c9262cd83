//! Carillon: an embeddable HTTP/1.1 + WebSocket server and a pipelining
//! HTTP client.
//!
//! Applications register handlers; the engine owns accept, framing,
//! dispatch, static-file fallback, WebSocket upgrade with channel broadcast,
//! and sequential request pipelining for the client role.
//!
//! ```no_run
//! use carillon::{Method, Server, ServerConfig};
//!
//! let mut server = Server::new(ServerConfig::default());
//! server
//!     .on_http("/hello/(\\w+)", Method::GET, |ctx| {
//!         let name = ctx.req.path[1].clone();
//!         ctx.res.set_body(format!("hello {}", name));
//!         Ok(())
//!     })
//!     .unwrap();
//! server.listen().unwrap();
//! ```

// Core subsystems
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;
pub mod websocket;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use client::{Client, ClientCtx};
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, HandlerError, HandlerResult, RouteError, ServerError};
pub use http::{HttpCtx, Request, Response, Server};
pub use hyper::{header, Method, StatusCode};
pub use lifecycle::Shutdown;
pub use net::Listener;
pub use websocket::{Channels, WsCtx, WsRoute};
