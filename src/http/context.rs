//! Per-request context handed to route handlers and hooks.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::HandlerResult;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::websocket::Channels;

/// Route handler. Returns `Err(HandlerError::Status(code))` to answer with
/// an error response instead of the response it was building.
pub type HttpHandler = Box<dyn Fn(&mut HttpCtx) -> HandlerResult + Send + Sync>;

/// Hook run around every request, and the custom error callback.
pub type HttpHook = Arc<dyn Fn(&mut HttpCtx) + Send + Sync>;

/// One request/response exchange.
pub struct HttpCtx {
    pub req: Request,
    pub res: Response,
    /// Status that sent the exchange down the error path, if any.
    pub error_code: Option<u16>,
    peer: SocketAddr,
    channels: Arc<Channels>,
}

impl HttpCtx {
    pub(crate) fn new(req: Request, peer: SocketAddr, channels: Arc<Channels>) -> Self {
        Self {
            req,
            res: Response::new(),
            error_code: None,
            peer,
            channels,
        }
    }

    /// Remote address of the connection.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Server-wide WebSocket channel registry, for pushing to sessions from
    /// an HTTP handler.
    pub fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }
}

impl std::fmt::Debug for HttpCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCtx")
            .field("req", &self.req)
            .field("res", &self.res)
            .field("error_code", &self.error_code)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
