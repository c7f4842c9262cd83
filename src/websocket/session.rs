//! WebSocket upgrade and per-session loop.
//!
//! # Responsibilities
//! - Recognise upgrade requests and answer the accept handshake
//! - Match the path against the WebSocket routes
//! - Join the session to its channel, then run begin / data / end
//! - Serialize outbound frames through a single writer task
//!
//! # Data Flow
//! ```text
//! upgrade request → route match → 101 → upgraded IO
//!     → register + join channel → begin
//!     → read loop: data per text/binary message
//!     → leave + unregister → end
//! ```

use std::borrow::Cow;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::server::AppState;
use crate::net::{ConnectionId, ConnectionPermit};
use crate::observability::metrics;
use crate::routing::query::parse_query;
use crate::websocket::channel::Channels;

/// Callback for one stage of a WebSocket session.
pub type WsCallback = Arc<dyn Fn(&mut WsCtx) + Send + Sync>;

/// The begin / data / end callbacks bound to a WebSocket route.
#[derive(Clone, Default)]
pub struct WsRoute {
    begin: Option<WsCallback>,
    data: Option<WsCallback>,
    end: Option<WsCallback>,
}

impl WsRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once, after the session joined its channel.
    pub fn on_begin(mut self, f: impl Fn(&mut WsCtx) + Send + Sync + 'static) -> Self {
        self.begin = Some(Arc::new(f));
        self
    }

    /// Runs for every text or binary message.
    pub fn on_data(mut self, f: impl Fn(&mut WsCtx) + Send + Sync + 'static) -> Self {
        self.data = Some(Arc::new(f));
        self
    }

    /// Runs once, after the session left its channel.
    pub fn on_end(mut self, f: impl Fn(&mut WsCtx) + Send + Sync + 'static) -> Self {
        self.end = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for WsRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRoute")
            .field("begin", &self.begin.is_some())
            .field("data", &self.data.is_some())
            .field("end", &self.end.is_some())
            .finish()
    }
}

/// State visible to WebSocket callbacks.
pub struct WsCtx {
    /// The upgrade request, with `path` captures and query `params`.
    pub req: Request,
    /// Payload of the current message; empty outside `data`.
    pub msg: Bytes,
    /// Whether the current message arrived as a binary frame.
    pub binary: bool,
    id: ConnectionId,
    peer: SocketAddr,
    channel: String,
    channels: Arc<Channels>,
}

impl WsCtx {
    fn new(id: ConnectionId, peer: SocketAddr, req: Request, channels: Arc<Channels>) -> Self {
        let channel = req.path.first().cloned().unwrap_or_default();
        Self {
            req,
            msg: Bytes::new(),
            binary: false,
            id,
            peer,
            channel,
            channels,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Name of the channel this session joined.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Current message as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.msg)
    }

    /// Queue a text message to this session.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.channels.send(self.id, Message::text(text.into()))
    }

    /// Queue a binary message to this session.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.channels.send(self.id, Message::binary(data.into()))
    }

    /// Queue a text message to every member of this session's channel,
    /// itself included.
    pub fn broadcast(&self, text: impl Into<String>) -> usize {
        self.channels.broadcast(&self.channel, Message::text(text.into()))
    }

    /// Queue a text message to every member of another channel.
    pub fn broadcast_to(&self, channel: &str, text: impl Into<String>) -> usize {
        self.channels.broadcast(channel, Message::text(text.into()))
    }

    pub fn channel_size(&self) -> usize {
        self.channels.size(&self.channel)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.names()
    }

    pub fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }
}

/// Whether a request asks to switch to the WebSocket protocol.
pub fn is_upgrade_request<B>(req: &hyper::Request<B>) -> bool {
    let has_token = |name: header::HeaderName, token: &str| {
        req.headers()
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|v| v.trim().eq_ignore_ascii_case(token))
    };
    has_token(header::CONNECTION, "upgrade") && has_token(header::UPGRADE, "websocket")
}

/// Answer an upgrade request. On success the session runs on its own task
/// once hyper hands over the connection, holding `permit` until it ends.
pub(crate) fn accept(
    state: &Arc<AppState>,
    mut req: hyper::Request<Incoming>,
    peer: SocketAddr,
    permit: Arc<ConnectionPermit>,
) -> Response {
    let mut request = Request::from_head(&req);

    let Some(route) = state.ws_routes.find_any(request.path_only()) else {
        tracing::debug!(request_target = %request.target, "No WebSocket route matched");
        return Response::plain(404, "Error: 404");
    };

    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return Response::plain(400, "Error: 400");
    };
    if req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .is_some_and(|v| v.as_bytes() != b"13")
    {
        let mut res = Response::plain(426, "Error: 426");
        res.set_header(header::SEC_WEBSOCKET_VERSION, "13");
        return res;
    }
    let accept_key = derive_accept_key(key.as_bytes());

    request.path = route.captures;
    request.params = request.query().map(parse_query).unwrap_or_default();

    let on_upgrade = hyper::upgrade::on(&mut req);
    let state = Arc::clone(state);
    let callbacks = route.handler;
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                run_session(state, ws, callbacks, request, peer).await;
                drop(permit);
            }
            Err(e) => tracing::debug!(peer_addr = %peer, error = %e, "WebSocket upgrade failed"),
        }
    });

    let mut res = Response::new();
    res.status = StatusCode::SWITCHING_PROTOCOLS;
    res.headers.insert(header::CONNECTION, HeaderValue::from_static("upgrade"));
    res.headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    res.set_header(header::SEC_WEBSOCKET_ACCEPT, &accept_key);
    res
}

async fn run_session<S>(
    state: Arc<AppState>,
    ws: WebSocketStream<S>,
    route: Arc<WsRoute>,
    req: Request,
    peer: SocketAddr,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let guard = state.tracker.track();
    let id = guard.id();
    let (mut sink, mut stream) = ws.split();

    // One writer per session keeps frames in submission order.
    let (outbox, mut queue) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(e) = sink.send(message).await {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut ctx = WsCtx::new(id, peer, req, Arc::clone(&state.channels));
    state.channels.register(id, outbox);
    state.channels.join(&ctx.channel, id);
    metrics::record_ws_connected();
    tracing::debug!(connection_id = %id, peer_addr = %peer, channel = %ctx.channel, "WebSocket session started");

    for hook in &state.hooks.ws_connect {
        run_callback(hook, &mut ctx);
    }
    if let Some(begin) = &route.begin {
        run_callback(begin, &mut ctx);
    }

    let idle = state.config.timeouts.websocket_idle();
    let mut stop = state.shutdown.subscribe();
    loop {
        let read = async {
            match idle {
                Some(limit) => tokio::time::timeout(limit, stream.next()).await.ok(),
                None => Some(stream.next().await),
            }
        };
        let next = tokio::select! {
            _ = stop.recv() => {
                tracing::debug!(connection_id = %id, "Closing WebSocket for shutdown");
                break;
            }
            next = read => match next {
                Some(next) => next,
                None => {
                    tracing::debug!(connection_id = %id, "WebSocket idle timeout");
                    break;
                }
            },
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                ctx.msg = Bytes::copy_from_slice(text.as_str().as_bytes());
                ctx.binary = false;
            }
            Some(Ok(Message::Binary(data))) => {
                ctx.msg = data;
                ctx.binary = true;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket read failed");
                break;
            }
        }

        if let Some(data) = &route.data {
            run_callback(data, &mut ctx);
        }
        ctx.msg = Bytes::new();
        ctx.binary = false;
    }

    // Leave before `end` so no broadcast can target this session afterwards.
    state.channels.leave(&ctx.channel, id);
    state.channels.unregister(id);

    if let Some(end) = &route.end {
        run_callback(end, &mut ctx);
    }
    for hook in &state.hooks.ws_disconnect {
        run_callback(hook, &mut ctx);
    }

    let _ = writer.await;
    metrics::record_ws_disconnected();
    tracing::debug!(connection_id = %id, "WebSocket session closed");
}

fn run_callback(callback: &WsCallback, ctx: &mut WsCtx) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))).is_err() {
        tracing::warn!(connection_id = %ctx.id, channel = %ctx.channel, "WebSocket callback panicked");
    }
}
