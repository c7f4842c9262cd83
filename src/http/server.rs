//! HTTP server setup and registration surface.
//!
//! # Responsibilities
//! - Collect routes, WebSocket routes, hooks and channels before serving
//! - Freeze them into the shared `AppState` handed to every connection
//! - Run the accept loop, attach TLS, spawn one task per connection
//! - Stop accepting on shutdown and drain live connections
//!
//! # Design Decisions
//! - Registration needs `&mut Server`; serving consumes it, so routes
//!   cannot change while connections are live
//! - The configured worker thread count is honoured with WebSockets enabled,
//!   since the channel registry is safe to share across threads

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::error::{HandlerResult, RouteError, ServerError};
use crate::http::connection;
use crate::http::context::{HttpCtx, HttpHandler, HttpHook};
use crate::lifecycle::Shutdown;
use crate::net::{tls, BoxedStream, ConnectionTracker, Listener, ListenerError};
use crate::routing::{MethodFilter, RouteTable};
use crate::websocket::{Channels, WsCallback, WsCtx, WsRoute};

/// Callbacks that are not bound to a route.
#[derive(Default)]
pub(crate) struct Hooks {
    pub pre: Vec<HttpHook>,
    pub post: Vec<HttpHook>,
    pub error: Option<HttpHook>,
    pub ws_connect: Vec<WsCallback>,
    pub ws_disconnect: Vec<WsCallback>,
}

/// Everything a connection needs, shared read-only for the server's life.
pub(crate) struct AppState {
    pub config: ServerConfig,
    pub default_headers: HeaderMap,
    pub routes: RouteTable<HttpHandler>,
    pub ws_routes: RouteTable<WsRoute>,
    pub hooks: Hooks,
    pub channels: Arc<Channels>,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
}

/// Embeddable HTTP/WebSocket server.
pub struct Server {
    config: ServerConfig,
    routes: RouteTable<HttpHandler>,
    ws_routes: RouteTable<WsRoute>,
    hooks: Hooks,
    channels: Arc<Channels>,
    tls: Option<Arc<rustls::ServerConfig>>,
    shutdown: Shutdown,
    tracker: ConnectionTracker,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
            ws_routes: RouteTable::new(),
            hooks: Hooks::default(),
            channels: Arc::new(Channels::new()),
            tls: None,
            shutdown: Shutdown::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Adjust configuration before serving.
    pub fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    /// Register a handler for one method. Patterns are full-match regular
    /// expressions; earlier registrations win over later ones.
    pub fn on_http<F>(&mut self, pattern: &str, method: Method, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut HttpCtx) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes.register(pattern, method, Box::new(handler))
    }

    /// Register a handler for every method.
    pub fn on_http_any<F>(&mut self, pattern: &str, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut HttpCtx) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes.register(pattern, MethodFilter::All, Box::new(handler))
    }

    /// Register one handler for several methods.
    pub fn on_http_methods<F>(&mut self, pattern: &str, methods: &[Method], handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut HttpCtx) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for method in methods {
            let handler = Arc::clone(&handler);
            self.routes
                .register(pattern, method.clone(), Box::new(move |ctx: &mut HttpCtx| handler(ctx)))?;
        }
        Ok(())
    }

    /// Run before dispatch on every request.
    pub fn on_http_connect(&mut self, hook: impl Fn(&mut HttpCtx) + Send + Sync + 'static) {
        self.hooks.pre.push(Arc::new(hook));
    }

    /// Run after every exchange with the final response.
    pub fn on_http_disconnect(&mut self, hook: impl Fn(&mut HttpCtx) + Send + Sync + 'static) {
        self.hooks.post.push(Arc::new(hook));
    }

    /// Replace the default error body. The status and `error_code` are set
    /// before the callback runs.
    pub fn on_http_error(&mut self, callback: impl Fn(&mut HttpCtx) + Send + Sync + 'static) {
        self.hooks.error = Some(Arc::new(callback));
    }

    /// Register a WebSocket route. Sessions join the channel named after
    /// the matched path.
    pub fn on_websocket(&mut self, pattern: &str, route: WsRoute) -> Result<(), RouteError> {
        self.ws_routes.register(pattern, MethodFilter::All, route)
    }

    /// Run for every WebSocket session after it joined its channel.
    pub fn on_websocket_connect(&mut self, hook: impl Fn(&mut WsCtx) + Send + Sync + 'static) {
        self.hooks.ws_connect.push(Arc::new(hook));
    }

    /// Run for every WebSocket session after it left its channel.
    pub fn on_websocket_disconnect(&mut self, hook: impl Fn(&mut WsCtx) + Send + Sync + 'static) {
        self.hooks.ws_disconnect.push(Arc::new(hook));
    }

    /// Channel registry, usable before and while serving.
    pub fn channels(&self) -> &Arc<Channels> {
        &self.channels
    }

    /// HTTP routes in registration order with their method names.
    pub fn http_routes(&self) -> Vec<(String, Vec<String>)> {
        self.routes.list()
    }

    /// WebSocket route patterns in registration order.
    pub fn websocket_routes(&self) -> Vec<String> {
        self.ws_routes.list().into_iter().map(|(pattern, _)| pattern).collect()
    }

    /// Serve TLS with a caller-built config. Overrides `listener.tls`.
    pub fn tls(&mut self, config: Arc<rustls::ServerConfig>) {
        self.tls = Some(config);
    }

    /// Handle that stops the server when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Live connection counter, including WebSocket sessions.
    pub fn connection_tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Build a runtime with `listener.threads` workers and serve until
    /// shutdown.
    pub fn listen(self) -> Result<(), ServerError> {
        let threads = self.config.listener.threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .enable_all()
            .build()
            .map_err(ServerError::Runtime)?;
        runtime.block_on(self.run())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = Listener::bind(&self.config.listener).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(self, listener: Listener) -> Result<(), ServerError> {
        let tls = match (self.tls, &self.config.listener.tls) {
            (Some(config), _) => Some(config),
            (None, Some(files)) => Some(tls::from_listener_config(files)?),
            (None, None) => None,
        };
        let acceptor = tls.map(TlsAcceptor::from);

        let grace = self.config.timeouts.shutdown_grace();
        let state = Arc::new(AppState {
            default_headers: default_headers(&self.config),
            config: self.config,
            routes: self.routes,
            ws_routes: self.ws_routes,
            hooks: self.hooks,
            channels: self.channels,
            tracker: self.tracker,
            shutdown: self.shutdown,
        });

        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %local_addr,
            tls = acceptor.is_some(),
            http_routes = state.routes.len(),
            websocket_routes = state.ws_routes.len(),
            "Server accepting connections"
        );

        let mut stop = state.shutdown.subscribe();
        loop {
            let accepted = tokio::select! {
                _ = stop.recv() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let guard = state.tracker.track();
            let conn_stop = state.shutdown.subscribe();
            let state = Arc::clone(&state);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Some(stream) = attach_tls(&state, acceptor, stream, peer).await else {
                    return;
                };
                let permit = Arc::new(permit);
                connection::serve_connection(state, stream, peer, guard, permit, conn_stop).await;
            });
        }

        tracing::info!(
            active_connections = state.tracker.active_count(),
            "Stopped accepting, draining connections"
        );
        if !state.tracker.wait_for_drain(grace).await {
            tracing::warn!(
                remaining = state.tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn attach_tls(
    state: &AppState,
    acceptor: Option<TlsAcceptor>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) -> Option<BoxedStream> {
    let Some(acceptor) = acceptor else {
        return Some(Box::new(stream));
    };
    match tokio::time::timeout(state.config.timeouts.socket(), acceptor.accept(stream)).await {
        Ok(Ok(tls)) => Some(Box::new(tls)),
        Ok(Err(e)) => {
            tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed");
            None
        }
        Err(_) => {
            tracing::debug!(peer_addr = %peer, "TLS handshake timed out");
            None
        }
    }
}

fn default_headers(config: &ServerConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.http.default_headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid default header"),
        }
    }
    headers
}
