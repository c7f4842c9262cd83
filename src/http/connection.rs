//! Per-connection HTTP engine.
//!
//! # Responsibilities
//! - Drive one socket through read → dispatch → respond → keep-alive
//! - Guard every cycle with the connection's deadline timer
//! - Turn handler errors, panics and misses into well-formed responses
//! - Hand upgrade requests to the WebSocket session engine
//!
//! # Data Flow
//! ```text
//! request head + body (hyper framing)
//!     → pre hooks
//!     → target check (leading '/', no "..")
//!     → dynamic dispatch ─┐
//!     → static fallback   ├─ error path on miss / signaled code
//!     → finalize (defaults, content-length, keep-alive)
//!     → post hooks → write
//! ```
//!
//! # Design Decisions
//! - One task per connection, so its callbacks never run concurrently
//! - Deadline expiry drops the connection future, closing the socket
//! - Transport errors end the connection quietly; there is no retry

use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Method;
use hyper_util::rt::TokioIo;
use crate::error::{HandlerError, HandlerResult};
use crate::http::context::{HttpCtx, HttpHandler, HttpHook};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::server::AppState;
use crate::http::static_files::{self, StaticError};
use crate::lifecycle::ShutdownSignal;
use crate::net::{BoxedStream, ConnectionGuard, ConnectionId, ConnectionPermit, Deadline, Phase};
use crate::observability::metrics;
use crate::routing::query::parse_query;
use crate::websocket::session;

/// Serve HTTP on one accepted stream until the peer closes, the deadline
/// fires, or shutdown completes the in-flight exchange.
///
/// The listener slot in `permit` outlives this call when the socket is
/// upgraded: the WebSocket session keeps a clone until it ends.
pub(crate) async fn serve_connection(
    state: Arc<AppState>,
    stream: BoxedStream,
    peer: SocketAddr,
    guard: ConnectionGuard,
    permit: Arc<ConnectionPermit>,
    mut shutdown: ShutdownSignal,
) {
    let id = guard.id();
    let deadline = Deadline::new(state.config.timeouts.socket());
    tracing::debug!(connection_id = %id, peer_addr = %peer, "HTTP connection opened");

    let service = {
        let state = Arc::clone(&state);
        let deadline = deadline.clone();
        service_fn(move |req| {
            let state = Arc::clone(&state);
            let deadline = deadline.clone();
            let permit = Arc::clone(&permit);
            async move {
                deadline.rearm();
                let res = handle(&state, req, id, peer, permit).await;
                deadline.rearm();
                Ok::<_, Infallible>(res)
            }
        })
    };

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %id, error = %e, "HTTP connection error");
                }
                break;
            }
            _ = deadline.expired() => {
                tracing::debug!(connection_id = %id, "HTTP connection deadline elapsed");
                break;
            }
            _ = shutdown.recv(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    tracing::debug!(connection_id = %id, phase = %Phase::Closing, "HTTP connection closed");
    drop(guard);
}

/// One request on the wire to one response on the wire.
async fn handle(
    state: &Arc<AppState>,
    req: hyper::Request<Incoming>,
    id: ConnectionId,
    peer: SocketAddr,
    permit: Arc<ConnectionPermit>,
) -> hyper::Response<Full<Bytes>> {
    let started = Instant::now();

    if state.config.http.websocket_enabled && session::is_upgrade_request(&req) {
        let version = req.version();
        let mut res = session::accept(state, req, peer, permit);
        res.finalize(&state.default_headers, version, true, false);
        return res.into_hyper();
    }

    tracing::trace!(connection_id = %id, phase = %Phase::Reading, "Reading request body");
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(connection_id = %id, error = %e, "Failed to read request body");
            let mut res = Response::plain(400, "Error: 400");
            res.finalize(&state.default_headers, parts.version, false, false);
            return res.into_hyper();
        }
    };

    let ctx = process(state, Request::from_parts(parts, body), id, peer).await;

    metrics::record_request(ctx.req.method.as_str(), ctx.res.status_code(), started);
    tracing::debug!(
        connection_id = %id,
        method = %ctx.req.method,
        request_target = %ctx.req.target,
        status = ctx.res.status_code(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request served"
    );

    ctx.res.into_hyper()
}

/// Build the response for one request.
pub(crate) async fn process(state: &AppState, req: Request, id: ConnectionId, peer: SocketAddr) -> HttpCtx {
    let version = req.version;
    let keep_alive = req.keep_alive();
    let head = req.is_head();
    let mut ctx = HttpCtx::new(req, peer, Arc::clone(&state.channels));

    run_hooks(&state.hooks.pre, &mut ctx);

    if let Err(code) = resolve(state, &mut ctx, id).await {
        error_response(state, &mut ctx, code);
    }

    tracing::trace!(connection_id = %id, phase = %Phase::Responding, "Finalizing response");
    ctx.res.finalize(&state.default_headers, version, keep_alive, head);

    run_hooks(&state.hooks.post, &mut ctx);
    ctx
}

/// Dynamic dispatch, then static fallback. `Err` carries the status for
/// the error path.
async fn resolve(state: &AppState, ctx: &mut HttpCtx, id: ConnectionId) -> Result<(), u16> {
    let path = ctx.req.path_only().to_string();
    if !path.starts_with('/') || ctx.req.target.contains("..") {
        return Err(404);
    }

    let http = &state.config.http;
    if http.dynamic_enabled {
        tracing::trace!(connection_id = %id, phase = %Phase::Dispatching, path = %path, "Dispatching");
        if let Some(route) = state.routes.find(&ctx.req.method, &path) {
            ctx.req.path = route.captures;
            ctx.req.params = ctx.req.query().map(parse_query).unwrap_or_default();
            return invoke(&route.handler, ctx).map_err(|e| {
                if let HandlerError::Internal(reason) = &e {
                    tracing::warn!(connection_id = %id, pattern = %route.pattern, reason = %reason, "Handler failed");
                }
                e.status()
            });
        }
    }

    let static_method = ctx.req.method == Method::GET || ctx.req.method == Method::HEAD;
    if let (true, true, Some(root)) = (http.static_enabled, static_method, &http.public_dir) {
        tracing::trace!(connection_id = %id, phase = %Phase::StaticFallback, path = %path, "Static lookup");
        return match static_files::serve(Path::new(root), &path, ctx.req.is_head()).await {
            Ok(res) => {
                ctx.res = res;
                Ok(())
            }
            Err(StaticError::NotFound) => Err(404),
            Err(e) => {
                tracing::warn!(connection_id = %id, path = %path, error = %e, "Static file read failed");
                Err(500)
            }
        };
    }

    Err(404)
}

/// Run a handler, turning a panic into an internal error.
fn invoke(handler: &HttpHandler, ctx: &mut HttpCtx) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Internal(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn error_response(state: &AppState, ctx: &mut HttpCtx, code: u16) {
    ctx.error_code = Some(code);
    ctx.res.set_status(code);
    // A length set before the failure describes a body that is discarded.
    ctx.res.headers.remove(header::CONTENT_LENGTH);

    if let Some(callback) = &state.hooks.error {
        if panic::catch_unwind(AssertUnwindSafe(|| callback(ctx))).is_ok() {
            return;
        }
        tracing::warn!(status = code, "Error callback panicked");
        ctx.res.set_status(500);
    }

    let status = ctx.res.status_code();
    ctx.res.set_header(header::CONTENT_TYPE, "text/plain");
    ctx.res.set_body(format!("Error: {}", status));
}

fn run_hooks(hooks: &[HttpHook], ctx: &mut HttpCtx) {
    for hook in hooks {
        if panic::catch_unwind(AssertUnwindSafe(|| hook(ctx))).is_err() {
            tracing::warn!(target_path = %ctx.req.target, "HTTP hook panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::http::server::Hooks;
    use crate::lifecycle::Shutdown;
    use crate::net::ConnectionTracker;
    use crate::routing::{MethodFilter, RouteTable};
    use crate::websocket::Channels;
    use hyper::header::{HeaderMap, HeaderValue};

    fn state(routes: RouteTable<HttpHandler>, hooks: Hooks) -> AppState {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::SERVER, HeaderValue::from_static("carillon"));
        AppState {
            config: ServerConfig::default(),
            default_headers,
            routes,
            ws_routes: RouteTable::new(),
            hooks,
            channels: Arc::new(Channels::new()),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        }
    }

    fn route<F>(table: &mut RouteTable<HttpHandler>, pattern: &str, handler: F)
    where
        F: Fn(&mut HttpCtx) -> HandlerResult + Send + Sync + 'static,
    {
        table.register(pattern, MethodFilter::All, Box::new(handler)).unwrap();
    }

    async fn run(state: &AppState, target: &str) -> HttpCtx {
        let req = Request::new(Method::GET, target);
        process(state, req, ConnectionId::new(), "127.0.0.1:9".parse().unwrap()).await
    }

    #[tokio::test]
    async fn captures_and_params_reach_handler() {
        let mut routes = RouteTable::new();
        route(&mut routes, "/user/([a-z]+)", |ctx| {
            let body = format!("{}:{}", ctx.req.path[1], ctx.req.param("tab").unwrap_or(""));
            ctx.res.set_body(body);
            Ok(())
        });
        let state = state(routes, Hooks::default());

        let ctx = run(&state, "/user/ada?tab=posts").await;
        assert_eq!(ctx.res.status_code(), 200);
        assert_eq!(ctx.res.text(), "ada:posts");
        assert_eq!(ctx.req.path[0], "/user/ada");
        assert_eq!(ctx.res.header(header::SERVER), Some("carillon"));
    }

    #[tokio::test]
    async fn signaled_status_gets_default_body() {
        let mut routes = RouteTable::new();
        route(&mut routes, "/missing", |_| Err(HandlerError::Status(404)));
        let state = state(routes, Hooks::default());

        let ctx = run(&state, "/missing").await;
        assert_eq!(ctx.res.status_code(), 404);
        assert!(ctx.res.text().contains("404"));
        assert_eq!(ctx.error_code, Some(404));
    }

    #[tokio::test]
    async fn panic_becomes_500() {
        let mut routes = RouteTable::new();
        route(&mut routes, "/boom", |_| panic!("boom"));
        let state = state(routes, Hooks::default());

        let ctx = run(&state, "/boom").await;
        assert_eq!(ctx.res.status_code(), 500);
        assert_eq!(ctx.res.text(), "Error: 500");
    }

    #[tokio::test]
    async fn custom_error_callback_owns_body() {
        let error: HttpHook = Arc::new(|ctx: &mut HttpCtx| {
            let code = ctx.error_code.unwrap_or(0);
            ctx.res.set_body(format!("custom {}", code));
        });
        let hooks = Hooks {
            error: Some(error),
            ..Hooks::default()
        };
        let state = state(RouteTable::new(), hooks);

        let ctx = run(&state, "/nothing-here").await;
        assert_eq!(ctx.res.status_code(), 404);
        assert_eq!(ctx.res.text(), "custom 404");
    }

    #[tokio::test]
    async fn failed_handler_length_does_not_leak_into_error_body() {
        let mut routes = RouteTable::new();
        route(&mut routes, "/partial", |ctx| {
            ctx.res.set_header(header::CONTENT_LENGTH, "1000");
            Err(HandlerError::Status(503))
        });
        let state = state(routes, Hooks::default());

        let ctx = run(&state, "/partial").await;
        assert_eq!(ctx.res.status_code(), 503);
        assert_eq!(ctx.res.text(), "Error: 503");
        assert_eq!(ctx.res.header(header::CONTENT_LENGTH), Some("10"));
    }

    #[tokio::test]
    async fn traversal_short_circuits_dispatch() {
        let mut routes = RouteTable::new();
        route(&mut routes, "/.*", |_| Ok(()));
        let state = state(routes, Hooks::default());

        assert_eq!(run(&state, "/a/../b").await.res.status_code(), 404);
        assert_eq!(run(&state, "/a/b").await.res.status_code(), 200);
    }

    #[tokio::test]
    async fn hooks_run_around_every_exchange() {
        let pre: HttpHook = Arc::new(|ctx: &mut HttpCtx| ctx.res.set_header("x-pre", "1"));
        let post: HttpHook = Arc::new(|ctx: &mut HttpCtx| {
            let status = ctx.res.status_code().to_string();
            ctx.res.set_header("x-post-status", &status);
        });
        let hooks = Hooks {
            pre: vec![pre],
            post: vec![post],
            ..Hooks::default()
        };
        let state = state(RouteTable::new(), hooks);

        let ctx = run(&state, "/none").await;
        assert_eq!(ctx.res.header("x-pre"), Some("1"));
        assert_eq!(ctx.res.header("x-post-status"), Some("404"));
    }
}
