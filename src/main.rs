//! Carillon demo server.
//!
//! Serves a handful of example routes, a public directory when configured,
//! and a chat-style WebSocket endpoint at `/chat/<room>`.
//!
//! ```text
//! carillon --config carillon.toml
//! curl localhost:8080/params?a=1&a=2
//! ```

use std::path::PathBuf;

use clap::Parser;

use carillon::config::{load_config, ServerConfig};
use carillon::lifecycle::shutdown_on_signal;
use carillon::observability::{init_logging, init_metrics};
use carillon::{header, HandlerError, HttpCtx, Method, Server, WsRoute};

#[derive(Parser)]
#[command(name = "carillon")]
#[command(about = "Demo HTTP/WebSocket server", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the public directory for static files.
    #[arg(long)]
    public: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(public) = cli.public {
        config.http.public_dir = Some(public);
    }

    init_logging(&config.observability.log_level);
    tracing::info!(
        address = %config.listener.bind_address(),
        threads = config.listener.threads,
        public_dir = ?config.http.public_dir,
        "carillon v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let mut server = Server::new(config);
    register_routes(&mut server)?;

    let routes = serde_json::to_string_pretty(&server.http_routes())?;
    server.on_http("/routes", Method::GET, move |ctx| {
        ctx.res.set_header(header::CONTENT_TYPE, "application/json");
        ctx.res.set_body(routes.clone());
        Ok(())
    })?;

    let threads = server.config().listener.threads.max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let observability = &server.config().observability;
        if observability.metrics_enabled {
            match observability.metrics_address.parse() {
                Ok(addr) => init_metrics(addr),
                Err(_) => tracing::error!(
                    metrics_address = %observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        tokio::spawn(shutdown_on_signal(server.shutdown_handle()));
        server.run().await
    })?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn register_routes(server: &mut Server) -> Result<(), carillon::RouteError> {
    server.on_http("/", Method::GET, |ctx| {
        ctx.res.set_header(header::CONTENT_TYPE, "text/plain");
        ctx.res.set_body("Hello from carillon\n");
        Ok(())
    })?;

    server.on_http_any("/method", |ctx| {
        let body = format!("{}\n", ctx.req.method);
        ctx.res.set_body(body);
        Ok(())
    })?;

    server.on_http("/post", Method::POST, |ctx| {
        if ctx.req.body.is_empty() {
            return Err(HandlerError::Status(400));
        }
        let body = ctx.req.text().into_owned();
        ctx.res.set_header(header::CONTENT_TYPE, "text/plain");
        ctx.res.set_body(body);
        Ok(())
    })?;

    server.on_http("/params", Method::GET, |ctx| {
        let body: String = ctx
            .req
            .params
            .iter()
            .map(|(k, v)| format!("{}: {}\n", k, v))
            .collect();
        ctx.res.set_body(body);
        Ok(())
    })?;

    // Echo any 4xx/5xx code back through the error path.
    server.on_http("^/([45][0-9]{2})$", Method::GET, |ctx| {
        let code = ctx.req.path[1].parse::<u16>().unwrap_or(500);
        Err(HandlerError::Status(code))
    })?;

    server.on_http("/error", Method::GET, |_| {
        Err(HandlerError::Internal("demo failure".into()))
    })?;

    server.on_http_error(|ctx: &mut HttpCtx| {
        let code = ctx.error_code.unwrap_or(500);
        ctx.res.set_header(header::CONTENT_TYPE, "text/html");
        ctx.res.set_body(format!(
            "<!doctype html><title>{code}</title><h1>Error {code}</h1>\n"
        ));
    });

    server.on_http_disconnect(|ctx: &mut HttpCtx| {
        tracing::info!(
            peer = %ctx.peer(),
            method = %ctx.req.method,
            request_target = %ctx.req.target,
            status = ctx.res.status_code(),
            "access"
        );
    });

    server.on_websocket(
        "/chat/([a-z0-9_-]+)",
        WsRoute::new()
            .on_begin(|ctx| {
                let room = ctx.req.path[1].clone();
                ctx.broadcast(format!("* {} joined {} ({} online)", ctx.id(), room, ctx.channel_size()));
            })
            .on_data(|ctx| {
                let line = format!("{}: {}", ctx.id(), ctx.text());
                ctx.broadcast(line);
            })
            .on_end(|ctx| {
                ctx.broadcast(format!("* {} left", ctx.id()));
            }),
    )?;

    Ok(())
}
