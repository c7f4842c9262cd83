//! Client request pipeline.
//!
//! # Responsibilities
//! - Queue outbound requests with their response callbacks
//! - Drain the queue over one connection, one round trip at a time
//! - Bound each network step and, optionally, the whole batch
//!
//! # Design Decisions
//! - An entry leaves the queue only once its response callback has run,
//!   so a batch cut short leaves the remainder queued for the next `connect`
//! - The last request carries `Connection: close`
//! - One error callback per client; the first failure halts the batch

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::client::conn::http1;
use hyper::header::{self, HeaderMap};
use hyper::Method;
use hyper_util::rt::TokioIo;
use url::Url;

use crate::client::connector::{self, step};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::net::tls;
use crate::observability::metrics;
use crate::routing::query::append_query;

/// Request and response of one completed round trip.
#[derive(Debug)]
pub struct ClientCtx {
    pub req: Request,
    pub res: Response,
}

/// Called with each completed round trip.
pub type ResponseCallback = Box<dyn FnMut(&mut ClientCtx) + Send>;

/// Called once when a batch stops on an error.
pub type ErrorCallback = Box<dyn FnMut(&ClientError) + Send>;

struct Queued {
    req: Request,
    callback: ResponseCallback,
}

/// HTTP client that pipelines queued requests over one connection.
pub struct Client {
    config: ClientConfig,
    tls: Option<Arc<rustls::ClientConfig>>,
    queue: VecDeque<Queued>,
    on_error: Option<ErrorCallback>,
}

impl Client {
    /// Plain HTTP client for `address:port` with default settings.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self::with_config(ClientConfig {
            address: address.into(),
            port,
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let tls = config.tls.then(tls::default_client_config);
        Self {
            config,
            tls,
            queue: VecDeque::new(),
            on_error: None,
        }
    }

    /// Client for an `http://` or `https://` base URL.
    pub fn from_url(url: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(url).map_err(|e| ClientError::InvalidRequest(format!("{}: {}", url, e)))?;
        let tls = match parsed.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(ClientError::InvalidRequest(format!("unsupported scheme `{}`", other))),
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| ClientError::InvalidRequest(format!("{}: missing host", url)))?;
        let port = parsed.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self::with_config(ClientConfig {
            address: host.to_string(),
            port,
            tls,
            ..ClientConfig::default()
        }))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }

    /// Use TLS with a caller-built config.
    pub fn set_tls(&mut self, config: Arc<rustls::ClientConfig>) {
        self.config.tls = true;
        self.tls = Some(config);
    }

    /// Queue a GET for `target`.
    pub fn on_http(&mut self, target: &str, callback: impl FnMut(&mut ClientCtx) + Send + 'static) -> &mut Self {
        self.on_http_request(Request::new(Method::GET, target), callback)
    }

    /// Queue a request built from its parts.
    pub fn on_http_with(
        &mut self,
        method: Method,
        target: &str,
        headers: HeaderMap,
        body: impl Into<Bytes>,
        callback: impl FnMut(&mut ClientCtx) + Send + 'static,
    ) -> &mut Self {
        let mut req = Request::new(method, target).with_body(body);
        req.headers = headers;
        self.on_http_request(req, callback)
    }

    /// Queue a prepared request. Its `params` are appended to the target
    /// when it is sent.
    pub fn on_http_request(&mut self, req: Request, callback: impl FnMut(&mut ClientCtx) + Send + 'static) -> &mut Self {
        self.queue.push_back(Queued {
            req,
            callback: Box::new(callback),
        });
        self
    }

    /// Set the callback for transport failures and timeouts.
    pub fn on_http_error(&mut self, callback: impl FnMut(&ClientError) + Send + 'static) -> &mut Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Requests still waiting to be sent.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Request> {
        self.queue.iter().map(|q| &q.req)
    }

    /// Drop every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Drain the queue over one connection.
    ///
    /// Returns how many requests completed. On failure the error callback
    /// fires once and the unsent requests stay queued.
    pub async fn connect(&mut self) -> usize {
        let before = self.queue.len();
        if before == 0 {
            return 0;
        }

        let result = match self.config.batch_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.drain())
                .await
                .unwrap_or(Err(ClientError::BatchTimeout)),
            None => self.drain().await,
        };

        let completed = before - self.queue.len();
        if let Err(e) = result {
            metrics::record_client_request(e.kind());
            tracing::debug!(
                address = %self.config.address,
                port = self.config.port,
                completed,
                remaining = self.queue.len(),
                error = %e,
                "Client batch stopped"
            );
            if let Some(callback) = self.on_error.as_mut() {
                callback(&e);
            }
        }
        completed
    }

    async fn drain(&mut self) -> Result<(), ClientError> {
        let limit = self.config.step_timeout();
        let stream = connector::open(&self.config.address, self.config.port, self.tls.as_ref(), limit).await?;

        let (mut sender, conn) = step("handshake", limit, http1::handshake(TokioIo::new(stream))).await??;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Client connection closed with error");
            }
        });

        while let Some(front) = self.queue.front() {
            let last = self.queue.len() == 1;
            let req = prepare(&self.config, self.tls.is_some(), &front.req, last);
            let outbound = req
                .to_hyper()
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

            step("write", limit, sender.ready()).await??;
            let res = step("read", limit, sender.send_request(outbound)).await??;
            let (parts, body) = res.into_parts();
            let body = step("read", limit, body.collect()).await??.to_bytes();

            // Popped and answered with no await in between, so a batch
            // timeout never loses a completed response.
            let Some(mut entry) = self.queue.pop_front() else {
                break;
            };
            let mut ctx = ClientCtx {
                req,
                res: Response::from_parts(parts, body),
            };
            (entry.callback)(&mut ctx);
            metrics::record_client_request("ok");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Request as it goes on the wire: params in the target, default
/// `User-Agent` and `Host`, and `Connection: close` on the last one.
fn prepare(config: &ClientConfig, tls: bool, req: &Request, last: bool) -> Request {
    let mut req = req.clone();
    if req.target.is_empty() {
        req.target.push('/');
    }
    req.target = append_query(&req.target, &req.params);

    if req.header(header::USER_AGENT).is_none() {
        req.set_header(header::USER_AGENT, &config.user_agent);
    }
    if req.header(header::HOST).is_none() {
        req.set_header(header::HOST, &host_header(config, tls));
    }
    req.set_keep_alive(!last);
    req
}

fn host_header(config: &ClientConfig, tls: bool) -> String {
    let host = if config.address.contains(':') && !config.address.starts_with('[') {
        format!("[{}]", config.address)
    } else {
        config.address.clone()
    };
    let default_port = if tls { 443 } else { 80 };
    if config.port == default_port {
        host
    } else {
        format!("{}:{}", host, config.port)
    }
}
