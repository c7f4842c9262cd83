//! Outbound connection setup: resolve → connect → optional TLS.
//!
//! Each phase runs under the client's per-step timeout and reports its own
//! error kind, so the error callback can tell where the attempt stopped.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::ClientError;
use crate::net::BoxedStream;

/// Run `fut` under the step timeout, naming the phase on expiry.
pub(crate) async fn step<F: Future>(phase: &'static str, limit: Duration, fut: F) -> Result<F::Output, ClientError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ClientError::Timeout(phase))
}

/// Open a plain or TLS stream to `address:port`.
pub(crate) async fn open(
    address: &str,
    port: u16,
    tls: Option<&Arc<rustls::ClientConfig>>,
    limit: Duration,
) -> Result<BoxedStream, ClientError> {
    let host = address.trim_start_matches('[').trim_end_matches(']');

    let addrs: Vec<SocketAddr> = step("resolve", limit, tokio::net::lookup_host((host, port)))
        .await?
        .map_err(|source| ClientError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(ClientError::NoAddress(host.to_string()));
    }

    let tcp = step("connect", limit, connect_any(&addrs)).await??;
    let _ = tcp.set_nodelay(true);
    tracing::debug!(host, port, tls = tls.is_some(), "Client connected");

    let Some(config) = tls else {
        return Ok(Box::new(tcp));
    };

    let name = ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::InvalidServerName(host.to_string()))?;
    let connector = TlsConnector::from(Arc::clone(config));
    let stream = step("handshake", limit, connector.connect(name, tcp))
        .await?
        .map_err(ClientError::Handshake)?;
    Ok(Box::new(stream))
}

/// Try each resolved address in order; report the last failure.
async fn connect_any(addrs: &[SocketAddr]) -> Result<TcpStream, ClientError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(address = %addr, error = %e, "Client connect attempt failed");
                last_error = Some(e);
            }
        }
    }
    Err(ClientError::Connect(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address to connect to")
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = open("127.0.0.1", port, None, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_names_phase() {
        let result = step("read", Duration::from_millis(10), std::future::pending::<()>()).await;
        assert!(matches!(result, Err(ClientError::Timeout("read"))));
    }
}
