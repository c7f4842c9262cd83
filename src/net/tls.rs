//! TLS configuration and certificate loading.
//!
//! The engine never builds TLS policy itself: callers hand it a `rustls`
//! config and the engine attaches it to sockets through `tokio-rustls`.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::config::TlsConfig;
use crate::error::ServerError;

/// Load a server TLS configuration from certificate and key files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, ServerError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Load the server TLS configuration named by the listener section.
pub fn from_listener_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, ServerError> {
    load_server_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
}

/// Client configuration trusting the bundled webpki roots.
pub fn default_client_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Arc::new(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::Tls(format!("certificate file {:?}: {}", path, e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("certificate file {:?}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!("no certificates found in {:?}", path)));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let file = File::open(path)
        .map_err(|e| ServerError::Tls(format!("private key file {:?}: {}", path, e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ServerError::Tls(format!("private key file {:?}: {}", path, e)))?
        .ok_or_else(|| ServerError::Tls(format!("no private key found in {:?}", path)))
}
