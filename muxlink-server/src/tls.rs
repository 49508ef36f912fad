//! TLS acceptor construction.

use crate::config::TlsConfig;
use crate::error::ServerError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Builds the acceptor from the TLS section of the server config.
///
/// With `require_client_cert` set, the handshake demands a client
/// certificate chaining to `client_ca_path` (mTLS).
pub fn create_tls_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, ServerError> {
    let cert_path = config
        .cert_path
        .as_deref()
        .ok_or_else(|| ServerError::TlsConfig("cert_path not set".into()))?;
    let key_path = config
        .key_path
        .as_deref()
        .ok_or_else(|| ServerError::TlsConfig("key_path not set".into()))?;

    let builder = if config.require_client_cert {
        let ca_path = config
            .client_ca_path
            .as_deref()
            .ok_or_else(|| ServerError::TlsConfig("client_ca_path not set for mTLS".into()))?;
        rustls::ServerConfig::builder().with_client_cert_verifier(client_verifier(ca_path)?)
    } else {
        rustls::ServerConfig::builder().with_no_client_auth()
    };

    let server_config = builder
        .with_single_cert(pem_cert_chain(cert_path)?, pem_private_key(key_path)?)
        .map_err(|e| ServerError::TlsConfig(format!("bad server identity: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Verifier for mTLS client certificates rooted at `ca_path`.
fn client_verifier(ca_path: &Path) -> Result<Arc<dyn ClientCertVerifier>, ServerError> {
    let mut roots = RootCertStore::empty();
    let (added, _skipped) = roots.add_parsable_certificates(pem_cert_chain(ca_path)?);
    if added == 0 {
        return Err(ServerError::TlsConfig(format!(
            "no usable client CA certificates in {}",
            ca_path.display()
        )));
    }

    WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ServerError::TlsConfig(format!("client verifier: {}", e)))
}

fn pem_file(path: &Path) -> Result<BufReader<File>, ServerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ServerError::TlsConfig(format!("cannot open {}: {}", path.display(), e)))
}

fn pem_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem_file(path)?)
        .collect::<Result<_, _>>()
        .map_err(|e| ServerError::TlsConfig(format!("bad PEM in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn pem_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    rustls_pemfile::private_key(&mut pem_file(path)?)
        .map_err(|e| ServerError::TlsConfig(format!("bad PEM in {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            ServerError::TlsConfig(format!("no private key found in {}", path.display()))
        })
}
