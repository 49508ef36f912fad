//! TLS connector construction for the client.

use crate::connection::TlsClientConfig;
use crate::error::ClientError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// Builds the connector and SNI name for a connection.
///
/// Trust anchors come from `ca_cert_path` when set, the bundled web roots
/// otherwise. When both client cert and key paths are present, that
/// identity is offered for mTLS. `insecure` swaps in a verifier that
/// accepts any server certificate.
pub fn connector(
    config: &TlsClientConfig,
    dialed_host: &str,
) -> Result<(TlsConnector, ServerName<'static>), ClientError> {
    let client_config = if config.insecure {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth()
    } else {
        let builder = ClientConfig::builder().with_root_certificates(trust_roots(config)?);
        match (&config.client_cert_path, &config.client_key_path) {
            (Some(cert_path), Some(key_path)) => builder
                .with_client_auth_cert(pem_cert_chain(cert_path)?, pem_private_key(key_path)?)
                .map_err(|e| ClientError::TlsConfig(format!("bad client identity: {}", e)))?,
            _ => builder.with_no_client_auth(),
        }
    };

    let sni = config.server_name.as_deref().unwrap_or(dialed_host);
    let server_name = ServerName::try_from(sni.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", sni)))?;

    Ok((TlsConnector::from(Arc::new(client_config)), server_name))
}

/// Root store used to verify the server certificate.
fn trust_roots(config: &TlsClientConfig) -> Result<RootCertStore, ClientError> {
    let mut roots = RootCertStore::empty();
    match &config.ca_cert_path {
        Some(path) => {
            let (added, _skipped) = roots.add_parsable_certificates(pem_cert_chain(path)?);
            if added == 0 {
                return Err(ClientError::TlsConfig(format!(
                    "no usable CA certificates in {}",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(roots)
}

fn pem_file(path: &Path) -> Result<BufReader<File>, ClientError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ClientError::TlsConfig(format!("cannot open {}: {}", path.display(), e)))
}

fn pem_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut pem_file(path)?)
        .collect::<Result<_, _>>()
        .map_err(|e| ClientError::TlsConfig(format!("bad PEM in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ClientError::TlsConfig(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn pem_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    rustls_pemfile::private_key(&mut pem_file(path)?)
        .map_err(|e| ClientError::TlsConfig(format!("bad PEM in {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            ClientError::TlsConfig(format!("no private key found in {}", path.display()))
        })
}

/// Accepts every server certificate. Development and testing only.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
