//! TLS listener setup using rustls.
//!
//! Loads the server certificate chain and private key from the configured
//! paths and, when a client CA bundle is configured, requires every peer to
//! present a certificate chaining to it. Unauthenticated peers are rejected
//! during the handshake and never reach a request handler.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;

use crate::config::Config;

/// Errors raised while assembling the TLS server configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// `tls_cert` or `tls_key` is empty.
    #[error("TLS certificate and key must both be configured")]
    MissingKeyPair,

    #[error("could not read {what} {}: {source}", path.display())]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in TLS certificate chain")]
    EmptyChain,

    #[error("no private key found in PEM data")]
    NoPrivateKey,

    /// The client CA bundle held no usable certificate.
    #[error("could not parse client certificate authority: no valid certificate in bundle")]
    NoClientCa,

    #[error("failed to build client certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),

    #[error("failed to build rustls ServerConfig: {0}")]
    Config(#[from] rustls::Error),
}

/// Crypto provider used for every TLS configuration in the process.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build the server configuration described by `cfg`, reading all PEM files.
///
/// # Errors
///
/// Returns [`TlsError`] if the key pair is not configured, a file cannot be
/// read, or its contents cannot be parsed.
pub fn server_config_from(cfg: &Config) -> Result<Arc<ServerConfig>, TlsError> {
    if cfg.tls_cert.as_os_str().is_empty() || cfg.tls_key.as_os_str().is_empty() {
        return Err(TlsError::MissingKeyPair);
    }
    let cert_pem = read_pem("TLS certificate", &cfg.tls_cert)?;
    let key_pem = read_pem("TLS private key", &cfg.tls_key)?;

    let client_roots = cfg
        .tls_client_ca
        .as_deref()
        .map(|path| read_pem("client certificate authority", path))
        .transpose()?
        .map(|pem| load_client_roots(&pem))
        .transpose()?;

    build_server_config(&cert_pem, &key_pem, client_roots)
}

fn read_pem(what: &'static str, path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a PEM bundle of client certificate authorities into a trust pool.
///
/// # Errors
///
/// Returns [`TlsError::NoClientCa`] if the bundle is empty or none of its
/// certificates is usable as a trust anchor.
pub fn load_client_roots(ca_pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(ca_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            what: "client certificate authority",
            source,
        })?;

    let mut roots = RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::NoClientCa);
    }
    Ok(roots)
}

/// Build a [`rustls::ServerConfig`] from PEM-encoded certificate and private key bytes.
///
/// With `client_roots`, client authentication is mandatory and verified
/// against that pool; without, the server authenticates itself only.
///
/// # Errors
///
/// Returns an error if the certificate or key cannot be parsed, or if rustls
/// rejects the configuration.
pub fn build_server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_roots: Option<RootCertStore>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem {
            what: "TLS certificate chain",
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::EmptyChain);
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|source| TlsError::Pem {
            what: "TLS private key",
            source,
        })?
        .ok_or(TlsError::NoPrivateKey)?;

    let provider = provider();
    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;
    let builder = match client_roots {
        Some(roots) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder.with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
