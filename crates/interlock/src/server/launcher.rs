//! HTTPS listener lifecycle: configure, bind, serve.
//!
//! ```text
//! Uninitialized --configure--> Configured --bind--> Serving --accept error--> Terminated
//! ```
//!
//! Handshake failures are per connection and never leave `Serving`. Transient
//! accept failures (aborted peers, descriptor exhaustion) are logged and retried
//! after a short pause. Any other failure of the listener is final; restarting
//! is the supervisor's job.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use nix::errno::Errno;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, error, info, warn};

use super::tls::{self, TlsError};
use crate::config::Config;

/// Pause after a transient accept failure, so that descriptor exhaustion does
/// not turn the loop into a busy spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of the [`Launcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherState {
    Uninitialized,
    Configured,
    Serving,
    Terminated,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("launcher is {actual:?}, expected {expected:?}")]
    State {
        actual: LauncherState,
        expected: LauncherState,
    },

    #[error("could not bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed; the service is terminated.
    #[error("accept loop failed: {0}")]
    Accept(#[source] std::io::Error),
}

impl LaunchError {
    /// Human-readable name of the step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            LaunchError::Tls(_) => "TLS setup",
            LaunchError::State { .. } | LaunchError::Bind { .. } => "listener",
            LaunchError::Accept(_) => "serve",
        }
    }
}

/// Owns the TLS acceptor and the listening socket.
pub struct Launcher {
    state: LauncherState,
    bind_address: SocketAddr,
    mutual_tls: bool,
    acceptor: Option<TlsAcceptor>,
    listener: Option<TcpListener>,
}

impl Launcher {
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            state: LauncherState::Uninitialized,
            bind_address,
            mutual_tls: false,
            acceptor: None,
            listener: None,
        }
    }

    pub fn state(&self) -> LauncherState {
        self.state
    }

    /// `true` once configured with a client CA bundle.
    pub fn mutual_tls(&self) -> bool {
        self.mutual_tls
    }

    fn expect_state(&self, expected: LauncherState) -> Result<(), LaunchError> {
        if self.state != expected {
            return Err(LaunchError::State {
                actual: self.state,
                expected,
            });
        }
        Ok(())
    }

    /// Load the key pair and optional client CA bundle from `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Tls`] if the TLS material is missing or invalid;
    /// the launcher then stays `Uninitialized`.
    pub fn configure(&mut self, cfg: &Config) -> Result<(), LaunchError> {
        self.expect_state(LauncherState::Uninitialized)?;
        let server_config = tls::server_config_from(cfg)?;
        self.mutual_tls = cfg.tls_client_ca.is_some();
        if self.mutual_tls {
            info!("client certificate authentication required");
        }
        self.acceptor = Some(TlsAcceptor::from(server_config));
        self.state = LauncherState::Configured;
        Ok(())
    }

    /// Bind the listening socket and return its local address.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Bind`] if the address cannot be bound.
    pub async fn bind(&mut self) -> Result<SocketAddr, LaunchError> {
        self.expect_state(LauncherState::Configured)?;
        let listener = TcpListener::bind(self.bind_address)
            .await
            .map_err(|source| LaunchError::Bind {
                addr: self.bind_address,
                source,
            })?;
        let local = listener.local_addr().map_err(|source| LaunchError::Bind {
            addr: self.bind_address,
            source,
        })?;
        info!(addr = %local, mutual_tls = self.mutual_tls, "listening");
        self.listener = Some(listener);
        self.state = LauncherState::Serving;
        Ok(local)
    }

    /// Accept and serve connections until the listener fails.
    ///
    /// Each connection runs as its own task. Only returns on a fatal listener
    /// error, after which the launcher is `Terminated`.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Accept`] when the accept loop fails.
    pub async fn serve(&mut self, router: Router) -> Result<(), LaunchError> {
        self.expect_state(LauncherState::Serving)?;
        let (Some(listener), Some(acceptor)) = (self.listener.take(), self.acceptor.clone()) else {
            return Err(LaunchError::State {
                actual: self.state,
                expected: LauncherState::Serving,
            });
        };

        let e = accept_loop(&listener, acceptor, router).await;
        error!(error = %e, "accept error");
        self.state = LauncherState::Terminated;
        Err(LaunchError::Accept(e))
    }
}

/// Source of inbound TCP connections.
pub(crate) trait ConnectionSource {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl ConnectionSource for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept until `source` reports a fatal error, and return that error.
async fn accept_loop<S>(source: &S, acceptor: TlsAcceptor, router: Router) -> io::Error
where
    S: ConnectionSource + Sync,
{
    loop {
        match source.accept().await {
            Ok((tcp, peer)) => {
                debug!(%peer, "accepted TCP connection");
                tokio::spawn(serve_connection(acceptor.clone(), router.clone(), tcp, peer));
            }
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Err(e) => return e,
        }
    }
}

/// Accept errors that concern a single pending connection or a momentary
/// resource shortage, not the listening socket.
fn is_transient(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) {
        return true;
    }
    matches!(
        e.raw_os_error().map(Errno::from_raw),
        Some(
            Errno::EMFILE
                | Errno::ENFILE
                | Errno::ENOBUFS
                | Errno::ENOMEM
                | Errno::EPROTO
                | Errno::ENETDOWN
                | Errno::ENETUNREACH
                | Errno::EHOSTDOWN
                | Errno::EHOSTUNREACH
                | Errno::ENOPROTOOPT
                | Errno::EOPNOTSUPP
        )
    )
}

/// Handshake, then hand the connection to hyper.
async fn serve_connection(acceptor: TlsAcceptor, router: Router, tcp: TcpStream, peer: SocketAddr) {
    let stream = match acceptor.accept(tcp).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
        router.clone().call(req)
    });
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use axum::routing::get;
    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, RootCertStore};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::TlsConnector;

    fn server_cfg(client_ca: Option<&str>) -> Config {
        let mut cfg = Config::default();
        cfg.bind_address = "127.0.0.1:0".parse().unwrap();
        cfg.tls_cert = fixture("server.pem");
        cfg.tls_key = fixture("server-key.pem");
        cfg.tls_client_ca = client_ca.map(fixture);
        cfg
    }

    async fn start(cfg: &Config) -> SocketAddr {
        let mut launcher = Launcher::new(cfg.bind_address);
        launcher.configure(cfg).unwrap();
        assert_eq!(launcher.state(), LauncherState::Configured);
        let addr = launcher.bind().await.unwrap();
        assert_eq!(launcher.state(), LauncherState::Serving);

        let router = Router::new().route("/ping", get(|| async { "pong" }));
        tokio::spawn(async move {
            let _ = launcher.serve(router).await;
        });
        addr
    }

    fn pem_certs(name: &str) -> Vec<rustls::pki_types::CertificateDer<'static>> {
        let pem = std::fs::read(fixture(name)).unwrap();
        rustls_pemfile::certs(&mut pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn client(identity: Option<(&str, &str)>) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        for cert in pem_certs("ca.pem") {
            roots.add(cert).unwrap();
        }
        let builder = ClientConfig::builder_with_provider(tls::provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots);
        let config = match identity {
            Some((cert, key)) => {
                let key_pem = std::fs::read(fixture(key)).unwrap();
                let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
                    .unwrap()
                    .unwrap();
                builder.with_client_auth_cert(pem_certs(cert), key).unwrap()
            }
            None => builder.with_no_client_auth(),
        };
        TlsConnector::from(Arc::new(config))
    }

    /// Issue `GET /ping` and return whatever came back before the connection ended.
    async fn ping(addr: SocketAddr, connector: TlsConnector) -> Vec<u8> {
        let tcp = TcpStream::connect(addr).await.unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let Ok(mut stream) = connector.connect(name, tcp).await else {
            return Vec::new();
        };
        let request = b"GET /ping HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n";
        if stream.write_all(request).await.is_err() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
            }
        }
        out
    }

    fn is_ok_response(resp: &[u8]) -> bool {
        resp.starts_with(b"HTTP/1.1 200") && resp.ends_with(b"pong")
    }

    #[tokio::test]
    async fn server_auth_only_needs_no_client_certificate() {
        let addr = start(&server_cfg(None)).await;
        assert!(is_ok_response(&ping(addr, client(None)).await));
    }

    #[tokio::test]
    async fn mutual_tls_accepts_client_issued_by_ca() {
        let addr = start(&server_cfg(Some("ca.pem"))).await;
        let resp = ping(addr, client(Some(("client.pem", "client-key.pem")))).await;
        assert!(is_ok_response(&resp), "{}", String::from_utf8_lossy(&resp));
    }

    #[tokio::test]
    async fn mutual_tls_rejects_missing_client_certificate() {
        let addr = start(&server_cfg(Some("ca.pem"))).await;
        let resp = ping(addr, client(None)).await;
        assert!(!resp.starts_with(b"HTTP/"));
    }

    #[tokio::test]
    async fn mutual_tls_rejects_foreign_client_certificate() {
        let addr = start(&server_cfg(Some("ca.pem"))).await;
        let resp = ping(addr, client(Some(("rogue-client.pem", "rogue-client-key.pem")))).await;
        assert!(!resp.starts_with(b"HTTP/"));
    }

    #[tokio::test]
    async fn rejected_handshake_does_not_stop_the_service() {
        let addr = start(&server_cfg(Some("ca.pem"))).await;
        assert!(!ping(addr, client(None)).await.starts_with(b"HTTP/"));
        let resp = ping(addr, client(Some(("client.pem", "client-key.pem")))).await;
        assert!(is_ok_response(&resp));
    }

    #[test]
    fn accept_errors_are_classified() {
        let raw = |errno: Errno| io::Error::from_raw_os_error(errno as i32);
        assert!(is_transient(&raw(Errno::EMFILE)));
        assert!(is_transient(&raw(Errno::ENFILE)));
        assert!(is_transient(&raw(Errno::ECONNABORTED)));
        assert!(is_transient(&raw(Errno::EINTR)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&raw(Errno::EBADF)));
        assert!(!is_transient(&raw(Errno::EINVAL)));
        assert!(!is_transient(&io::Error::other("listener gone")));
    }

    /// Hands out the scripted errors in order, then `EBADF` forever.
    struct Scripted(std::sync::Mutex<std::collections::VecDeque<io::Error>>);

    impl ConnectionSource for Scripted {
        fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
            let next = self
                .0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| io::Error::from_raw_os_error(Errno::EBADF as i32));
            async move { Err(next) }
        }
    }

    #[tokio::test]
    async fn transient_accept_errors_keep_the_loop_running() {
        let source = Scripted(std::sync::Mutex::new(
            [Errno::EMFILE, Errno::ECONNABORTED, Errno::ENFILE, Errno::EINTR]
                .into_iter()
                .map(|e| io::Error::from_raw_os_error(e as i32))
                .collect(),
        ));
        let acceptor = TlsAcceptor::from(tls::server_config_from(&server_cfg(None)).unwrap());
        let router = Router::new().route("/ping", get(|| async { "pong" }));

        let fatal = accept_loop(&source, acceptor, router).await;
        assert_eq!(fatal.raw_os_error(), Some(Errno::EBADF as i32));
        assert!(source.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn service_survives_connections_dropped_before_handshake() {
        let addr = start(&server_cfg(None)).await;
        // Connections dropped before the handshake must not stop the listener.
        for _ in 0..20 {
            drop(TcpStream::connect(addr).await.unwrap());
        }
        assert!(is_ok_response(&ping(addr, client(None)).await));
    }

    #[tokio::test]
    async fn bind_requires_configuration() {
        let mut launcher = Launcher::new("127.0.0.1:0".parse().unwrap());
        let err = launcher.bind().await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::State {
                actual: LauncherState::Uninitialized,
                expected: LauncherState::Configured
            }
        ));
    }

    #[test]
    fn invalid_client_ca_keeps_launcher_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.pem");
        std::fs::write(&empty, b"").unwrap();

        let mut cfg = server_cfg(None);
        cfg.tls_client_ca = Some(empty);
        let mut launcher = Launcher::new(cfg.bind_address);
        let err = launcher.configure(&cfg).unwrap_err();
        assert!(matches!(err, LaunchError::Tls(TlsError::NoClientCa)));
        assert_eq!(err.stage(), "TLS setup");
        assert_eq!(launcher.state(), LauncherState::Uninitialized);
    }
}
