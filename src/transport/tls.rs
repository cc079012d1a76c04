//! HTTPS serving for [`Rest`](super::Rest) when a certificate and key are set.

use crate::core::{Logger, Result, RuntimeError};
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::ServerConfig;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;

/// PEM certificate chain and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let certs = CertificateDer::pem_file_iter(&self.cert)
            .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| {
                RuntimeError::Configuration(format!(
                    "cannot read certificate {}: {}",
                    self.cert.display(),
                    e
                ))
            })?;
        if certs.is_empty() {
            return Err(RuntimeError::Configuration(format!(
                "no certificate found in {}",
                self.cert.display()
            )));
        }
        let key = PrivateKeyDer::from_pem_file(&self.key).map_err(|e| {
            RuntimeError::Configuration(format!(
                "cannot read private key {}: {}",
                self.key.display(),
                e
            ))
        })?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
            .map_err(|e| RuntimeError::Configuration(format!("invalid TLS setup: {}", e)))?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

/// Accepts TLS connections until `shutdown` fires, then drains open ones.
pub(crate) async fn serve(
    listener: TcpListener,
    router: Router,
    config: Arc<ServerConfig>,
    mut shutdown: oneshot::Receiver<()>,
    logger: Logger,
) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(config);
    let (drain, draining) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                logger.warn(format!("accept failed: {}", err));
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let (acceptor, router, logger) = (acceptor.clone(), router.clone(), logger.clone());
        let mut draining = draining.clone();
        connections.spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    logger.debug(format!("tls handshake with {} failed: {}", peer, err));
                    return;
                }
            };
            let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                router.clone().oneshot(request)
            });
            let builder = auto::Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(connection);
            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(err) = result {
                        logger.debug(format!("connection from {} closed: {}", peer, err));
                    }
                }
                _ = draining.changed() => {
                    connection.as_mut().graceful_shutdown();
                    let _ = connection.as_mut().await;
                }
            }
        });
        while connections.try_join_next().is_some() {}
    }

    drain.send_replace(true);
    while connections.join_next().await.is_some() {}
    Ok(())
}
