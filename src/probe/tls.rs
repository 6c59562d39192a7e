//! TLS handshake probe.
//!
//! Dials the endpoint's address and completes a full handshake, presenting the
//! endpoint's server name for SNI and certificate verification. This lets a
//! domain be measured through an override address.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio::net::TcpStream;

use super::tcp::connect;
use super::{close, timed, AttemptOutcome, Endpoint, ProbeError, Prober};

/// Measures TCP connect plus TLS handshake time.
#[derive(Clone)]
pub struct TlsProber {
    connector: TlsConnector,
}

impl TlsProber {
    /// Build a prober trusting the Mozilla root set.
    pub fn new() -> Result<Self, ProbeError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ProbeError::Tls(format!("invalid TLS configuration: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self::with_config(config))
    }

    /// Build a prober from an explicit client configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    async fn handshake(&self, endpoint: &Endpoint) -> Result<TlsStream<TcpStream>, ProbeError> {
        let server_name = ServerName::try_from(endpoint.tls_name().to_string())
            .map_err(|e| {
                ProbeError::Tls(format!("invalid server name {}: {}", endpoint.tls_name(), e))
            })?;

        let stream = connect(endpoint).await?;
        self.connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ProbeError::Tls(e.to_string()))
    }
}

impl std::fmt::Debug for TlsProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsProber").finish_non_exhaustive()
    }
}

#[async_trait]
impl Prober for TlsProber {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> AttemptOutcome {
        let result = match timed(timeout, self.handshake(endpoint)).await {
            Ok((elapsed, stream)) => {
                close(stream).await;
                Ok(elapsed)
            }
            Err(e) => {
                tracing::debug!("tls probe {} failed: {}", endpoint, e);
                Err(e)
            }
        };
        AttemptOutcome::from_timed(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tls_probe_plain_server_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                // Read the ClientHello and answer with garbage
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let reply = b"HTTP/1.1 400 Bad Request\r\n\r\n";
                let _ = tokio::io::AsyncWriteExt::write_all(&mut sock, reply).await;
            }
        });

        let prober = TlsProber::new().unwrap();
        let outcome = prober
            .probe(&Endpoint::new("127.0.0.1", port), Duration::from_secs(2))
            .await;
        match outcome {
            AttemptOutcome::Failure { reason } => assert!(matches!(reason, ProbeError::Tls(_))),
            other => panic!("expected TLS failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tls_probe_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let prober = TlsProber::new().unwrap();
        let outcome = prober
            .probe(&Endpoint::new("127.0.0.1", port), Duration::from_millis(200))
            .await;
        match outcome {
            AttemptOutcome::Failure { reason } => assert!(matches!(reason, ProbeError::Timeout(_))),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tls_probe_invalid_server_name() {
        let prober = TlsProber::new().unwrap();
        let mut endpoint = Endpoint::new("127.0.0.1", 443);
        endpoint.server_name = Some("not a hostname!".to_string());

        let outcome = prober.probe(&endpoint, Duration::from_secs(1)).await;
        assert!(!outcome.is_success());
    }
}
