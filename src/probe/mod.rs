//! Probe module for timed connection attempts.
//!
//! Supports bare TCP connects, TLS handshakes and HTTPS requests.

mod http;
mod tcp;
mod tls;

pub use http::*;
pub use tcp::*;
pub use tls::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Probe error types.
///
/// None of these ever leave a probe: they are folded into
/// [`AttemptOutcome::Failure`] and only kept for diagnostics.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection refused or unreachable: {0}")]
    Unreachable(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProbeError {
    /// Classify a socket-level error from the connect phase.
    pub(crate) fn from_connect(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NotConnected => ProbeError::Unreachable(err.to_string()),
            io::ErrorKind::TimedOut => ProbeError::Timeout(Duration::ZERO),
            _ => ProbeError::Transport(err.to_string()),
        }
    }
}

/// Outcome of a single timed attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Elapsed milliseconds, rounded to two decimals.
    Success { latency_ms: f64 },
    Failure { reason: ProbeError },
}

impl AttemptOutcome {
    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            AttemptOutcome::Success { latency_ms } => Some(*latency_ms),
            AttemptOutcome::Failure { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }

    /// Build an outcome from a measured attempt.
    pub(crate) fn from_timed(result: Result<Duration, ProbeError>) -> Self {
        match result {
            Ok(elapsed) => AttemptOutcome::Success {
                latency_ms: round_to(elapsed.as_secs_f64() * 1000.0, 2),
            },
            Err(reason) => AttemptOutcome::Failure { reason },
        }
    }
}

/// Where a single attempt connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host or literal IP that is actually dialed.
    pub address: String,
    pub port: u16,
    /// Identity presented during the handshake (SNI / certificate name).
    /// Falls back to `address` when absent.
    pub server_name: Option<String>,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            server_name: None,
        }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    pub fn tls_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server_name {
            Some(name) if name != &self.address => {
                write!(f, "{}:{} (sni {})", self.address, self.port, name)
            }
            _ => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// A single timed, bounded connection attempt.
///
/// Implementations never return an error: every failure mode collapses into
/// [`AttemptOutcome::Failure`], and the connection is closed before returning.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> AttemptOutcome;
}

/// Selectable probe implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Tls,
    Http,
}

impl ProbeKind {
    pub fn prober(self) -> Result<Arc<dyn Prober>, ProbeError> {
        Ok(match self {
            ProbeKind::Tcp => Arc::new(TcpProber),
            ProbeKind::Tls => Arc::new(TlsProber::new()?),
            ProbeKind::Http => Arc::new(HttpProber),
        })
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(ProbeKind::Tcp),
            "tls" => Ok(ProbeKind::Tls),
            "http" | "https" => Ok(ProbeKind::Http),
            other => Err(format!("unknown probe kind: {}", other)),
        }
    }
}

/// Run `attempt` under `timeout`, measuring from just before it starts until it
/// yields an open connection. The caller owns closing the returned value.
pub(crate) async fn timed<S, F>(timeout: Duration, attempt: F) -> Result<(Duration, S), ProbeError>
where
    F: std::future::Future<Output = Result<S, ProbeError>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(conn)) => Ok((start.elapsed(), conn)),
        Ok(Err(ProbeError::Timeout(_))) | Err(_) => Err(ProbeError::Timeout(timeout)),
        Ok(Err(e)) => Err(e),
    }
}

/// Upper bound on closing a measured connection.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Close a measured connection, giving up after [`CLOSE_GRACE`].
pub(crate) async fn close<S>(mut conn: S)
where
    S: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;
    let _ = tokio::time::timeout(CLOSE_GRACE, conn.shutdown()).await;
}

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer whose shutdown never completes.
    struct StalledWriter;

    impl tokio::io::AsyncWrite for StalledWriter {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_close_gives_up_after_grace() {
        let start = Instant::now();
        close(StalledWriter).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= CLOSE_GRACE);
        assert!(elapsed < Duration::from_secs(2), "close took {:?}", elapsed);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.3456, 2), 12.35);
        assert_eq!(round_to(33.333_333, 1), 33.3);
        assert_eq!(round_to(-100.04, 1), -100.0);
    }

    #[test]
    fn test_probe_kind_parse() {
        assert_eq!("TCP".parse::<ProbeKind>().unwrap(), ProbeKind::Tcp);
        assert_eq!("https".parse::<ProbeKind>().unwrap(), ProbeKind::Http);
        assert!("icmp".parse::<ProbeKind>().is_err());
    }

    #[test]
    fn test_endpoint_tls_name() {
        let mut ep = Endpoint::new("104.21.52.82", 443);
        assert_eq!(ep.tls_name(), "104.21.52.82");
        ep.server_name = Some("example.com".to_string());
        assert_eq!(ep.tls_name(), "example.com");
        assert_eq!(ep.to_string(), "104.21.52.82:443 (sni example.com)");
        assert_eq!(ep.with_port(80).port, 80);
    }

    #[test]
    fn test_outcome_from_timed() {
        let ok = AttemptOutcome::from_timed(Ok(Duration::from_micros(12_346)));
        assert_eq!(ok.latency_ms(), Some(12.35));

        let failed = AttemptOutcome::from_timed(Err(ProbeError::Tls("bad cert".into())));
        assert!(!failed.is_success());
        assert_eq!(failed.latency_ms(), None);
    }

    #[test]
    fn test_connect_error_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(ProbeError::from_connect(refused), ProbeError::Unreachable(_)));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(ProbeError::from_connect(other), ProbeError::Transport(_)));
    }
}
