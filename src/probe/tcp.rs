//! Bare TCP connect probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{close, timed, AttemptOutcome, Endpoint, ProbeError, Prober};

/// Measures the time to complete a TCP three-way handshake.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

/// Open a TCP connection to the endpoint's dial address.
pub(crate) async fn connect(endpoint: &Endpoint) -> Result<TcpStream, ProbeError> {
    let stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port))
        .await
        .map_err(ProbeError::from_connect)?;
    // Latency probes send tiny payloads
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> AttemptOutcome {
        let result = match timed(timeout, connect(endpoint)).await {
            Ok((elapsed, stream)) => {
                close(stream).await;
                Ok(elapsed)
            }
            Err(e) => {
                tracing::debug!("tcp probe {} failed: {}", endpoint, e);
                Err(e)
            }
        };
        AttemptOutcome::from_timed(result)
    }
}
