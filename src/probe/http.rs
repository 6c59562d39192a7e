//! HTTP probe implementation.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{timed, AttemptOutcome, Endpoint, ProbeError, Prober};

/// Measures time to response headers for a `GET /`.
///
/// Port 80 is requested over plain HTTP, everything else over HTTPS.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProber;

fn request_url(endpoint: &Endpoint) -> String {
    let scheme = if endpoint.port == 80 { "http" } else { "https" };
    format!("{}://{}:{}/", scheme, endpoint.tls_name(), endpoint.port)
}

/// Resolve the dial address when it differs from the request host.
async fn pinned_address(endpoint: &Endpoint) -> Result<Option<SocketAddr>, ProbeError> {
    if endpoint.tls_name() == endpoint.address {
        return Ok(None);
    }

    let mut addrs = tokio::net::lookup_host((endpoint.address.as_str(), endpoint.port))
        .await
        .map_err(|e| {
            ProbeError::Unreachable(format!("failed to resolve {}: {}", endpoint.address, e))
        })?;

    addrs
        .next()
        .map(Some)
        .ok_or_else(|| {
            ProbeError::Unreachable(format!("no addresses found for {}", endpoint.address))
        })
}

async fn run_http_probe(endpoint: &Endpoint, timeout: Duration) -> Result<Duration, ProbeError> {
    // Resolving the pinned address counts against the same attempt deadline
    let deadline = Instant::now() + timeout;
    let pinned = tokio::time::timeout_at(deadline, pinned_address(endpoint))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;

    // Fresh client per attempt so no pooled connection is reused
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none());
    if let Some(addr) = pinned {
        builder = builder.resolve(endpoint.tls_name(), addr);
    }
    let client = builder
        .build()
        .map_err(|e| ProbeError::Transport(e.to_string()))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ProbeError::Timeout(timeout));
    }
    let url = request_url(endpoint);
    let (elapsed, response) = timed(remaining, async {
        client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(timeout)
            } else if e.is_connect() {
                ProbeError::Unreachable(e.to_string())
            } else {
                ProbeError::Transport(e.to_string())
            }
        })
    })
    .await?;
    drop(response);

    Ok(elapsed)
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &Endpoint, timeout: Duration) -> AttemptOutcome {
        let result = run_http_probe(endpoint, timeout).await;
        if let Err(e) = &result {
            tracing::debug!("http probe {} failed: {}", endpoint, e);
        }
        AttemptOutcome::from_timed(result)
    }
}
