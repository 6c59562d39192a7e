//! Repeated sampling of one target and the aggregated result.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::Target;
use crate::probe::{round_to, Endpoint, Prober};

/// Port tried when every attempt at 443 failed.
pub const FALLBACK_PORT: u16 = 80;
const FALLBACK_FROM_PORT: u16 = 443;

/// Loss-based stability tier. Declaration order is ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    /// Succeeded with less than 10% loss.
    Stable,
    /// Succeeded with 10% to under 30% loss.
    Unstable,
    /// 30% loss or more, or no successful attempt.
    Failed,
}

impl Stability {
    pub fn classify(succeeded: bool, loss_ratio: f64) -> Self {
        if !succeeded || loss_ratio >= 30.0 {
            Stability::Failed
        } else if loss_ratio >= 10.0 {
            Stability::Unstable
        } else {
            Stability::Stable
        }
    }
}

/// Coarse latency band for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyLevel {
    Fast,
    Medium,
    Slow,
    Failed,
}

impl LatencyLevel {
    pub fn classify(average_latency_ms: Option<f64>) -> Self {
        match average_latency_ms {
            None => LatencyLevel::Failed,
            Some(ms) if ms < 200.0 => LatencyLevel::Fast,
            Some(ms) if ms < 500.0 => LatencyLevel::Medium,
            Some(_) => LatencyLevel::Slow,
        }
    }
}

/// Aggregated outcome of all attempts against one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    target: Target,
    /// Mean of successful latencies, absent when nothing succeeded.
    average_latency_ms: Option<f64>,
    /// Percentage of failed attempts, 0..=100.
    loss_ratio: f64,
    success_count: u32,
    attempt_count: u32,
    effective_port: u16,
    succeeded: bool,
    stability: Stability,
    latency_level: LatencyLevel,
}

impl SampleResult {
    /// Aggregate the successful latencies of `attempts` attempts.
    pub fn from_latencies(
        target: Target,
        effective_port: u16,
        attempts: u32,
        latencies: &[f64],
    ) -> Self {
        let success_count = (latencies.len() as u32).min(attempts);
        let average_latency_ms = if success_count > 0 {
            Some(round_to(latencies.iter().sum::<f64>() / latencies.len() as f64, 2))
        } else {
            None
        };
        let loss_ratio = if attempts == 0 {
            100.0
        } else {
            round_to((1.0 - success_count as f64 / attempts as f64) * 100.0, 1)
        };
        let succeeded = success_count > 0;

        Self {
            target,
            average_latency_ms,
            loss_ratio,
            success_count,
            attempt_count: attempts,
            effective_port,
            succeeded,
            stability: Stability::classify(succeeded, loss_ratio),
            latency_level: LatencyLevel::classify(average_latency_ms),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn average_latency_ms(&self) -> Option<f64> {
        self.average_latency_ms
    }

    pub fn loss_ratio(&self) -> f64 {
        self.loss_ratio
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn effective_port(&self) -> u16 {
        self.effective_port
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn stability(&self) -> Stability {
        self.stability
    }

    pub fn latency_level(&self) -> LatencyLevel {
        self.latency_level
    }
}

/// Runs sequential attempts against a target through a [`Prober`].
#[derive(Clone)]
pub struct Sampler {
    prober: Arc<dyn Prober>,
    port_fallback: bool,
}

impl Sampler {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self {
            prober,
            port_fallback: true,
        }
    }

    /// Enable or disable the 443 -> 80 retry round.
    pub fn with_port_fallback(mut self, enabled: bool) -> Self {
        self.port_fallback = enabled;
        self
    }

    /// Probe `target` `attempts` times in sequence and aggregate.
    ///
    /// When the target is on 443 and every attempt failed, a second full round
    /// runs against port 80. Its numbers replace the first round only if it
    /// succeeded at least once; the rounds are never merged.
    pub async fn sample(&self, target: &Target, attempts: u32, timeout: Duration) -> SampleResult {
        let endpoint = target.endpoint();
        let mut latencies = self.round(&endpoint, attempts, timeout).await;
        let mut effective_port = endpoint.port;

        if latencies.is_empty() && self.port_fallback && target.port() == FALLBACK_FROM_PORT {
            tracing::debug!(
                "{}: all attempts failed, retrying on port {}",
                endpoint,
                FALLBACK_PORT
            );
            let fallback = self
                .round(&endpoint.with_port(FALLBACK_PORT), attempts, timeout)
                .await;
            if !fallback.is_empty() {
                latencies = fallback;
                effective_port = FALLBACK_PORT;
            }
        }

        let result =
            SampleResult::from_latencies(target.clone(), effective_port, attempts, &latencies);
        match result.average_latency_ms() {
            Some(avg) => tracing::info!(
                "Sampled {} ({}:{}): avg={}ms loss={}%",
                target.name(),
                target.address(),
                effective_port,
                avg,
                result.loss_ratio()
            ),
            None => tracing::warn!(
                "Sampled {} ({}:{}): all {} attempts failed",
                target.name(),
                target.address(),
                effective_port,
                result.attempt_count()
            ),
        }
        result
    }

    async fn round(&self, endpoint: &Endpoint, attempts: u32, timeout: Duration) -> Vec<f64> {
        let mut latencies = Vec::with_capacity(attempts as usize);
        for attempt in 1..=attempts {
            let outcome = self.prober.probe(endpoint, timeout).await;
            match outcome.latency_ms() {
                Some(ms) => {
                    tracing::debug!("{} attempt {}/{}: {}ms", endpoint, attempt, attempts, ms);
                    latencies.push(ms);
                }
                None => tracing::debug!("{} attempt {}/{}: failed", endpoint, attempt, attempts),
            }
        }
        latencies
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("port_fallback", &self.port_fallback)
            .finish_non_exhaustive()
    }
}
