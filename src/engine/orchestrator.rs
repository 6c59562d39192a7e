//! Fan-out of sampling over many targets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::Instrument;

use super::{
    AsSample, ComparisonService, EngineError, ProbePool, ProbeSettings, RankPolicy, SampleResult,
    Sampler, Target,
};
use crate::probe::round_to;

/// Ranked results of a speed test.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedTestReport {
    pub results: Vec<SampleResult>,
    pub best: Option<SampleResult>,
}

/// A sample annotated for head-to-head comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    #[serde(flatten)]
    sample: SampleResult,
    is_baseline: bool,
    /// Probed through an override address rather than the target's own.
    is_optimized: bool,
    /// Relative gain over the baseline, set only when a baseline succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    improvement_pct: Option<f64>,
}

impl ComparisonResult {
    pub fn from_sample(sample: SampleResult) -> Self {
        Self {
            is_baseline: sample.target().is_baseline(),
            is_optimized: sample.target().is_optimized(),
            sample,
            improvement_pct: None,
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.is_baseline
    }

    pub fn is_optimized(&self) -> bool {
        self.is_optimized
    }

    pub fn improvement_pct(&self) -> Option<f64> {
        self.improvement_pct
    }
}

impl AsSample for ComparisonResult {
    fn sample(&self) -> &SampleResult {
        &self.sample
    }
}

/// Ranked results of a comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub results: Vec<ComparisonResult>,
    pub best: Option<ComparisonResult>,
}

/// What a comparison run measures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComparisonPlan {
    /// The user's own endpoint; its direct result is the baseline.
    #[serde(default)]
    pub user_domain: String,
    /// Address to route every target through in addition to its direct probe.
    #[serde(default)]
    pub override_address: Option<String>,
    #[serde(default)]
    pub services: Vec<ComparisonService>,
}

const USER_PORT: u16 = 443;

impl ComparisonPlan {
    /// Expand into targets: the user's endpoint, then each service, each one
    /// direct and (with an override address) routed through the override.
    pub fn targets(&self) -> Result<Vec<Target>, EngineError> {
        let override_address = self
            .override_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        let mut targets = Vec::with_capacity((self.services.len() + 1) * 2);

        let user_domain = self.user_domain.trim();
        if !user_domain.is_empty() {
            targets.push(
                Target::new(user_domain, USER_PORT)?
                    .named("My endpoint (direct)")
                    .described("direct")
                    .as_baseline(),
            );
            if let Some(via) = override_address {
                targets.push(
                    Target::new(user_domain, USER_PORT)?
                        .via(via)?
                        .named("My endpoint (override)")
                        .described(format!("via {}", via)),
                );
            }
        }

        for service in &self.services {
            let direct = service.target()?;
            if let Some(via) = override_address {
                let routed = direct
                    .clone()
                    .via(via)?
                    .named(format!("{} (override)", service.name))
                    .described(format!("via {}", via));
                targets.push(direct);
                targets.push(routed);
            } else {
                targets.push(direct);
            }
        }

        Ok(targets)
    }
}

/// Relative latency gain of `test_ms` over `baseline_ms`, in percent (1 decimal).
/// A non-positive baseline yields 0.
pub fn improvement_pct(baseline_ms: f64, test_ms: f64) -> f64 {
    if baseline_ms <= 0.0 {
        return 0.0;
    }
    round_to((baseline_ms - test_ms) / baseline_ms * 100.0, 1)
}

fn annotate_improvements(results: &mut [ComparisonResult]) {
    let baseline = results
        .iter()
        .find(|r| r.is_baseline && r.sample.succeeded())
        .and_then(|r| r.sample.average_latency_ms());
    let Some(baseline_ms) = baseline else {
        tracing::info!("No successful baseline, skipping improvement figures");
        return;
    };

    for result in results.iter_mut().filter(|r| !r.is_baseline) {
        if let Some(test_ms) = result.sample.average_latency_ms() {
            result.improvement_pct = Some(improvement_pct(baseline_ms, test_ms));
        }
    }
}

/// Samples many targets on a bounded, reusable pool.
#[derive(Debug)]
pub struct Orchestrator {
    pool: ProbePool,
    sampler: Sampler,
    attempts: u32,
    timeout: Duration,
    policy: RankPolicy,
    span: tracing::Span,
}

impl Orchestrator {
    pub fn new(
        pool: ProbePool,
        sampler: Sampler,
        attempts: u32,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        if attempts == 0 {
            return Err(EngineError::InvalidConfig("attempts must be at least 1".to_string()));
        }
        if timeout.is_zero() {
            return Err(EngineError::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(Self {
            pool,
            sampler,
            attempts,
            timeout,
            policy: RankPolicy::default(),
            span: tracing::Span::current(),
        })
    }

    /// Build the pool and prober described by `settings`.
    pub fn from_settings(settings: &ProbeSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        let sampler = Sampler::new(settings.kind.prober()?);
        Self::new(
            ProbePool::new(settings.concurrency)?,
            sampler,
            settings.attempts,
            settings.timeout,
        )
    }

    /// Ranking policy for [`run`](Self::run) and [`speed_test`](Self::speed_test).
    pub fn with_policy(mut self, policy: RankPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_port_fallback(mut self, enabled: bool) -> Self {
        self.sampler = self.sampler.with_port_fallback(enabled);
        self
    }

    /// Span every worker task is instrumented with.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn pool(&self) -> &ProbePool {
        &self.pool
    }

    /// Sample every target and return them ranked.
    ///
    /// `on_progress(completed, total, result)` fires once per target, in
    /// completion order.
    pub async fn run<F>(
        &self,
        targets: Vec<Target>,
        on_progress: F,
    ) -> Result<Vec<SampleResult>, EngineError>
    where
        F: FnMut(usize, usize, &SampleResult) + Send,
    {
        let results = self.fan_out(targets, |s| s, on_progress).await?;
        Ok(self.policy.rank(results))
    }

    /// [`run`](Self::run) plus the best pick under the same policy.
    pub async fn speed_test<F>(
        &self,
        targets: Vec<Target>,
        on_progress: F,
    ) -> Result<SpeedTestReport, EngineError>
    where
        F: FnMut(usize, usize, &SampleResult) + Send,
    {
        let results = self.run(targets, on_progress).await?;
        let best = self.policy.best(&results).cloned();
        match &best {
            Some(b) => tracing::info!(
                "Speed test best: {}:{} avg={:?}ms loss={}%",
                b.target().address(),
                b.effective_port(),
                b.average_latency_ms(),
                b.loss_ratio()
            ),
            None => tracing::warn!("Speed test: no target succeeded"),
        }
        Ok(SpeedTestReport { results, best })
    }

    /// Compare the user's endpoint against services, directly and through the
    /// override address. Ordered by latency; best is picked loss-aware.
    pub async fn compare<F>(
        &self,
        plan: &ComparisonPlan,
        on_progress: F,
    ) -> Result<ComparisonReport, EngineError>
    where
        F: FnMut(usize, usize, &ComparisonResult) + Send,
    {
        let targets = plan.targets()?;
        tracing::info!(
            "Starting comparison: user_domain={:?} override={:?} tasks={}",
            plan.user_domain,
            plan.override_address,
            targets.len()
        );

        let mut results = self.fan_out(targets, ComparisonResult::from_sample, on_progress).await?;
        annotate_improvements(&mut results);

        let results = RankPolicy::Latency.rank(results);
        let best = RankPolicy::Stability.best(&results).cloned();
        Ok(ComparisonReport { results, best })
    }

    async fn fan_out<T, W, F>(
        &self,
        targets: Vec<Target>,
        wrap: W,
        mut on_progress: F,
    ) -> Result<Vec<T>, EngineError>
    where
        W: Fn(SampleResult) -> T + Send,
        F: FnMut(usize, usize, &T) + Send,
        T: Send,
    {
        if self.pool.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let total = targets.len();
        let mut tasks = JoinSet::new();
        for target in targets {
            let pool = self.pool.clone();
            let sampler = self.sampler.clone();
            let (attempts, timeout) = (self.attempts, self.timeout);
            tasks.spawn(
                async move {
                    let _slot = pool.acquire().await?;
                    Ok::<_, EngineError>(sampler.sample(&target, attempts, timeout).await)
                }
                .instrument(self.span.clone()),
            );
        }

        // A pool closed mid-run fails only the queued tasks. Tasks already
        // holding a slot are drained and still report progress.
        let mut closed = false;
        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let sample = match joined? {
                Ok(sample) => sample,
                Err(EngineError::PoolClosed) => {
                    closed = true;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let result = wrap(sample);
            on_progress(results.len() + 1, total, &result);
            results.push(result);
        }

        if closed {
            tracing::warn!(
                "Probe pool closed mid-run: {} of {} targets sampled",
                results.len(),
                total
            );
            return Err(EngineError::PoolClosed);
        }
        Ok(results)
    }
}
