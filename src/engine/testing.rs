//! Deterministic prober for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::probe::{AttemptOutcome, Endpoint, ProbeError, Prober};

/// Replays scripted latencies per endpoint. Unscripted or exhausted endpoints
/// fail every attempt.
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<Endpoint, VecDeque<Option<f64>>>>,
    calls: Mutex<HashMap<Endpoint, usize>>,
    delay: Duration,
    delays: HashMap<Endpoint, Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, address: &str, port: u16, outcomes: &[Option<f64>]) -> Self {
        self.script_endpoint(Endpoint::new(address, port), outcomes)
    }

    /// Script an endpoint dialed at `address` while presenting `server_name`.
    pub fn script_via(
        self,
        address: &str,
        server_name: &str,
        port: u16,
        outcomes: &[Option<f64>],
    ) -> Self {
        let mut endpoint = Endpoint::new(address, port);
        endpoint.server_name = Some(server_name.to_string());
        self.script_endpoint(endpoint, outcomes)
    }

    fn script_endpoint(self, endpoint: Endpoint, outcomes: &[Option<f64>]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(endpoint, outcomes.iter().copied().collect());
        self
    }

    /// Sleep this long inside every attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep this long inside every attempt against one endpoint.
    pub fn with_delay_for(mut self, address: &str, port: u16, delay: Duration) -> Self {
        self.delays.insert(Endpoint::new(address, port), delay);
        self
    }

    pub fn calls(&self, address: &str, port: u16) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&Endpoint::new(address, port))
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, endpoint: &Endpoint, _timeout: Duration) -> AttemptOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let key = endpoint.clone();
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front())
            .flatten();

        let delay = self.delays.get(&key).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match next {
            Some(latency_ms) => AttemptOutcome::Success { latency_ms },
            None => AttemptOutcome::Failure {
                reason: ProbeError::Unreachable(format!("{} scripted to fail", endpoint)),
            },
        }
    }
}
