//! Probing and ranking engine.
//!
//! Targets are sampled in parallel on a bounded pool, aggregated into latency and
//! loss statistics, then ranked to pick a single best endpoint.

mod orchestrator;
mod pool;
mod rank;
mod sample;
mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::*;
pub use pool::*;
pub use rank::*;
pub use sample::*;
pub use target::*;

use crate::probe::{ProbeError, ProbeKind};

use std::time::Duration;
use thiserror::Error;

/// Engine error types.
///
/// Probe failures never show up here; these are setup and infrastructure faults.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("probe pool is closed")]
    PoolClosed,
    #[error("probe worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl From<ProbeError> for EngineError {
    fn from(e: ProbeError) -> Self {
        EngineError::InvalidConfig(e.to_string())
    }
}

/// Settings for one probing mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSettings {
    pub kind: ProbeKind,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Sequential attempts per target.
    pub attempts: u32,
    /// Maximum targets sampled at once.
    pub concurrency: usize,
}

impl ProbeSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.attempts == 0 {
            return Err(EngineError::InvalidConfig("attempts must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(EngineError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(EngineError::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(())
    }
}
