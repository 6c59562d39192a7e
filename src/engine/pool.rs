//! Bounded probe pool.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::EngineError;

/// Caps how many targets are sampled at once.
///
/// Cheap to clone; clones share the same slots. Lives as long as its owner and is
/// reused across runs. Closing it stops new work from starting while work that
/// already holds a slot runs to completion.
#[derive(Debug, Clone)]
pub struct ProbePool {
    slots: Arc<Semaphore>,
    capacity: usize,
}

impl ProbePool {
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidConfig("pool capacity must be at least 1".to_string()));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    /// Wait for a free slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, EngineError> {
        self.slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)
    }

    /// Stop admitting new work.
    pub fn close(&self) {
        if !self.slots.is_closed() {
            tracing::info!("Closing probe pool ({} slots)", self.capacity);
            self.slots.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
