//! Global admission control for upstream calls

use crate::error::{RenderError, RenderResult};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded counting gate in front of the upstream service
///
/// Backed by a fair [`Semaphore`], so waiters are admitted in FIFO order.
/// The slot is released when the returned [`GatePermit`] is dropped, which
/// covers success, error, timeout and cancellation alike.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held gate slot
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Give the slot back explicitly
    pub fn release(self) {}
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `capacity` concurrent calls (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> RenderResult<GatePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RenderError::Transport("Concurrency gate closed".to_string()))?;
        Ok(GatePermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(4)
    }
}
