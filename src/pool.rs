//! Process-wide bound on pages in flight across all jobs.
//!
//! Each job already caps its own parallelism with `concurrency` workers.
//! When several jobs run at once (a server handling many uploads), create
//! one [`PagePermits`] at startup and hand a clone to every pipeline; a
//! worker then holds a permit for the whole render + recognise sequence of
//! a page.

use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Shared page-slot semaphore. Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct PagePermits {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl PagePermits {
    /// A pool of `limit` page slots. `limit` is raised to at least 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Wait for a slot. The slot is released when the permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }
}
