//! Worker-lease admission control.
//!
//! A cooperative mechanism bounding how many task-execution threads exist
//! across the whole build tree: controllers acquire a lease before
//! dispatching work and hold it for the duration of their build's task
//! execution.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{BuildTreeError, BuildTreeResult};

/// A held concurrency-admission ticket. Released on drop.
pub struct WorkerLease {
    _permit: OwnedSemaphorePermit,
}

/// Gates concurrent task execution tree-wide.
#[derive(Clone)]
pub struct WorkerLeaseService {
    semaphore: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerLeaseService {
    /// `max_workers` must be at least 1.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Suspend until a lease is available.
    pub async fn acquire(&self) -> BuildTreeResult<WorkerLease> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| BuildTreeError::WorkerLeasesUnavailable)?;
        debug!(available = self.semaphore.available_permits(), "worker lease acquired");
        Ok(WorkerLease { _permit: permit })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Leases not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let leases = WorkerLeaseService::new(2);
        assert_eq!(leases.available(), 2);

        let first = leases.acquire().await.unwrap();
        let second = leases.acquire().await.unwrap();
        assert_eq!(leases.available(), 0);

        drop(first);
        assert_eq!(leases.available(), 1);
        drop(second);
        assert_eq!(leases.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_released() {
        let leases = WorkerLeaseService::new(1);
        let held = leases.acquire().await.unwrap();

        let waiter = {
            let leases = leases.clone();
            tokio::spawn(async move { leases.acquire().await.map(|_| ()) })
        };

        // The waiter cannot finish while the lease is held.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[test]
    fn test_zero_workers_clamps_to_one() {
        let leases = WorkerLeaseService::new(0);
        assert_eq!(leases.max_workers(), 1);
    }
}
