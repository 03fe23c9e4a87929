//! Per-CMTS concurrency caps
//!
//! A map from CMTS id to a counting semaphore, behind a read-mostly lock
//! with double-checked insertion on the write path. Entries are never
//! collected during a run; the map is bounded by the number of head-ends.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;

pub struct CmtsLimits {
    semaphores: RwLock<HashMap<i64, Arc<Semaphore>>>,
    capacity: usize,
}

impl CmtsLimits {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphores: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    async fn semaphore(&self, cmts_id: i64) -> Arc<Semaphore> {
        {
            let map = self.semaphores.read().await;
            if let Some(sem) = map.get(&cmts_id) {
                return Arc::clone(sem);
            }
        }

        let mut map = self.semaphores.write().await;
        // Double-check after taking the write lock.
        if let Some(sem) = map.get(&cmts_id) {
            return Arc::clone(sem);
        }

        let sem = Arc::new(Semaphore::new(self.capacity));
        map.insert(cmts_id, Arc::clone(&sem));
        debug!(cmts_id, max_concurrent = self.capacity, "Created rate limiter for CMTS");
        sem
    }

    /// Acquire one upgrade slot at the given CMTS. The permit releases the
    /// slot on drop, covering every worker exit path.
    pub async fn acquire(&self, cmts_id: i64) -> OwnedSemaphorePermit {
        let sem = self.semaphore(cmts_id).await;
        sem.acquire_owned()
            .await
            .expect("CMTS semaphore never closes")
    }

    /// Free slots currently available for a CMTS (test observability).
    pub async fn available(&self, cmts_id: i64) -> usize {
        self.semaphore(cmts_id).await.available_permits()
    }
}
