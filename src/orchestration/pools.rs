// Named, semaphore-bounded worker pools
//
// The I/O pool (probes, byte fetches) and the compute pool (classification
// requests) are built once from config and never share a bound.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::config::Config;

#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over every item with at most `size` units in flight across all
    /// callers of this pool. Output order mirrors input order.
    pub async fn map_ordered<T, U, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = U>,
    {
        let tasks = items.into_iter().map(|item| {
            let permits = Arc::clone(&self.permits);
            let work = f(item);
            async move {
                // The semaphore is never closed, so acquire only fails in theory
                let _permit = permits.acquire_owned().await.ok();
                work.await
            }
        });
        join_all(tasks).await
    }
}

/// The two executors of a pipeline run
#[derive(Clone)]
pub struct WorkerPools {
    pub io: WorkerPool,
    pub compute: WorkerPool,
}

impl WorkerPools {
    pub fn new(io_size: usize, compute_size: usize) -> Self {
        Self {
            io: WorkerPool::new("io", io_size),
            compute: WorkerPool::new("compute", compute_size),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.io_pool_size(), config.compute_pool_size())
    }
}
