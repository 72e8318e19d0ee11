//! Independently sized resource pools shared by every pipeline stage.
//!
//! Browser renders are slow and memory-hungry, reasoning calls cost money,
//! plain GETs are cheap. Each gets its own semaphore so saturating one never
//! starves another. Permits are RAII guards: they return to the pool on every
//! exit path of the governed future, errors and cancellation included.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Browser,
    Fetch,
    Reasoning,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Fetch => "fetch",
            Self::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub browser: usize,
    pub fetch: usize,
    pub reasoning: usize,
    pub blocking: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            browser: 2,
            fetch: 10,
            reasoning: 5,
            blocking: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Error)]
#[error("{0} pool is closed")]
pub struct PoolClosed(pub Pool);

#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("blocking pool is closed")]
    Closed,
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Bounded gate in front of tokio's blocking threads, for synchronous work
/// such as HTML parsing that must not run on the event loop.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    slots: Arc<Semaphore>,
    size: usize,
}

impl BlockingPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub async fn run<F, T>(&self, work: F) -> Result<T, BlockingError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BlockingError::Closed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|err| BlockingError::Join(err.to_string()))
    }

    fn close(&self) {
        self.slots.close();
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    browser: Arc<Semaphore>,
    fetch: Arc<Semaphore>,
    reasoning: Arc<Semaphore>,
    blocking: BlockingPool,
    sizes: PoolSizes,
}

impl Default for ConcurrencyGovernor {
    fn default() -> Self {
        Self::new(PoolSizes::default())
    }
}

impl ConcurrencyGovernor {
    pub fn new(sizes: PoolSizes) -> Self {
        let sizes = PoolSizes {
            browser: sizes.browser.max(1),
            fetch: sizes.fetch.max(1),
            reasoning: sizes.reasoning.max(1),
            blocking: sizes.blocking.max(1),
        };
        Self {
            browser: Arc::new(Semaphore::new(sizes.browser)),
            fetch: Arc::new(Semaphore::new(sizes.fetch)),
            reasoning: Arc::new(Semaphore::new(sizes.reasoning)),
            blocking: BlockingPool::new(sizes.blocking),
            sizes,
        }
    }

    pub fn sizes(&self) -> PoolSizes {
        self.sizes
    }

    pub fn blocking(&self) -> &BlockingPool {
        &self.blocking
    }

    fn semaphore(&self, pool: Pool) -> &Arc<Semaphore> {
        match pool {
            Pool::Browser => &self.browser,
            Pool::Fetch => &self.fetch,
            Pool::Reasoning => &self.reasoning,
        }
    }

    pub fn capacity(&self, pool: Pool) -> usize {
        match pool {
            Pool::Browser => self.sizes.browser,
            Pool::Fetch => self.sizes.fetch,
            Pool::Reasoning => self.sizes.reasoning,
        }
    }

    /// Slots currently held in `pool`.
    pub fn in_flight(&self, pool: Pool) -> usize {
        self.capacity(pool)
            .saturating_sub(self.semaphore(pool).available_permits())
    }

    pub async fn acquire(&self, pool: Pool) -> Result<OwnedSemaphorePermit, PoolClosed> {
        self.semaphore(pool)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed(pool))
    }

    /// Runs `work` while holding one slot of `pool`.
    pub async fn governed<F, T>(&self, pool: Pool, work: F) -> Result<T, PoolClosed>
    where
        F: Future<Output = T>,
    {
        let permit = self.acquire(pool).await?;
        trace!(pool = pool.as_str(), in_flight = self.in_flight(pool), "slot acquired");
        let out = work.await;
        drop(permit);
        Ok(out)
    }

    /// Closes every pool; queued and future acquisitions fail with [`PoolClosed`].
    pub fn shutdown(&self) {
        self.browser.close();
        self.fetch.close();
        self.reasoning.close();
        self.blocking.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn governed_work_never_exceeds_pool_size() {
        let governor = Arc::new(ConcurrencyGovernor::new(PoolSizes {
            browser: 2,
            ..PoolSizes::default()
        }));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let governor = governor.clone();
            let current = current.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                governor
                    .governed(Pool::Browser, async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .expect("pool open");
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(governor.in_flight(Pool::Browser), 0);
    }

    #[tokio::test]
    async fn permit_is_released_when_work_fails() {
        let governor = ConcurrencyGovernor::new(PoolSizes {
            reasoning: 1,
            ..PoolSizes::default()
        });
        let failed: Result<Result<(), &str>, PoolClosed> =
            governor.governed(Pool::Reasoning, async { Err("boom") }).await;
        assert!(matches!(failed, Ok(Err("boom"))));
        assert_eq!(governor.in_flight(Pool::Reasoning), 0);
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let governor = ConcurrencyGovernor::default();
        governor.shutdown();
        assert!(governor.governed(Pool::Fetch, async {}).await.is_err());
        assert!(governor.blocking().run(|| 1).await.is_err());
    }

    #[tokio::test]
    async fn blocking_pool_runs_synchronous_work() {
        let pool = BlockingPool::new(0);
        assert_eq!(pool.size(), 1);
        let out = pool.run(|| "parsed".len()).await.expect("run");
        assert_eq!(out, 6);
    }
}
