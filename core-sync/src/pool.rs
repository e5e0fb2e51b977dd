//! # Worker Pool
//!
//! Bounded concurrency for media acquisition. Submitted tasks start
//! immediately as tokio tasks but wait on a semaphore before doing work, so
//! at most `concurrency` run at once and the rest count as queued.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

#[derive(Debug, Default)]
struct PoolState {
    queued: AtomicUsize,
    running: AtomicUsize,
    changed: Notify,
}

impl PoolState {
    fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub queued: usize,
    pub running: usize,
    pub concurrency: usize,
}

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    state: Arc<PoolState>,
    tracker: TaskTracker,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            state: Arc::new(PoolState::default()),
            tracker: TaskTracker::new(),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    /// Tasks holding a slot
    pub fn running(&self) -> usize {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queued: self.queued(),
            running: self.running(),
            concurrency: self.concurrency,
        }
    }

    /// Queue a task. Never blocks; a panicking task is logged and its slot freed.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let state = Arc::clone(&self.state);
        state.queued.fetch_add(1, Ordering::SeqCst);

        self.tracker.spawn(async move {
            let permit = semaphore.acquire_owned().await;
            state.queued.fetch_sub(1, Ordering::SeqCst);
            let Ok(permit) = permit else {
                state.notify();
                return;
            };
            state.running.fetch_add(1, Ordering::SeqCst);
            state.notify();

            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                error!("Worker task panicked");
            }

            drop(permit);
            state.running.fetch_sub(1, Ordering::SeqCst);
            state.notify();
        });
    }

    /// Wait until fewer than `limit` tasks are queued
    pub async fn wait_until_queue_below(&self, limit: usize) {
        loop {
            let changed = self.state.changed.notified();
            tokio::pin!(changed);
            // Register before checking so a wakeup in between is not lost
            changed.as_mut().enable();

            if self.queued() < limit {
                return;
            }
            changed.await;
        }
    }

    /// Wait until every submitted task has finished
    pub async fn wait_idle(&self) {
        debug!(queued = self.queued(), running = self.running(), "Draining worker pool");
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            pool.submit(async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }

        pool.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats(), PoolStats { queued: 0, running: 0, concurrency: 2 });
    }

    #[tokio::test]
    async fn test_wait_until_queue_below() {
        let pool = WorkerPool::new(1);
        let (release, gate) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = gate.await;
        });
        for _ in 0..3 {
            pool.submit(async {});
        }

        // One running, three waiting
        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.running() != 1 || pool.queued() != 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.wait_until_queue_below(1)).await;
        assert!(blocked.is_err());

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), pool.wait_until_queue_below(1))
            .await
            .unwrap();

        pool.wait_idle().await;
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_frees_its_slot() {
        let pool = WorkerPool::new(1);
        pool.submit(async { panic!("boom") });

        let (done, finished) = oneshot::channel();
        pool.submit(async move {
            let _ = done.send(());
        });

        tokio::time::timeout(Duration::from_secs(1), finished)
            .await
            .unwrap()
            .unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn test_pool_is_reusable_after_drain() {
        let pool = WorkerPool::new(4);
        pool.submit(async {});
        pool.wait_idle().await;

        let (done, finished) = oneshot::channel();
        pool.submit(async move {
            let _ = done.send(());
        });
        finished.await.unwrap();
        pool.wait_idle().await;
    }
}
