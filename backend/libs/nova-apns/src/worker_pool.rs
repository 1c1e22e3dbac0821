//! Long-lived pool of tokio workers fed by a bounded queue.
//!
//! Jobs are queued with `try_send`, so a full queue is reported to the caller
//! instead of blocking it. The pool lives as long as its owner and is torn
//! down only by [`WorkerPool::shutdown`], which lets queued jobs finish.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::WorkerPoolConfig;
use crate::error::{ApnsError, Result};

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct PoolShared {
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    live: AtomicUsize,
    busy: AtomicUsize,
    /// Jobs accepted by `submit` and not yet taken by a worker
    pending: AtomicUsize,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    capacity: usize,
    runtime: Handle,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the core workers. Must be called from within a Tokio runtime.
    pub fn new(config: WorkerPoolConfig, capacity: usize) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            ApnsError::Configuration(format!("APNs worker pool requires a Tokio runtime: {e}"))
        })?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pool = Self {
            config,
            capacity,
            runtime,
            sender: Mutex::new(Some(sender)),
            shared: Arc::new(PoolShared {
                receiver: tokio::sync::Mutex::new(receiver),
                live: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
        };

        for _ in 0..config.core_workers() {
            pool.shared.live.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None);
        }

        info!(
            core = config.core_workers(),
            max = config.max_workers(),
            capacity,
            "APNs worker pool started"
        );
        Ok(pool)
    }

    /// Queue a job. Fails with `QueueFull` or `PoolShutdown` without running it.
    pub fn submit(&self, job: Job) -> Result<()> {
        {
            let sender = self.sender.lock();
            let sender = sender.as_ref().ok_or(ApnsError::PoolShutdown)?;
            // Counted before the send so a worker can never take it first
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = sender.try_send(job) {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                return Err(match e {
                    TrySendError::Full(_) => ApnsError::QueueFull(self.capacity),
                    TrySendError::Closed(_) => ApnsError::PoolShutdown,
                });
            }
        }
        self.grow_if_saturated();
        Ok(())
    }

    /// Stop accepting jobs, let queued jobs drain, and wait for every worker.
    pub async fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        info!(workers = workers.len(), "Shutting down APNs worker pool");
        for worker in workers {
            if let Err(e) = worker.await {
                error!("APNs worker ended abnormally: {}", e);
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn busy_workers(&self) -> usize {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Jobs waiting in the queue
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Spawn an extra worker when queued plus running jobs outnumber the live
    /// workers and the elastic ceiling has not been reached.
    fn grow_if_saturated(&self) {
        let Some(idle) = self.config.idle_timeout() else {
            return;
        };
        let max = self.config.max_workers();

        let mut live = self.shared.live.load(Ordering::SeqCst);
        loop {
            let demand =
                self.shared.pending.load(Ordering::SeqCst) + self.shared.busy.load(Ordering::SeqCst);
            if live >= max || demand <= live {
                return;
            }
            match self.shared.live.compare_exchange(
                live,
                live + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => live = actual,
            }
        }

        debug!(live = live + 1, max, "Spawning extra APNs worker");
        self.spawn_worker(Some(idle));
    }

    fn spawn_worker(&self, idle: Option<Duration>) {
        let handle = self.runtime.spawn(run_worker(self.shared.clone(), idle));
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets workers drain and exit on their own
        self.sender.lock().take();
    }
}

async fn run_worker(shared: Arc<PoolShared>, idle: Option<Duration>) {
    loop {
        let next = async { shared.receiver.lock().await.recv().await };
        let job = match idle {
            Some(idle) => match tokio::time::timeout(idle, next).await {
                Ok(job) => job,
                Err(_) => {
                    debug!("Idle APNs worker retiring");
                    break;
                }
            },
            None => next.await,
        };

        let Some(job) = job else {
            break;
        };

        shared.busy.fetch_add(1, Ordering::SeqCst);
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("APNs worker job panicked");
        }
        shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
    shared.live.fetch_sub(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::oneshot;

    fn job<F>(f: F) -> Job
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Box::pin(f)
    }

    #[tokio::test]
    async fn test_runs_submitted_jobs() {
        let pool = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 2 }, 16).unwrap();
        let counter = Arc::new(AtomicU32::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(job(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_pool_survives_many_completions() {
        let pool = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 1 }, 4).unwrap();

        for i in 0..3 {
            let (tx, rx) = oneshot::channel();
            pool.submit(job(async move {
                let _ = tx.send(i);
            }))
            .unwrap();
            assert_eq!(rx.await.unwrap(), i);
        }

        assert!(!pool.is_shut_down());
        assert_eq!(pool.live_workers(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 1 }, 4).unwrap();
        pool.shutdown().await;

        let result = pool.submit(job(async {}));
        assert_eq!(result, Err(ApnsError::PoolShutdown));
        // A second shutdown is a no-op
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let pool = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 1 }, 1).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        pool.submit(job(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        }))
        .unwrap();
        started_rx.await.unwrap();

        // Worker busy, one slot in the queue
        pool.submit(job(async {})).unwrap();
        let result = pool.submit(job(async {}));
        assert_eq!(result, Err(ApnsError::QueueFull(1)));

        let _ = release_tx.send(());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 1 }, 4).unwrap();
        pool.submit(job(async { panic!("boom") })).unwrap();

        let (tx, rx) = oneshot::channel();
        pool.submit(job(async move {
            let _ = tx.send("still alive");
        }))
        .unwrap();

        assert_eq!(rx.await.unwrap(), "still alive");
        assert_eq!(pool.live_workers(), 1);
        pool.shutdown().await;
    }

    async fn wait_until(what: impl Fn() -> bool) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !what() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_elastic_pool_grows_on_back_to_back_burst() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::Elastic {
                core: 1,
                max: 3,
                idle: Duration::from_secs(5),
            },
            16,
        )
        .unwrap();

        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        let started = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let mut release = release_tx.subscribe();
            let started = started.clone();
            pool.submit(job(async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = release.recv().await;
            }))
            .unwrap();
        }

        assert!(
            wait_until(|| started.load(Ordering::SeqCst) == 3).await,
            "burst of 3 with max=3 should run concurrently, started {}",
            started.load(Ordering::SeqCst)
        );
        assert_eq!(pool.live_workers(), 3);
        assert_eq!(pool.pending_jobs(), 0);

        let _ = release_tx.send(());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_elastic_pool_stays_within_max() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::Elastic {
                core: 1,
                max: 2,
                idle: Duration::from_secs(5),
            },
            16,
        )
        .unwrap();

        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        let started = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let mut release = release_tx.subscribe();
            let started = started.clone();
            pool.submit(job(async move {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = release.recv().await;
            }))
            .unwrap();
        }

        assert!(wait_until(|| started.load(Ordering::SeqCst) == 2).await);
        assert_eq!(pool.live_workers(), 2);
        assert_eq!(pool.pending_jobs(), 3);

        let _ = release_tx.send(());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_extra_workers_retire_when_idle() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::Elastic {
                core: 1,
                max: 3,
                idle: Duration::from_millis(100),
            },
            16,
        )
        .unwrap();

        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        for _ in 0..3 {
            let mut release = release_tx.subscribe();
            pool.submit(job(async move {
                let _ = release.recv().await;
            }))
            .unwrap();
        }
        assert!(wait_until(|| pool.busy_workers() == 3).await);

        let _ = release_tx.send(());
        assert!(wait_until(|| pool.live_workers() == 1).await);

        pool.shutdown().await;
    }

    #[test]
    fn test_requires_runtime() {
        let result = WorkerPool::new(WorkerPoolConfig::Fixed { workers: 1 }, 4);
        assert!(matches!(result, Err(ApnsError::Configuration(_))));
    }
}
