//! A worker is one OS thread bound to exactly one native handle set (a
//! render map, or a file-source handle). Jobs are closures submitted through
//! a blocking queue and run synchronously on the worker's own thread, which
//! is the thread MapLibre Native and the MBTiles file-source plugin require
//! for all calls against a handle they created.
//!
//! [`WorkerPool`] is the elastic min/max pool described in spec.md §4.3:
//! idle workers are reused, new ones are constructed up to `max`, and an
//! idle pool shrinks back to `min` after 30 seconds of inactivity.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify};

use crate::error::{Result, TileServerError};

const SHRINK_DELAY: Duration = Duration::from_secs(30);

type Job<H> = Box<dyn FnOnce(&mut H) + Send>;

/// One OS thread plus the native handle set it owns exclusively.
pub struct Worker<H> {
    tx: mpsc::Sender<Job<H>>,
    _thread: std::thread::JoinHandle<()>,
}

impl<H: Send + 'static> Worker<H> {
    fn spawn(mut handle: H) -> Self {
        let (tx, rx) = mpsc::channel::<Job<H>>();
        let thread = std::thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                job(&mut handle);
            }
        });
        Self {
            tx,
            _thread: thread,
        }
    }

    /// Enqueue `f` and await its result. A panic inside `f` is caught and
    /// surfaced as an error to the caller; the worker thread keeps running.
    pub async fn submit<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut H) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();

        let job: Job<H> = Box::new(move |handle: &mut H| {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(handle)))
                .unwrap_or_else(|_| Err(TileServerError::RenderError("worker job panicked".into())));
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(job)
            .map_err(|_| TileServerError::RenderError("worker thread has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| TileServerError::RenderError("worker dropped the job reply".into()))?
    }
}

/// Elastic min/max pool of [`Worker`]s sharing one factory closure.
pub struct WorkerPool<H> {
    factory: Arc<dyn Fn() -> Result<H> + Send + Sync>,
    min: usize,
    max: usize,
    idle: Mutex<VecDeque<Worker<H>>>,
    total: AtomicUsize,
    acquire_waiters: Notify,
    disposed: std::sync::atomic::AtomicBool,
    shrink_generation: AtomicUsize,
}

impl<H: Send + 'static> WorkerPool<H> {
    /// Construct a pool and eagerly spin up `min` workers in parallel.
    pub async fn new<F>(min: usize, max: usize, factory: F) -> Result<Arc<Self>>
    where
        F: Fn() -> Result<H> + Send + Sync + 'static,
    {
        let max = max.max(1);
        let min = min.min(max);
        let pool = Arc::new(Self {
            factory: Arc::new(factory),
            min,
            max,
            idle: Mutex::new(VecDeque::new()),
            total: AtomicUsize::new(0),
            acquire_waiters: Notify::new(),
            disposed: std::sync::atomic::AtomicBool::new(false),
            shrink_generation: AtomicUsize::new(0),
        });

        let mut eager = Vec::with_capacity(min);
        for _ in 0..min {
            let pool = pool.clone();
            eager.push(tokio::task::spawn_blocking(move || (pool.factory)()));
        }
        for handle in eager {
            let handle = handle
                .await
                .map_err(|e| TileServerError::RenderError(format!("worker init panicked: {e}")))??;
            let worker = Worker::spawn(handle);
            pool.idle.lock().await.push_back(worker);
            pool.total.fetch_add(1, Ordering::SeqCst);
        }

        Ok(pool)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Acquire a worker: reuse an idle one, construct a new one under `max`,
    /// or park until one is released.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledWorker<H>> {
        self.shrink_generation.fetch_add(1, Ordering::SeqCst);

        loop {
            if let Some(worker) = self.idle.lock().await.pop_front() {
                return Ok(PooledWorker {
                    worker: Some(worker),
                    pool: self.clone(),
                });
            }

            if self.total.load(Ordering::SeqCst) < self.max {
                let factory = self.factory.clone();
                let handle = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| TileServerError::RenderError(format!("worker spawn panicked: {e}")))??;
                self.total.fetch_add(1, Ordering::SeqCst);
                return Ok(PooledWorker {
                    worker: Some(Worker::spawn(handle)),
                    pool: self.clone(),
                });
            }

            self.acquire_waiters.notified().await;
        }
    }

    async fn release(self: &Arc<Self>, worker: Worker<H>) {
        if self.disposed.load(Ordering::SeqCst) {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        self.idle.lock().await.push_back(worker);
        self.acquire_waiters.notify_one();
        self.schedule_shrink();
    }

    fn schedule_shrink(self: &Arc<Self>) {
        let generation = self.shrink_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SHRINK_DELAY).await;
            if pool.shrink_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let mut idle = pool.idle.lock().await;
            if idle.len() != pool.total.load(Ordering::SeqCst) {
                return;
            }
            while pool.total.load(Ordering::SeqCst) > pool.min {
                if idle.pop_back().is_none() {
                    break;
                }
                pool.total.fetch_sub(1, Ordering::SeqCst);
            }
        });
    }

    /// Disable release-for-reuse; every subsequent release destroys the worker.
    pub async fn dispose(self: &Arc<Self>) {
        self.disposed.store(true, Ordering::SeqCst);
        let mut idle = self.idle.lock().await;
        let drained = idle.len();
        idle.clear();
        self.total.fetch_sub(drained, Ordering::SeqCst);
    }
}

/// A worker checked out of a pool; returns itself to the idle set on drop
/// unless the pool has been disposed.
pub struct PooledWorker<H: Send + 'static> {
    worker: Option<Worker<H>>,
    pool: Arc<WorkerPool<H>>,
}

impl<H: Send + 'static> PooledWorker<H> {
    pub async fn submit<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut H) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.worker
            .as_ref()
            .expect("worker present until drop")
            .submit(f)
            .await
    }
}

impl<H: Send + 'static> Drop for PooledWorker<H> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release(worker).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_respects_min_at_startup() {
        let pool = WorkerPool::new(2, 4, || Ok(0u32)).await.unwrap();
        assert_eq!(pool.total(), 2);
    }

    #[tokio::test]
    async fn pool_grows_up_to_max() {
        let pool = WorkerPool::new(0, 2, || Ok(0u32)).await.unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.total(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn job_result_round_trips() {
        let pool = WorkerPool::new(1, 1, || Ok(41u32)).await.unwrap();
        let worker = pool.acquire().await.unwrap();
        let result = worker.submit(|h: &mut u32| Ok(*h + 1)).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn panic_in_job_is_captured() {
        let pool = WorkerPool::new(1, 1, || Ok(0u32)).await.unwrap();
        let worker = pool.acquire().await.unwrap();
        let result = worker.submit(|_: &mut u32| -> Result<u32> { panic!("boom") }).await;
        assert!(result.is_err());
        // the thread must still be alive to serve a second job
        let again = worker.submit(|h: &mut u32| Ok(*h)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn dispose_destroys_on_release() {
        let pool = WorkerPool::new(1, 1, || Ok(0u32)).await.unwrap();
        let worker = pool.acquire().await.unwrap();
        pool.dispose().await;
        drop(worker);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.total(), 0);
    }
}
