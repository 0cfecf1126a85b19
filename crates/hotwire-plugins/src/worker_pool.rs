//! Bounded handler worker pool
//!
//! Dedicated OS threads, started on demand up to a fixed maximum and retired
//! after sitting idle. Jobs beyond the worker ceiling wait in the queue. A job
//! that panics is contained on its worker and reported through its result
//! channel.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of a job: its return value, or the panic payload
pub type JobResult<R> = thread::Result<R>;

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,

    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub live_workers: usize,
    pub idle_workers: usize,
    pub queued: usize,
    pub completed: u64,
    pub panicked: u64,
}

struct PoolInner {
    name: String,
    max_workers: usize,
    keep_alive: Duration,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    live: AtomicUsize,
    idle: AtomicUsize,
    queued: AtomicUsize,
    next_id: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// Lazily grown, bounded thread pool
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self::with_keep_alive(name, max_workers, Duration::from_secs(60))
    }

    pub fn with_keep_alive(name: impl Into<String>, max_workers: usize, keep_alive: Duration) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                max_workers: max_workers.max(1),
                keep_alive,
                sender: Mutex::new(Some(sender)),
                receiver,
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        }
    }

    /// Queue `f` and return a receiver for its result.
    ///
    /// Dropping the receiver abandons the result; the job still runs to
    /// completion on its worker.
    pub fn submit<F, R>(&self, f: F) -> Result<oneshot::Receiver<JobResult<R>>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            if result.is_err() {
                inner.panicked.fetch_add(1, Ordering::Relaxed);
            }
            inner.completed.fetch_add(1, Ordering::Relaxed);
            let _ = tx.send(result);
        });

        {
            let sender = self.inner.sender.lock();
            let sender = sender.as_ref().ok_or(PoolError::ShutDown)?;
            self.inner.queued.fetch_add(1, Ordering::SeqCst);
            if sender.send(job).is_err() {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(PoolError::ShutDown);
            }
        }

        self.grow()?;
        Ok(rx)
    }

    /// Start a worker when queued work exceeds idle workers and the ceiling allows it.
    fn grow(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner.queued.load(Ordering::SeqCst) <= inner.idle.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut live = inner.live.load(Ordering::SeqCst);
        loop {
            if live >= inner.max_workers {
                return Ok(());
            }
            match inner
                .live
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(current) => live = current,
            }
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let worker = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", inner.name, id))
            .spawn(move || worker_loop(worker));

        if let Err(e) = spawned {
            inner.live.fetch_sub(1, Ordering::SeqCst);
            error!(pool = %inner.name, "failed to start worker: {}", e);
            if inner.live.load(Ordering::SeqCst) == 0 {
                return Err(PoolError::Spawn(e));
            }
        }
        Ok(())
    }

    /// Stop accepting work. Queued jobs still run; idle workers exit.
    pub fn shutdown(&self) {
        if self.inner.sender.lock().take().is_some() {
            debug!(pool = %self.inner.name, "worker pool shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        PoolStats {
            max_workers: inner.max_workers,
            live_workers: inner.live.load(Ordering::SeqCst),
            idle_workers: inner.idle.load(Ordering::SeqCst),
            queued: inner.queued.load(Ordering::SeqCst),
            completed: inner.completed.load(Ordering::Relaxed),
            panicked: inner.panicked.load(Ordering::Relaxed),
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        inner.idle.fetch_add(1, Ordering::SeqCst);
        let next = inner.receiver.recv_timeout(inner.keep_alive);
        inner.idle.fetch_sub(1, Ordering::SeqCst);

        match next {
            Ok(job) => {
                inner.queued.fetch_sub(1, Ordering::SeqCst);
                job();
            }
            Err(RecvTimeoutError::Timeout) if !inner.receiver.is_empty() => continue,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    inner.live.fetch_sub(1, Ordering::SeqCst);
}

/// Readable text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Instant;

    #[tokio::test]
    async fn runs_jobs_and_returns_results() {
        let pool = WorkerPool::new("test-worker", 4);
        let rx = pool.submit(|| 6 * 7).unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 42);
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let pool = WorkerPool::new("test-worker", 2);
        let rx = pool.submit(|| -> u32 { panic!("handler exploded") }).unwrap();
        let payload = rx.await.unwrap().unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "handler exploded");

        // the pool keeps working afterwards
        let rx = pool.submit(|| "still alive").unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), "still alive");
        assert_eq!(pool.stats().panicked, 1);
    }

    #[tokio::test]
    async fn never_exceeds_max_workers() {
        let pool = WorkerPool::new("test-worker", 3);
        let barrier = Arc::new(Barrier::new(3));
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let barrier = barrier.clone();
            receivers.push(pool.submit(move || {
                barrier.wait();
            }).unwrap());
        }
        // queued behind the three blocked workers until they are released
        let extra: Vec<_> = (0..5).map(|i| pool.submit(move || i).unwrap()).collect();

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }
        for (i, rx) in extra.into_iter().enumerate() {
            assert_eq!(rx.await.unwrap().unwrap(), i);
        }
        assert!(pool.stats().live_workers <= 3);
    }

    #[tokio::test]
    async fn slow_job_does_not_block_others() {
        let pool = WorkerPool::new("test-worker", 4);
        let _slow = pool.submit(|| thread::sleep(Duration::from_millis(500))).unwrap();

        let started = Instant::now();
        let fast = pool.submit(|| 1).unwrap();
        assert_eq!(fast.await.unwrap().unwrap(), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let pool = WorkerPool::new("test-worker", 1);
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert!(matches!(pool.submit(|| ()), Err(PoolError::ShutDown)));
    }

    #[test]
    fn idle_workers_retire() {
        let pool = WorkerPool::with_keep_alive("test-worker", 2, Duration::from_millis(50));
        let rx = pool.submit(|| ()).unwrap();
        rx.blocking_recv().unwrap().unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while pool.stats().live_workers > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.stats().live_workers, 0);
    }
}
