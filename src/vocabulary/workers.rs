//! Fixed set of threads that run backend calls for one vocabulary.
//!
//! Callers hand a job to the pool and wait for its result with a timeout.
//! A call that times out is marked abandoned; if it is still queued when a
//! worker picks it up, it is dropped without touching the backend. A hung
//! backend can therefore pin at most `size` threads, and once the queue is
//! full further calls fail fast as unavailable.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

use crate::search::backend::BackendError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Calls allowed to wait for a free worker, per worker.
const QUEUE_PER_WORKER: usize = 4;

pub struct BackendWorkers {
    jobs: Option<Sender<Job>>,
    size: usize,
}

impl BackendWorkers {
    pub fn new(name: &str, size: usize) -> Self {
        let (tx, rx) = bounded::<Job>(size.max(1) * QUEUE_PER_WORKER);
        let mut spawned = 0;
        for i in 0..size.max(1) {
            let rx = rx.clone();
            let spawn = std::thread::Builder::new()
                .name(format!("oboidx-{name}-{i}"))
                .spawn(move || work(rx));
            match spawn {
                Ok(_) => spawned += 1,
                Err(e) => tracing::error!(vocabulary = name, error = %e, "failed to spawn backend worker"),
            }
        }
        Self {
            jobs: (spawned > 0).then_some(tx),
            size: spawned,
        }
    }

    /// Threads actually running.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on a worker, waiting at most `timeout` for its result.
    pub fn run<T, F>(&self, op: &'static str, timeout: Duration, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    {
        let Some(jobs) = &self.jobs else {
            return Err(BackendError::Unavailable(format!("{op}: no backend workers")));
        };
        let abandoned = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded(1);
        let job: Job = {
            let abandoned = Arc::clone(&abandoned);
            Box::new(move || {
                if abandoned.load(Ordering::SeqCst) {
                    return;
                }
                let _ = tx.send(f());
            })
        };
        match jobs.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(BackendError::Unavailable(format!(
                    "{op}: all {} backend workers are busy",
                    self.size
                )));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(BackendError::Unavailable(format!("{op}: backend workers stopped")));
            }
        }
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(BackendError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::Unavailable(format!(
                "{op} worker exited without a result"
            ))),
        }
    }
}

fn work(jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("backend call panicked");
        }
    }
}

impl std::fmt::Debug for BackendWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendWorkers")
            .field("size", &self.size)
            .field("queued", &self.jobs.as_ref().map_or(0, Sender::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn returns_the_job_result() {
        let workers = BackendWorkers::new("test", 2);
        assert_eq!(workers.size(), 2);
        let out = workers.run("query", Duration::from_secs(5), || Ok(41 + 1));
        assert_eq!(out.unwrap(), 42);
    }

    #[test]
    fn panicking_job_is_unavailable_and_worker_survives() {
        let workers = BackendWorkers::new("test", 1);
        let out: Result<(), _> = workers.run("query", Duration::from_secs(5), || panic!("boom"));
        assert!(matches!(out, Err(BackendError::Unavailable(_))));
        assert_eq!(workers.run("query", Duration::from_secs(5), || Ok(1)).unwrap(), 1);
    }

    #[test]
    fn hung_calls_occupy_at_most_the_pool() {
        let workers = BackendWorkers::new("test", 1);
        let started = Arc::new(AtomicUsize::new(0));
        let slow = |started: Arc<AtomicUsize>| {
            move || {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(200));
                Ok::<(), BackendError>(())
            }
        };

        let timeout = Duration::from_millis(10);
        let first = workers.run("query", timeout, slow(started.clone()));
        assert!(matches!(first, Err(BackendError::Timeout(_))));
        while started.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..QUEUE_PER_WORKER {
            let queued = workers.run("query", timeout, slow(started.clone()));
            assert!(matches!(queued, Err(BackendError::Timeout(_))));
        }

        let before = Instant::now();
        let rejected = workers.run("query", timeout, slow(started.clone()));
        assert!(matches!(rejected, Err(BackendError::Unavailable(_))));
        assert!(before.elapsed() < Duration::from_millis(100));

        // queued calls whose callers gave up never reach the backend
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(workers.run("query", timeout, || Ok(7)).unwrap(), 7);
    }
}
