use std::io;
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(io::Error),

    #[error("executor is shut down")]
    ShutDown,
}

/// A single background thread that runs submitted jobs one at a time, in submission order.
pub struct WorkerExecutor {
    name: String,
    queue: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    termination: Arc<Termination>,
}

#[derive(Default)]
struct Termination {
    done: Mutex<bool>,
    cond: Condvar,
}

struct TerminationGuard(Arc<Termination>);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        *lock(&self.0.done) = true;
        self.0.cond.notify_all();
    }
}

impl WorkerExecutor {
    pub fn new(name: impl Into<String>) -> Result<Self, ExecutorError> {
        let name = name.into();
        let (tx, rx) = channel::<Job>();
        let termination = Arc::new(Termination::default());
        let signal = Arc::clone(&termination);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = TerminationGuard(signal);
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .map_err(ExecutorError::Spawn)?;
        let worker_id = handle.thread().id();
        debug!(worker = %name, "worker started");

        Ok(Self {
            name,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            worker_id,
            termination,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ExecutorError> {
        let queue = lock(&self.queue);
        let Some(tx) = queue.as_ref() else {
            return Err(ExecutorError::ShutDown);
        };
        tx.send(Box::new(job)).map_err(|_| ExecutorError::ShutDown)
    }

    /// Stops accepting jobs. Jobs already queued still run; does not wait for them.
    pub fn shutdown(&self) {
        if lock(&self.queue).take().is_some() {
            debug!(worker = %self.name, "worker shutdown requested");
        }
    }

    /// Shuts down and joins the worker thread. A no-op join when called from the worker itself.
    pub fn shutdown_and_wait(&self) {
        self.shutdown();
        if thread::current().id() == self.worker_id {
            return;
        }

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }

    /// Waits until the worker thread has exited. Only returns `true` after a shutdown.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = lock(&self.termination.done);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .termination
                .cond
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            done = next;
        }
        true
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn runs_jobs_in_submission_order() {
        let executor = WorkerExecutor::new("test-order").expect("executor");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for value in 0..5 {
            let seen = Arc::clone(&seen);
            executor
                .submit(move || seen.lock().expect("lock").push(value))
                .expect("submit");
        }
        executor.shutdown_and_wait();

        assert_eq!(*seen.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let executor = WorkerExecutor::new("test-reject").expect("executor");
        executor.shutdown();

        assert!(matches!(executor.submit(|| {}), Err(ExecutorError::ShutDown)));
        assert!(executor.await_termination(WAIT));
    }

    #[test]
    fn shutdown_lets_queued_job_finish_without_blocking() {
        let executor = WorkerExecutor::new("test-drain").expect("executor");
        let (release_tx, release_rx) = channel::<()>();
        let (done_tx, done_rx) = channel::<()>();
        executor
            .submit(move || {
                let _ = release_rx.recv();
                let _ = done_tx.send(());
            })
            .expect("submit");

        executor.shutdown();
        assert!(!executor.await_termination(Duration::from_millis(20)));

        release_tx.send(()).expect("release");
        done_rx.recv_timeout(WAIT).expect("job ran");
        assert!(executor.await_termination(WAIT));
    }

    #[test]
    fn idle_shutdown_and_wait_returns_promptly() {
        let executor = WorkerExecutor::new("test-idle").expect("executor");
        let started = Instant::now();
        executor.shutdown_and_wait();

        assert!(started.elapsed() < WAIT);
        assert!(executor.await_termination(Duration::ZERO));
    }

    #[test]
    fn worker_thread_carries_executor_name() {
        let executor = WorkerExecutor::new("test-name").expect("executor");
        let (tx, rx) = channel::<Option<String>>();
        executor
            .submit(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            })
            .expect("submit");

        let name = rx.recv_timeout(WAIT).expect("name");
        assert_eq!(name.as_deref(), Some("test-name"));
        assert_eq!(executor.name(), "test-name");
    }
}
