//! Heap dump session lifecycle.
//!
//! A [`SessionController`] owns one [`WorkerExecutor`] and one [`SessionState`]. The load runs
//! on the worker; the result is published into the state exactly once; teardown closes the
//! graph before the worker is shut down, including when the load finishes after teardown.

use crate::domain::SessionId;
use crate::infra::executor::{ExecutorError, WorkerExecutor, lock};
use std::error::Error as StdError;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// An open heap graph holding resources that must be released explicitly.
pub trait GraphHandle: Send + 'static {
    fn close(self);
}

pub trait HeapDumpParser: Send + 'static {
    type Graph: GraphHandle;
    type Error: StdError;

    fn parse(&self, path: &Path) -> Result<Self::Graph, Self::Error>;
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_cause(cause: &dyn StdError) -> Self {
        Self::new(cause.to_string())
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug)]
pub enum LoadResult<G> {
    Loaded(G),
    Failed(LoadError),
}

/// Borrowed view of a session's state, valid for the duration of [`SessionState::read`].
#[derive(Debug)]
pub enum LoadState<'a, G> {
    Loading,
    Loaded(&'a G),
    Failed(&'a LoadError),
    Closed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoadStatus {
    Loading,
    Loaded,
    Failed(LoadError),
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    Loading,
    LoadingTeardownRequested,
    Loaded,
    Failed,
    Closed,
}

#[derive(Debug, Eq, Error, PartialEq)]
pub enum PublishError {
    #[error("session state was already published")]
    AlreadyPublished,
}

type Observer = Box<dyn FnOnce(&LoadStatus) + Send + 'static>;

enum Slot<G> {
    Loading {
        release_requested: bool,
        observers: Vec<Observer>,
    },
    Loaded(G),
    Failed(LoadError),
    Closed,
}

impl<G> Slot<G> {
    fn status(&self) -> LoadStatus {
        match self {
            Self::Loading { .. } => LoadStatus::Loading,
            Self::Loaded(_) => LoadStatus::Loaded,
            Self::Failed(error) => LoadStatus::Failed(error.clone()),
            Self::Closed => LoadStatus::Closed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Release {
    /// The load is still running; its result will be released when published.
    Deferred,
    /// A published result was released now.
    Released,
    Noop,
}

/// Single-assignment cell for a session's load result.
///
/// Any number of readers, one publish. Publish and teardown linearise on the same lock, so a
/// reader sees either `Loading` or the complete terminal value.
pub struct SessionState<G> {
    slot: Mutex<Slot<G>>,
}

impl<G: GraphHandle> SessionState<G> {
    pub fn loading() -> Self {
        Self {
            slot: Mutex::new(Slot::Loading {
                release_requested: false,
                observers: Vec::new(),
            }),
        }
    }

    /// Hands `read` the latest published value. Never waits on the load itself.
    ///
    /// `read` runs under the state lock and must not call back into this state.
    pub fn read<R>(&self, read: impl FnOnce(LoadState<'_, G>) -> R) -> R {
        let slot = lock(&self.slot);
        let state = match &*slot {
            Slot::Loading { .. } => LoadState::Loading,
            Slot::Loaded(graph) => LoadState::Loaded(graph),
            Slot::Failed(error) => LoadState::Failed(error),
            Slot::Closed => LoadState::Closed,
        };
        read(state)
    }

    pub fn status(&self) -> LoadStatus {
        lock(&self.slot).status()
    }

    pub fn phase(&self) -> SessionPhase {
        match &*lock(&self.slot) {
            Slot::Loading {
                release_requested: false,
                ..
            } => SessionPhase::Loading,
            Slot::Loading {
                release_requested: true,
                ..
            } => SessionPhase::LoadingTeardownRequested,
            Slot::Loaded(_) => SessionPhase::Loaded,
            Slot::Failed(_) => SessionPhase::Failed,
            Slot::Closed => SessionPhase::Closed,
        }
    }

    /// Registers a one-shot observer for the terminal value.
    ///
    /// Before publish, it runs on the publishing thread once the value is in place. After
    /// publish, it runs immediately on the calling thread. Every observer runs exactly once; a
    /// session torn down before its load finished reports `Closed`.
    pub fn subscribe(&self, observer: impl FnOnce(&LoadStatus) + Send + 'static) {
        let mut slot = lock(&self.slot);
        if let Slot::Loading { observers, .. } = &mut *slot {
            observers.push(Box::new(observer));
            return;
        }
        let status = slot.status();
        drop(slot);
        observer(&status);
    }

    /// Stores the load result. Callable once; a graph passed to a rejected publish is closed.
    pub fn publish(&self, result: LoadResult<G>) -> Result<(), PublishError> {
        let mut slot = lock(&self.slot);
        let pending = match &mut *slot {
            Slot::Loading {
                release_requested,
                observers,
            } => Some((*release_requested, mem::take(observers))),
            _ => None,
        };
        let Some((release_requested, observers)) = pending else {
            drop(slot);
            if let LoadResult::Loaded(graph) = result {
                graph.close();
            }
            return Err(PublishError::AlreadyPublished);
        };

        if release_requested {
            if let LoadResult::Loaded(graph) = result {
                graph.close();
                debug!("closed heap graph that finished loading after teardown");
            }
            *slot = Slot::Closed;
        } else {
            *slot = match result {
                LoadResult::Loaded(graph) => Slot::Loaded(graph),
                LoadResult::Failed(error) => Slot::Failed(error),
            };
        }
        let status = slot.status();
        drop(slot);

        for observer in observers {
            observer(&status);
        }
        Ok(())
    }

    pub(crate) fn release(&self) -> Release {
        let mut slot = lock(&self.slot);
        match mem::replace(&mut *slot, Slot::Closed) {
            Slot::Loading {
                release_requested: false,
                observers,
            } => {
                *slot = Slot::Loading {
                    release_requested: true,
                    observers,
                };
                Release::Deferred
            }
            previous @ Slot::Loading { .. } => {
                *slot = previous;
                Release::Noop
            }
            Slot::Loaded(graph) => {
                graph.close();
                Release::Released
            }
            Slot::Failed(_) => Release::Released,
            Slot::Closed => Release::Noop,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartSessionError {
    #[error("failed to start heap dump loader: {0}")]
    Executor(#[from] ExecutorError),
}

/// Loads one heap dump on a dedicated worker and owns the result until teardown.
pub struct SessionController<G: GraphHandle> {
    id: SessionId,
    file_path: PathBuf,
    state: Arc<SessionState<G>>,
    executor: WorkerExecutor,
    torn_down: bool,
}

impl<G: GraphHandle> SessionController<G> {
    /// Schedules the load and returns without waiting for it.
    pub fn start<P>(file_path: PathBuf, parser: P) -> Result<Self, StartSessionError>
    where
        P: HeapDumpParser<Graph = G>,
    {
        let id = SessionId::new(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed));
        let executor = WorkerExecutor::new(format!("hprof-load-{id}"))?;
        let state = Arc::new(SessionState::loading());

        let task_state = Arc::clone(&state);
        let task_path = file_path.clone();
        executor.submit(move || run_load(&parser, &task_path, &task_state))?;
        info!(session = %id, path = %file_path.display(), "heap dump load scheduled");

        Ok(Self {
            id,
            file_path,
            state,
            executor,
            torn_down: false,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn state(&self) -> &SessionState<G> {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn worker_name(&self) -> &str {
        self.executor.name()
    }

    /// Closes the graph (now, or when a pending load completes) and shuts the worker down.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        match self.state.release() {
            Release::Deferred => {
                self.executor.shutdown();
                info!(
                    session = %self.id,
                    path = %self.file_path.display(),
                    "teardown requested while loading"
                );
            }
            Release::Released => {
                self.executor.shutdown_and_wait();
                info!(session = %self.id, path = %self.file_path.display(), "closed heap dump");
            }
            Release::Noop => self.executor.shutdown(),
        }
    }

    /// Waits for the worker thread to exit after teardown.
    pub fn await_released(&self, timeout: Duration) -> bool {
        self.executor.await_termination(timeout)
    }
}

impl<G: GraphHandle> Drop for SessionController<G> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_load<P: HeapDumpParser>(parser: &P, path: &Path, state: &SessionState<P::Graph>) {
    let started = Instant::now();
    let result = match parser.parse(path) {
        Ok(graph) => {
            info!(
                path = %path.display(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "heap dump loaded"
            );
            LoadResult::Loaded(graph)
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "heap dump failed to load");
            LoadResult::Failed(LoadError::from_cause(&error))
        }
    };

    if let Err(error) = state.publish(result) {
        panic!("heap dump session for {}: {error}", path.display());
    }
}
