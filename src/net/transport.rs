//! Transport selection and event-loop groups.
//!
//! # Responsibilities
//! - Pick the I/O backend for this platform, honoring an explicit request
//! - Run fixed pools of single-threaded loops (one acceptor, N workers)
//! - Hand work to loops round-robin; a task stays on its loop for life
//!
//! # Design Decisions
//! - Each loop is a current-thread Tokio runtime driving a `LocalSet`, so
//!   connection state may use `Rc`/`RefCell` freely
//! - Shutdown closes the task queue, then waits up to a grace period for
//!   in-flight tasks before the loop thread exits
//! - Every loop drives Tokio's mio reactor, which uses epoll or kqueue on its own.
//!   The selected kind is validated and logged but never switches the backend;
//!   `poll` is accepted everywhere for that reason, and io_uring is always unavailable

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio_util::task::TaskTracker;

/// I/O multiplexing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    IoUring,
    Epoll,
    Kqueue,
    /// Whatever the platform's portable readiness API is.
    Poll,
}

impl TransportKind {
    /// Automatic selection order. io_uring is never picked unless requested.
    const PREFERENCE: [TransportKind; 3] = [TransportKind::Epoll, TransportKind::Kqueue, TransportKind::Poll];

    pub fn name(self) -> &'static str {
        match self {
            TransportKind::IoUring => "io_uring",
            TransportKind::Epoll => "epoll",
            TransportKind::Kqueue => "kqueue",
            TransportKind::Poll => "poll",
        }
    }

    /// Whether this build can drive the backend on the current platform.
    pub fn is_available(self) -> bool {
        match self {
            // The reactor is mio's; there is no completion-based driver in this build.
            TransportKind::IoUring => false,
            TransportKind::Epoll => cfg!(any(target_os = "linux", target_os = "android")),
            TransportKind::Kqueue => cfg!(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )),
            TransportKind::Poll => true,
        }
    }

    /// Choose the backend: the requested one if available, else the best one.
    pub fn select(requested: Option<TransportKind>) -> Result<TransportKind, TransportError> {
        match requested {
            Some(kind) if kind.is_available() => Ok(kind),
            Some(kind) => Err(TransportError::Unavailable(kind)),
            None => Ok(Self::PREFERENCE
                .into_iter()
                .find(|kind| kind.is_available())
                .unwrap_or(TransportKind::Poll)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport {0} was requested but is not available on this platform")]
    Unavailable(TransportKind),

    #[error("failed to start event loop: {0}")]
    Spawn(#[source] io::Error),

    #[error("event loop group `{0}` is shut down")]
    Closed(String),
}

/// Handle given to tasks running on a loop.
pub struct LoopHandle {
    index: usize,
    tracker: TaskTracker,
}

impl LoopHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Spawn a `!Send` task on this loop. Shutdown waits for it, within the grace period.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.tracker.spawn_local(task);
    }
}

/// Work submitted to a loop. Runs on the loop thread.
pub type Task = Box<dyn FnOnce(&LoopHandle) + Send + 'static>;

/// Cloneable submission side of an [`EventLoopGroup`].
///
/// Clones keep the loops' queues open, so drop them before shutting the group down.
#[derive(Clone)]
pub struct Dispatcher {
    name: Arc<str>,
    senders: Arc<[mpsc::UnboundedSender<Task>]>,
    next: Arc<AtomicUsize>,
}

impl Dispatcher {
    /// Submit a task to the next loop in round-robin order.
    pub fn execute(&self, task: Task) -> Result<(), TransportError> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.execute_on(index, task)
    }

    /// Submit a task to a specific loop.
    pub fn execute_on(&self, index: usize, task: Task) -> Result<(), TransportError> {
        self.senders[index % self.senders.len()]
            .send(task)
            .map_err(|_| TransportError::Closed(self.name.to_string()))
    }
}

/// A fixed pool of single-threaded event loops.
pub struct EventLoopGroup {
    dispatcher: Dispatcher,
    threads: Vec<JoinHandle<()>>,
}

impl EventLoopGroup {
    /// Start `threads` loops named `{name}-{index}`.
    pub fn new(name: &str, threads: usize, grace: Duration) -> Result<Self, TransportError> {
        let count = threads.max(1);
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(TransportError::Spawn)?;
            let (tx, rx) = mpsc::unbounded_channel();
            let thread = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || run_loop(runtime, index, rx, grace))
                .map_err(TransportError::Spawn)?;
            senders.push(tx);
            handles.push(thread);
        }

        tracing::debug!(group = name, threads = count, "Event loop group started");
        Ok(Self {
            dispatcher: Dispatcher {
                name: Arc::from(name),
                senders: senders.into(),
                next: Arc::new(AtomicUsize::new(0)),
            },
            threads: handles,
        })
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Submit a task to the next loop in round-robin order.
    pub fn execute(&self, task: Task) -> Result<(), TransportError> {
        self.dispatcher.execute(task)
    }

    /// Submit a task to a specific loop.
    pub fn execute_on(&self, index: usize, task: Task) -> Result<(), TransportError> {
        self.dispatcher.execute_on(index, task)
    }

    /// Close every loop's queue and join the threads.
    pub fn shutdown_gracefully(self) {
        let name = self.dispatcher.name.clone();
        drop(self.dispatcher);
        for thread in self.threads {
            if thread.join().is_err() {
                tracing::error!(group = %name, "Event loop thread panicked");
            }
        }
        tracing::debug!(group = %name, "Event loop group stopped");
    }
}

fn run_loop(
    runtime: tokio::runtime::Runtime,
    index: usize,
    mut rx: mpsc::UnboundedReceiver<Task>,
    grace: Duration,
) {
    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        let handle = LoopHandle {
            index,
            tracker: TaskTracker::new(),
        };
        while let Some(task) = rx.recv().await {
            task(&handle);
        }

        handle.tracker.close();
        if tokio::time::timeout(grace, handle.tracker.wait()).await.is_err() {
            tracing::debug!(
                remaining = handle.tracker.len(),
                "Grace period elapsed with tasks still running"
            );
        }
    });
}
