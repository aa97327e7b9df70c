use crate::error::BuildError;
use crate::reactor::Reactor;
use crate::runtime::scheduler::{Handle, Scheduler};
use crate::task::JoinHandle;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

pub(crate) type ThreadNameFn = Arc<dyn Fn() -> String + Send + Sync + 'static>;

fn default_thread_name_fn() -> ThreadNameFn {
    let counter = Arc::new(AtomicUsize::new(0));
    Arc::new(move || {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        format!("weft-worker-{id}")
    })
}

/// Resolved runtime configuration handed to the scheduler.
pub(crate) struct Config {
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
}

/// Builds a [`Runtime`] with custom configuration.
pub struct Builder {
    /// The number of worker threads. Defaults to one per CPU core.
    worker_threads: Option<usize>,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the runtime.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            worker_threads: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
        }
    }

    /// Sets the number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `val` is 0.
    pub fn worker_threads(mut self, val: usize) -> Self {
        assert!(val > 0, "Worker threads cannot be set to 0");
        self.worker_threads = Some(val);
        self
    }

    /// Sets the name of threads spawned by the runtime's thread pool.
    ///
    /// The default names are "weft-worker-{N}".
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = Arc::new(move || val.clone());
        self
    }

    /// Sets a function used to generate the name of threads spawned by the
    /// runtime's thread pool.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = Arc::new(f);
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies a minimal stack size.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    /// Creates the configured `Runtime`, starting the reactor and the
    /// worker pool.
    ///
    /// The returned `Runtime` instance is ready to spawn tasks.
    pub fn try_build(self) -> Result<Runtime, BuildError> {
        let worker_threads = self.worker_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        let config = Config {
            worker_threads,
            thread_name: self.thread_name,
            thread_stack_size: self.thread_stack_size,
        };

        let reactor = Arc::new(Reactor::new().map_err(BuildError::Poller)?);
        let handle = Scheduler::new(reactor).into_handle();
        handle.start(&config)?;

        Ok(Runtime { handle })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .finish_non_exhaustive()
    }
}

/// A handle to the running scheduler and its worker pool.
///
/// Dropping the runtime shuts it down: the reactor exits, workers are woken
/// and joined, and every task still queued is released.
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    /// Submit a top-level task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a future to completion on the runtime, blocking the calling
    /// thread until it resolves.
    ///
    /// # Panics
    ///
    /// Panics if the runtime shuts down before the future completes.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let _join = self.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv()
            .expect("the runtime shut down before the task completed")
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(err) = self.handle.shutdown() {
            tracing::error!(?err, "runtime shutdown reported errors");
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}
