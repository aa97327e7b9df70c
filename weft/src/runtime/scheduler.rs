use crate::context;
use crate::error::BuildError;
use crate::reactor::Reactor;
use crate::runtime::queue::GlobalQueue;
use crate::runtime::runtime::Config;
use crate::runtime::worker::Worker;
use crate::task::{self, JoinHandle, Notified};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

pub(crate) struct Scheduler {
    /// Overflow queue where new tasks and off-worker wakeups land.
    global: GlobalQueue<Notified>,

    /// The worker set, filled once during startup.
    workers: OnceLock<Vec<Arc<Worker>>>,

    reactor: Arc<Reactor>,

    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    reactor_thread: Mutex<Option<thread::JoinHandle<()>>>,

    /// Round-robin cursor for wake-ups; spreads bursts across cores.
    next_wake: AtomicUsize,

    stop: AtomicBool,
}

impl Scheduler {
    pub(crate) fn new(reactor: Arc<Reactor>) -> Scheduler {
        Scheduler {
            global: GlobalQueue::new(),
            workers: OnceLock::new(),
            reactor,
            threads: Mutex::new(Vec::new()),
            reactor_thread: Mutex::new(None),
            next_wake: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        }
    }

    pub(crate) fn into_handle(self) -> Handle {
        Handle(Arc::new(self))
    }
}

/// Cloneable reference to the scheduler. Every task cell holds one so that
/// its wakeups can find their way back here.
#[derive(Clone)]
pub(crate) struct Handle(Arc<Scheduler>);

impl Handle {
    /// Build the workers, start the reactor, then start each worker's
    /// thread.
    pub(crate) fn start(&self, config: &Config) -> Result<(), BuildError> {
        let workers: Vec<Arc<Worker>> = (0..config.worker_threads)
            .map(|id| Arc::new(Worker::new(id)))
            .collect();
        self.workers
            .set(workers.clone())
            .unwrap_or_else(|_| panic!("scheduler started twice"));

        let reactor_thread = self.reactor.start().map_err(BuildError::Thread)?;
        *self.reactor_thread.lock() = Some(reactor_thread);

        for worker in workers {
            let handle = self.clone();
            let mut builder = thread::Builder::new().name((config.thread_name)());
            if let Some(size) = config.thread_stack_size {
                builder = builder.stack_size(size);
            }
            match builder.spawn(move || worker.run(handle)) {
                Ok(join) => self.threads.lock().push(join),
                Err(err) => {
                    // Roll back whatever came up before the failure.
                    let _ = self.shutdown();
                    return Err(BuildError::Thread(err));
                }
            }
        }

        tracing::debug!(workers = config.worker_threads, "scheduler started");
        Ok(())
    }

    /// Submit a new task: push it on the global queue, then wake one worker.
    /// The push happens-before the wake, so the woken worker either sees
    /// the task in its next drain or consumes the pending parker token.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (task, join) = task::new_task(future, self.clone());

        if !self.is_running() {
            tracing::warn!("spawn on a shut down runtime; the task is dropped");
            return join;
        }

        tracing::trace!(task = task.id(), "spawn");
        self.global.push(task);
        self.wake_one();
        join
    }

    /// Re-queue a woken task. On a worker thread of this runtime the task
    /// lands on that worker's local deque; everywhere else (reactor,
    /// foreign threads) it goes through the global queue plus a wake-up.
    pub(crate) fn schedule(&self, task: Notified) {
        let mut task = Some(task);

        context::with_current(|ctx| {
            if let Some(worker) = &ctx.worker {
                if ctx.handle.ptr_eq(self) {
                    worker.schedule(task.take().expect("task consumed twice"));
                }
            }
        });

        if let Some(task) = task {
            self.global.push(task);
            self.wake_one();
        }
    }

    pub(crate) fn pop_global(&self) -> Option<Notified> {
        self.global.pop()
    }

    /// Scan every other worker once, starting from a uniformly random
    /// victim.
    pub(crate) fn steal(&self, thief: usize) -> Option<Notified> {
        let workers = self.workers();
        let n = workers.len();
        if n <= 1 {
            return None;
        }

        let start = fastrand::usize(..n);
        for i in 0..n {
            let victim = (start + i) % n;
            if victim == thief {
                continue;
            }
            if let Some(task) = workers[victim].steal() {
                return Some(task);
            }
        }
        None
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub(crate) fn ptr_eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stop the reactor, raise the stop flag, wake every worker and join
    /// the threads. Idempotent.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if self.stop.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!("scheduler shutting down");

        self.reactor.stop();
        let reactor_thread = self.reactor_thread.lock().take();
        let reactor_panicked = match reactor_thread {
            Some(thread) => thread.join().is_err(),
            None => false,
        };

        for worker in self.workers() {
            worker.wake();
        }

        let mut panicked = 0usize;
        for thread in self.threads.lock().drain(..) {
            if thread.join().is_err() {
                panicked += 1;
            }
        }

        // Tasks still sitting in queues or parked behind timers and I/O
        // registrations hold scheduler handles; dropping them here breaks
        // the cycle and releases their cells.
        drop(self.global.drain());
        for worker in self.workers() {
            worker.shutdown();
        }
        self.reactor.clear_pending();

        if reactor_panicked || panicked > 0 {
            return Err(anyhow!(
                "{panicked} worker thread(s) and reactor={reactor_panicked} panicked during shutdown"
            ));
        }
        Ok(())
    }

    fn wake_one(&self) {
        let workers = self.workers();
        if workers.is_empty() {
            return;
        }
        let index = self.next_wake.fetch_add(1, Ordering::Relaxed) % workers.len();
        workers[index].wake();
    }

    fn workers(&self) -> &[Arc<Worker>] {
        self.workers.get().map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub(crate) fn worker_polls(&self) -> Vec<usize> {
        self.workers()
            .iter()
            .map(|w| w.polls.load(Ordering::Relaxed))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn schedule_on_current_worker(&self, task: Notified) {
        context::with_current(|ctx| {
            ctx.worker
                .as_ref()
                .expect("not on a worker thread")
                .schedule(task)
        })
        .expect("no runtime context");
    }
}

impl Deref for Handle {
    type Target = Scheduler;

    fn deref(&self) -> &Scheduler {
        &self.0
    }
}
