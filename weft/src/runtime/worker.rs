use crate::context;
use crate::runtime::ebr::{self, LocalState};
use crate::runtime::parker::Parker;
use crate::runtime::queue::StealQueue;
use crate::runtime::scheduler::Handle;
use crate::task::Notified;
use crossbeam_utils::Backoff;
use std::sync::Arc;

/// Global-queue retries before a worker commits to parking. A producer that
/// enqueues right after this worker's drain and before it parks must still
/// be observed; the short spin closes that window, and `spawn` waking a
/// worker after the push covers the rest.
const GLOBAL_SPIN_ROUNDS: usize = 50;

pub(crate) struct Worker {
    id: usize,

    /// Local Chase–Lev deque. This worker owns the bottom end; everyone
    /// else steals from the top through [`Worker::steal`].
    deque: StealQueue<Notified>,

    parker: Parker,

    /// Read-side reclamation state; entered around every queue scan.
    ebr: Arc<LocalState>,

    #[cfg(test)]
    pub(crate) polls: std::sync::atomic::AtomicUsize,
}

impl Worker {
    pub(crate) fn new(id: usize) -> Worker {
        let ebr = ebr::global().register();
        Worker {
            id,
            deque: StealQueue::new(ebr.clone()),
            parker: Parker::new(),
            ebr,
            #[cfg(test)]
            polls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn wake(&self) {
        self.parker.unpark();
    }

    /// Push onto the local deque. Owner thread only; wakeups raised off
    /// this worker go through the scheduler instead.
    pub(crate) fn schedule(&self, task: Notified) {
        self.deque.push(task);
    }

    /// Thief side of the local deque, called by other workers.
    pub(crate) fn steal(&self) -> Option<Notified> {
        self.deque.steal()
    }

    pub(crate) fn run(self: &Arc<Self>, handle: Handle) {
        context::enter(handle.clone(), Some(self.clone()));
        tracing::debug!(worker = self.id, "worker started");

        while handle.is_running() {
            self.run_once(&handle);
        }

        context::exit();
        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn run_once(&self, handle: &Handle) {
        let task = {
            let _guard = ebr::global().enter(&self.ebr);
            self.deque
                .pop()
                .or_else(|| handle.pop_global())
                .or_else(|| handle.steal(self.id))
        };

        if let Some(task) = task {
            self.poll_task(task);
            return;
        }

        let backoff = Backoff::new();
        for _ in 0..GLOBAL_SPIN_ROUNDS {
            if !handle.is_running() {
                return;
            }
            let task = {
                let _guard = ebr::global().enter(&self.ebr);
                handle.pop_global()
            };
            if let Some(task) = task {
                self.poll_task(task);
                return;
            }
            backoff.snooze();
        }

        tracing::trace!(worker = self.id, "parking");
        self.parker.park();
    }

    fn poll_task(&self, task: Notified) {
        #[cfg(test)]
        self.polls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        task.run();
    }

    /// Release everything the worker still holds. Called by the scheduler
    /// after its thread has been joined.
    pub(crate) fn shutdown(&self) {
        while self.deque.pop().is_some() {}
        ebr::global().unregister(&self.ebr);
    }
}
