//! The reactor: a dedicated thread that owns the readiness poller and the
//! timer heap.
//!
//! Suspended I/O and sleep futures park their wakers here. Each waker holds
//! one task reference; firing it hands that reference back to the scheduler
//! through the task's own handle, re-entering the queueing pipeline.

mod poller;
mod timer;

use parking_lot::Mutex;
use poller::Poller;
use std::collections::BinaryHeap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;
use std::thread;
use std::time::Instant;
use timer::TimerEntry;

pub(crate) struct Reactor {
    poller: Poller,
    timers: Mutex<BinaryHeap<TimerEntry>>,
    running: AtomicBool,
}

impl Reactor {
    pub(crate) fn new() -> io::Result<Reactor> {
        Ok(Reactor {
            poller: Poller::new()?,
            timers: Mutex::new(BinaryHeap::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the reactor loop on its own thread.
    pub(crate) fn start(self: &Arc<Self>) -> io::Result<thread::JoinHandle<()>> {
        self.running.store(true, Ordering::Release);
        let reactor = self.clone();
        thread::Builder::new()
            .name("weft-reactor".into())
            .spawn(move || reactor.run())
    }

    /// Ask the loop to exit and kick the poller out of its wait. The caller
    /// joins the thread.
    pub(crate) fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.poller.wake();
        }
    }

    /// Drop every parked waker (timers and I/O registrations). Each waker
    /// holds a task reference; releasing them lets suspended tasks tear
    /// down. Only called once the loop thread has been joined.
    pub(crate) fn clear_pending(&self) {
        self.timers.lock().clear();
        self.poller.clear();
    }

    /// Arm a timer. Wakes the poller when the new entry became the earliest
    /// so the loop recomputes its sleep deadline; on a tie this wakes
    /// needlessly, which is harmless.
    pub(crate) fn add_timer(&self, deadline: Instant, waker: Waker) {
        let need_wake = {
            let mut timers = self.timers.lock();
            timers.push(TimerEntry { deadline, waker });
            timers
                .peek()
                .map(|earliest| earliest.deadline == deadline)
                .unwrap_or(false)
        };
        if need_wake {
            self.poller.wake();
        }
    }

    pub(crate) fn register_read(&self, fd: RawFd, waker: Waker) {
        self.poller.add_read(fd, waker);
    }

    pub(crate) fn register_write(&self, fd: RawFd, waker: Waker) {
        self.poller.add_write(fd, waker);
    }

    fn run(&self) {
        tracing::debug!("reactor started");

        while self.running.load(Ordering::Acquire) {
            // Sleep until the earliest timer (or forever when none).
            let timeout = self
                .timers
                .lock()
                .peek()
                .map(|earliest| earliest.deadline.saturating_duration_since(Instant::now()));

            if let Err(err) = self.poller.wait(timeout, |waker| waker.wake()) {
                tracing::error!(?err, "poller wait failed");
                break;
            }

            // Fire everything that expired; waking outside the lock keeps
            // requeue traffic off the timer heap.
            let mut fired = Vec::new();
            {
                let mut timers = self.timers.lock();
                let now = Instant::now();
                while timers.peek().map(|e| e.deadline <= now).unwrap_or(false) {
                    fired.push(timers.pop().expect("peeked entry vanished"));
                }
            }
            if !fired.is_empty() {
                tracing::trace!(count = fired.len(), "timers expired");
            }
            for entry in fired {
                entry.waker.wake();
            }
        }

        tracing::debug!("reactor stopped");
    }
}
