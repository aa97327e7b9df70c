use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// The task is suspended (or queued) and may be polled.
const IDLE: u8 = 0;
/// A worker is inside `poll` right now.
const RUNNING: u8 = 1;
/// A wakeup landed while the task was running; the runner must requeue it.
const NOTIFIED: u8 = 2;
/// The future returned `Ready`; the output sits in the stage.
const COMPLETE: u8 = 3;

/// Reference count plus the run-state machine of a task.
///
/// Both fields use sequentially consistent orderings throughout. Weaker
/// orderings would be correct for several of these operations but the count
/// and the run state are the only cross-thread fields of the task cell, and
/// keeping them seq-cst keeps the protocol auditable.
pub(super) struct State {
    refs: AtomicUsize,
    run: AtomicU8,
}

/// Outcome of trying to move into `RUNNING`.
pub(super) enum StartPoll {
    /// The caller now owns the poll; it must call `complete` or `end_poll`.
    Polling,
    /// Someone else is polling or the task already completed. If the task
    /// was running, the wakeup has been recorded as `NOTIFIED` and the
    /// runner will requeue it, so the caller just releases its reference.
    Ignore,
}

/// Outcome of finishing a poll that returned `Pending`.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum EndPoll {
    /// Nothing arrived during the poll.
    Parked,
    /// A wakeup was coalesced into `NOTIFIED` while polling; the runner
    /// must hand its reference back to the scheduler.
    Reschedule,
}

impl State {
    /// A task starts with one reference per initial handle (the queued
    /// `Notified` and the `JoinHandle`).
    pub(super) fn new(initial_refs: usize) -> State {
        State {
            refs: AtomicUsize::new(initial_refs),
            run: AtomicU8::new(IDLE),
        }
    }

    pub(super) fn ref_inc(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true when this release dropped the last reference, i.e. the
    /// caller must deallocate the cell.
    pub(super) fn ref_dec(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(super) fn start_poll(&self) -> StartPoll {
        let mut cur = self.run.load(Ordering::SeqCst);
        loop {
            match cur {
                IDLE => match self.run.compare_exchange(
                    IDLE,
                    RUNNING,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return StartPoll::Polling,
                    Err(actual) => cur = actual,
                },
                RUNNING => match self.run.compare_exchange(
                    RUNNING,
                    NOTIFIED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return StartPoll::Ignore,
                    Err(actual) => cur = actual,
                },
                // Already notified or complete: the wakeup is covered.
                _ => return StartPoll::Ignore,
            }
        }
    }

    pub(super) fn end_poll(&self) -> EndPoll {
        match self
            .run
            .compare_exchange(RUNNING, IDLE, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => EndPoll::Parked,
            Err(_) => {
                // The only other value reachable from RUNNING is NOTIFIED.
                self.run.store(IDLE, Ordering::SeqCst);
                EndPoll::Reschedule
            }
        }
    }

    /// Publish completion. The stage must already hold the output; the
    /// seq-cst store pairs with the load in [`State::is_complete`].
    pub(super) fn complete(&self) {
        self.run.store(COMPLETE, Ordering::SeqCst);
    }

    pub(super) fn is_complete(&self) -> bool {
        self.run.load(Ordering::SeqCst) == COMPLETE
    }

    #[cfg(test)]
    pub(super) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_poll_is_exclusive() {
        let state = State::new(1);
        assert!(matches!(state.start_poll(), StartPoll::Polling));
        // A second resume while running is recorded, not run.
        assert!(matches!(state.start_poll(), StartPoll::Ignore));
        assert_eq!(state.end_poll(), EndPoll::Reschedule);
    }

    #[test]
    fn quiet_poll_parks() {
        let state = State::new(1);
        assert!(matches!(state.start_poll(), StartPoll::Polling));
        assert_eq!(state.end_poll(), EndPoll::Parked);
    }

    #[test]
    fn resume_after_complete_is_noop() {
        let state = State::new(1);
        assert!(matches!(state.start_poll(), StartPoll::Polling));
        state.complete();
        assert!(state.is_complete());
        assert!(matches!(state.start_poll(), StartPoll::Ignore));
    }

    #[test]
    fn ref_dec_reports_last_release() {
        let state = State::new(2);
        assert!(!state.ref_dec());
        assert!(state.ref_dec());
    }
}
