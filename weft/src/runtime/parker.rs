use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const PARKED: u8 = 1;
const NOTIFIED: u8 = 2;

/// Per-worker blocking primitive with coalescing notifications.
///
/// Any number of `unpark` calls between two parks collapse into a single
/// token: the next `park` (or the one currently blocked) consumes it and
/// returns. An `unpark` issued before or during a `park` therefore always
/// releases that park.
pub(crate) struct Parker {
    state: AtomicU8,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Parker {
    pub(crate) fn new() -> Parker {
        Parker {
            state: AtomicU8::new(EMPTY),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Block until notified. Returns immediately when a token is already
    /// pending.
    pub(crate) fn park(&self) {
        if self
            .state
            .compare_exchange(EMPTY, PARKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let mut guard = self.mutex.lock();
            // Re-check under the lock: `unpark` stores NOTIFIED before it
            // takes the lock, so a wakeup cannot slip between the check and
            // the wait.
            while self.state.load(Ordering::Acquire) == PARKED {
                self.condvar.wait(&mut guard);
            }
        }

        // Either we were notified or a token was already pending; consume it.
        self.state.store(EMPTY, Ordering::Release);
    }

    /// Deposit a token and wake the parked thread, if any.
    pub(crate) fn unpark(&self) {
        let prev = self.state.swap(NOTIFIED, Ordering::AcqRel);
        if prev == PARKED {
            // Taking the lock orders this notify after the parker's
            // check-then-wait.
            drop(self.mutex.lock());
            self.condvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn unpark_before_park_returns_immediately() {
        let parker = Parker::new();
        parker.unpark();

        let start = Instant::now();
        parker.park();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn notifications_coalesce() {
        let parker = Parker::new();
        for _ in 0..10 {
            parker.unpark();
        }

        // One token: the first park consumes it, the second would block.
        parker.park();

        let parker = Arc::new(parker);
        let clone = parker.clone();
        let handle = thread::spawn(move || {
            clone.park();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "second park must block");
        parker.unpark();
        handle.join().unwrap();
    }

    #[test]
    fn unpark_during_park_releases_it() {
        let parker = Arc::new(Parker::new());
        let clone = parker.clone();

        let handle = thread::spawn(move || {
            clone.park();
        });

        // Give the thread a moment to actually block, then wake it.
        thread::sleep(Duration::from_millis(20));
        parker.unpark();
        handle.join().unwrap();
    }
}
