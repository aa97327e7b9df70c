//! Epoch-based reclamation.
//!
//! The steal deques publish a new buffer when they grow while thieves may
//! still be reading the old one. The old buffer is retired here and freed
//! only once every thread that could hold a stale pointer has provably left
//! its read-side critical section: a pointer retired at epoch `e` is
//! reclaimed when the global epoch has advanced twice past `e`.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Retirements between advancement attempts.
const ADVANCE_INTERVAL: usize = 64;

/// A pointer waiting to be reclaimed. Dropping it runs the deleter.
pub(crate) struct Retired {
    ptr: *mut (),
    deleter: unsafe fn(*mut ()),
}

impl Retired {
    pub(crate) fn boxed<T>(ptr: *mut T) -> Retired {
        unsafe fn drop_boxed<T>(ptr: *mut ()) {
            drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
        }

        Retired {
            ptr: ptr.cast::<()>(),
            deleter: drop_boxed::<T>,
        }
    }
}

impl Drop for Retired {
    fn drop(&mut self) {
        unsafe { (self.deleter)(self.ptr) }
    }
}

// Safety: a retired pointer is exclusively owned by the reclaimer; the
// deleter is the only remaining accessor.
unsafe impl Send for Retired {}

/// Per-thread reclamation state.
pub(crate) struct LocalState {
    /// True while the owning thread is inside a critical section.
    active: AtomicBool,

    /// The global epoch observed on entry, read by the advancer's scan.
    epoch: AtomicUsize,

    /// Retired pointers, indexed by epoch modulo three. Each bin carries
    /// its own lock so the advancer's clearing never races a lagging
    /// owner's append.
    bins: [Mutex<Vec<Retired>>; 3],

    /// Retirement counter; triggers an advancement attempt every
    /// [`ADVANCE_INTERVAL`] retirements.
    ops: AtomicUsize,
}

impl LocalState {
    fn new() -> LocalState {
        LocalState {
            active: AtomicBool::new(false),
            epoch: AtomicUsize::new(0),
            bins: [
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
                Mutex::new(Vec::new()),
            ],
            ops: AtomicUsize::new(0),
        }
    }
}

/// Read-side critical section. Readers of lock-free shared state hold one
/// for the whole read.
pub(crate) struct Guard<'a> {
    local: &'a LocalState,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.local.active.store(false, Ordering::Release);
    }
}

/// The process-wide reclaimer.
pub(crate) struct Reclaimer {
    global_epoch: AtomicUsize,
    threads: Mutex<Vec<Arc<LocalState>>>,
}

pub(crate) fn global() -> &'static Reclaimer {
    static GLOBAL: OnceLock<Reclaimer> = OnceLock::new();
    GLOBAL.get_or_init(|| Reclaimer {
        global_epoch: AtomicUsize::new(0),
        threads: Mutex::new(Vec::new()),
    })
}

impl Reclaimer {
    /// Register the calling worker. The returned state is used for every
    /// `enter`/`retire` by that worker.
    pub(crate) fn register(&self) -> Arc<LocalState> {
        let local = Arc::new(LocalState::new());
        self.threads.lock().push(local.clone());
        local
    }

    /// Remove a worker's state and flush everything it still holds. Only
    /// sound once no thread can be inside a critical section anymore, i.e.
    /// after the scheduler joined its workers.
    pub(crate) fn unregister(&self, local: &Arc<LocalState>) {
        let mut drained = Vec::new();
        {
            let mut threads = self.threads.lock();
            threads.retain(|t| !Arc::ptr_eq(t, local));
            for bin in &local.bins {
                drained.append(&mut bin.lock());
            }
        }
        drop(drained);
    }

    /// Enter a critical section: snapshot the global epoch, then publish
    /// activity with a seq-cst store that the advancer's seq-cst scan is
    /// guaranteed to observe.
    pub(crate) fn enter<'a>(&self, local: &'a LocalState) -> Guard<'a> {
        let epoch = self.global_epoch.load(Ordering::SeqCst);
        local.epoch.store(epoch, Ordering::SeqCst);
        local.active.store(true, Ordering::SeqCst);
        Guard { local }
    }

    /// Defer reclamation of `retired` until two epoch advancements have
    /// passed.
    pub(crate) fn retire(&self, local: &LocalState, retired: Retired) {
        let epoch = self.global_epoch.load(Ordering::SeqCst);
        local.bins[epoch % 3].lock().push(retired);

        let ops = local.ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % ADVANCE_INTERVAL == 0 {
            self.try_advance();
        }
    }

    /// Advance the global epoch if every active thread has caught up, then
    /// drain the bin that just became unreachable. Scanning and clearing
    /// both run under the manager lock, so two triggers cannot interleave.
    fn try_advance(&self) {
        let threads = self.threads.lock();
        let global = self.global_epoch.load(Ordering::SeqCst);

        for thread in threads.iter() {
            if thread.active.load(Ordering::SeqCst)
                && thread.epoch.load(Ordering::SeqCst) != global
            {
                // A reader is still in an older epoch; nothing is safe yet.
                return;
            }
        }

        let next = global + 1;
        self.global_epoch.store(next, Ordering::SeqCst);

        // (next + 1) % 3 is two epochs behind: no live critical section can
        // have seen anything retired into it.
        let stale = (next + 1) % 3;
        let mut drained = Vec::new();
        for thread in threads.iter() {
            drained.append(&mut thread.bins[stale].lock());
        }
        drop(threads);
        drop(drained);
    }

    #[cfg(test)]
    pub(crate) fn force_advance(&self) {
        self.try_advance();
    }
}
