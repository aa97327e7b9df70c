//! Task queues: the mutex-guarded global overflow queue and the per-worker
//! Chase–Lev steal deque.

use crate::runtime::ebr::{self, LocalState, Retired};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicIsize, AtomicPtr, Ordering};
use std::sync::Arc;

/// The detach/adopt contract queues move elements through. `into_raw`
/// surrenders ownership into a bare pointer without touching any reference
/// count; `from_raw` claims it back without incrementing. Every pointer put
/// into a queue comes back out exactly once.
pub(crate) trait Slot: Send {
    fn into_raw(self) -> *mut ();

    /// Safety: `ptr` must come from `into_raw` and be adopted only once.
    unsafe fn from_raw(ptr: *mut ()) -> Self;
}

/// Shared overflow queue. A mutex around a `VecDeque` is deliberately
/// boring: it is the cold path, and it is trivially correct.
pub(crate) struct GlobalQueue<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> GlobalQueue<T> {
    pub(crate) fn new() -> GlobalQueue<T> {
        GlobalQueue {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, item: T) {
        self.queue.lock().push_back(item);
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        self.queue.lock().drain(..).collect()
    }
}

/// One growable ring of slots. Readers may hold a stale `Buffer` pointer
/// after a grow, which is why retired buffers go through EBR.
struct Buffer {
    slots: Box<[AtomicPtr<()>]>,
    mask: usize,
}

impl Buffer {
    fn new(capacity: usize) -> Buffer {
        assert!(capacity.is_power_of_two());
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Buffer {
            slots,
            mask: capacity - 1,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn put(&self, index: isize, ptr: *mut ()) {
        self.slots[index as usize & self.mask].store(ptr, Ordering::Relaxed);
    }

    fn get(&self, index: isize) -> *mut () {
        self.slots[index as usize & self.mask].load(Ordering::Relaxed)
    }
}

const DEFAULT_CAPACITY: usize = 1024;

/// Chase–Lev work-stealing deque.
///
/// The worker that owns the deque pushes and pops at `bottom`; any other
/// thread steals at `top`. The single compare-and-swap on `top` is the only
/// arbitration point: at most one of an owner-pop and any steal claims the
/// last element.
///
/// Callers of `steal` (and `pop`, for symmetry with grows happening under
/// them) must be inside an EBR critical section; `push` may retire the old
/// buffer and needs none.
pub(crate) struct StealQueue<T: Slot> {
    /// Thieves' end. Contended; keep it off the owner's cache line.
    top: CachePadded<AtomicIsize>,

    /// Owner's end. Only the owner writes it.
    bottom: CachePadded<AtomicIsize>,

    buffer: AtomicPtr<Buffer>,

    /// The owning worker's reclamation state, used when a grow retires the
    /// previous buffer.
    ebr: Arc<LocalState>,

    _marker: PhantomData<T>,
}

impl<T: Slot> StealQueue<T> {
    pub(crate) fn new(ebr: Arc<LocalState>) -> StealQueue<T> {
        StealQueue::with_capacity(DEFAULT_CAPACITY, ebr)
    }

    pub(crate) fn with_capacity(capacity: usize, ebr: Arc<LocalState>) -> StealQueue<T> {
        StealQueue {
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
            buffer: AtomicPtr::new(Box::into_raw(Box::new(Buffer::new(capacity)))),
            ebr,
            _marker: PhantomData,
        }
    }

    /// Owner only.
    pub(crate) fn push(&self, item: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buffer = self.buffer.load(Ordering::Relaxed);

        unsafe {
            if b - t >= (*buffer).capacity() as isize - 1 {
                buffer = self.grow(buffer, b, t);
            }
            (*buffer).put(b, item.into_raw());
        }

        // Publish the slot before publishing the new bottom.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
    }

    /// Owner only. Restores `bottom` on a miss and after winning the
    /// last-element race.
    pub(crate) fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let buffer = self.buffer.load(Ordering::Relaxed);
        self.bottom.store(b, Ordering::Relaxed);

        // The fence orders the bottom store against the top load; owner-pop
        // and thief-steal race through disjoint variables and acquire/
        // release alone cannot order them.
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::SeqCst);

        if t <= b {
            let ptr = unsafe { (*buffer).get(b) };
            if t == b {
                // Last element: race the thieves for it.
                if self
                    .top
                    .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                    .is_err()
                {
                    self.bottom.store(b + 1, Ordering::Relaxed);
                    return None;
                }
                self.bottom.store(b + 1, Ordering::Relaxed);
            }
            Some(unsafe { T::from_raw(ptr) })
        } else {
            // Deque was empty.
            self.bottom.store(b + 1, Ordering::Relaxed);
            None
        }
    }

    /// Any thread. A lost race reads as empty; victims are retried by the
    /// scheduler's scan, not here.
    pub(crate) fn steal(&self) -> Option<T> {
        let t = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t < b {
            let buffer = self.buffer.load(Ordering::Acquire);
            let ptr = unsafe { (*buffer).get(t) };
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                return None;
            }
            Some(unsafe { T::from_raw(ptr) })
        } else {
            None
        }
    }

    /// Double the buffer, publish it, and retire the old one through EBR: a
    /// thief that loaded the old pointer before the publish may still be
    /// reading from it.
    unsafe fn grow(&self, old: *mut Buffer, b: isize, t: isize) -> *mut Buffer {
        let new = Box::into_raw(Box::new(Buffer::new((*old).capacity() * 2)));
        for i in t..b {
            (*new).put(i, (*old).get(i));
        }
        self.buffer.store(new, Ordering::Release);
        ebr::global().retire(&self.ebr, Retired::boxed(old));
        new
    }
}

impl<T: Slot> Drop for StealQueue<T> {
    fn drop(&mut self) {
        // Exclusive access here: workers are joined before their deques
        // drop. Adopt and drop whatever is left.
        while self.pop().is_some() {}
        drop(unsafe { Box::from_raw(self.buffer.load(Ordering::Relaxed)) });
    }
}

// Safety: slots hold detached pointers of `T: Send`; all index traffic is
// atomic. The owner-only discipline for push/pop is upheld by the worker.
unsafe impl<T: Slot> Send for StealQueue<T> {}
unsafe impl<T: Slot> Sync for StealQueue<T> {}
