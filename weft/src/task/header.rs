use crate::task::state::State;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;

/// Function table through which the untyped runtime half drives the typed
/// task cell. One instance exists per spawned future type.
pub(crate) struct Vtable {
    /// Resume the task: run the state machine and poll the future. Consumes
    /// one reference.
    pub(super) poll: unsafe fn(NonNull<Header>),

    /// Hand the task (and the caller's reference) back to the scheduler it
    /// was spawned on.
    pub(super) schedule: unsafe fn(NonNull<Header>),

    /// Free the cell. Only called by the last `ref_dec`.
    pub(super) dealloc: unsafe fn(NonNull<Header>),

    /// Read the output into `dst` (a `*mut Poll<F::Output>`) if the task
    /// completed, otherwise park `waker` in the continuation slot.
    pub(super) try_read_output: unsafe fn(NonNull<Header>, *mut (), &Waker),
}

/// Hot, type-erased head of every task cell. This is the first field of
/// `Cell<F>` (`#[repr(C)]`), so a `NonNull<Header>` is the canonical opaque
/// task pointer that travels through queues, wakers and the reactor.
#[repr(C)]
pub(crate) struct Header {
    pub(super) state: State,
    pub(super) vtable: &'static Vtable,
    pub(super) id: u64,
}

impl Header {
    pub(super) fn new(vtable: &'static Vtable, initial_refs: usize) -> Header {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        Header {
            state: State::new(initial_refs),
            vtable,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}
