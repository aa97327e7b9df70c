use crate::runtime::scheduler::Handle;
use crate::task::harness;
use crate::task::header::{Header, Vtable};
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::future::Future;
use std::ptr::NonNull;
use std::task::Waker;

/// What the storage slot currently holds. The future is replaced by its
/// output at completion and the output is taken at most once by the
/// `JoinHandle`.
pub(super) enum Stage<F: Future> {
    Pending(F),
    Finished(F::Output),
    Consumed,
}

/// The single allocation backing a task.
///
/// `Header` must stay the first field: `NonNull<Header>` and
/// `NonNull<Cell<F>>` are two views of the same pointer, and the vtable in
/// the header is what recovers the typed view.
#[repr(C)]
pub(super) struct Cell<F: Future> {
    pub(super) header: Header,

    /// Where wakeups send the task. Cloned out on every requeue.
    pub(super) scheduler: Handle,

    /// The continuation slot: the waker of whoever awaits the `JoinHandle`.
    /// One-shot, taken at completion.
    pub(super) join_waker: Mutex<Option<Waker>>,

    /// Guarded by the run-state machine: only the thread that won
    /// `start_poll` (or the `JoinHandle` after observing completion)
    /// touches it.
    pub(super) stage: UnsafeCell<Stage<F>>,
}

impl<F> Cell<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    /// Allocate the cell with `initial_refs` outstanding references and
    /// return the erased header pointer.
    pub(super) fn alloc(future: F, scheduler: Handle, initial_refs: usize) -> NonNull<Header> {
        let cell = Box::new(Cell {
            header: Header::new(vtable::<F>(), initial_refs),
            scheduler,
            join_waker: Mutex::new(None),
            stage: UnsafeCell::new(Stage::Pending(future)),
        });
        // The pointer is reconstituted by `Harness::dealloc`.
        unsafe { NonNull::new_unchecked(Box::into_raw(cell).cast::<Header>()) }
    }
}

fn vtable<F>() -> &'static Vtable
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    &Vtable {
        poll: harness::poll::<F>,
        schedule: harness::schedule::<F>,
        dealloc: harness::dealloc::<F>,
        try_read_output: harness::try_read_output::<F>,
    }
}
