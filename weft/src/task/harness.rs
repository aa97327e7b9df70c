#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::cell::{Cell, Stage};
use crate::task::header::Header;
use crate::task::state::{EndPoll, StartPoll};
use crate::task::waker::waker_ref;
use crate::task::{Notified, RawTask};
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::process;
use std::ptr::NonNull;
use std::task::{Context, Poll, Waker};

/// Typed view over an erased task pointer. All functions here are the
/// monomorphized targets of the header vtable.
struct Harness<F: Future> {
    cell: NonNull<Cell<F>>,
}

impl<F: Future> Harness<F> {
    unsafe fn from_raw(ptr: NonNull<Header>) -> Harness<F> {
        Harness {
            cell: ptr.cast::<Cell<F>>(),
        }
    }

    fn header(&self) -> &Header {
        unsafe { &self.cell.as_ref().header }
    }

    fn cell(&self) -> &Cell<F> {
        unsafe { self.cell.as_ref() }
    }

    fn drop_reference(&self) {
        RawTask::from_ptr(self.cell.cast::<Header>()).drop_reference();
    }
}

/// Resume the task. The caller transfers one reference in.
///
/// The run-state machine makes this safe to call from any number of threads
/// at once: exactly one caller wins the poll, a resume landing mid-poll is
/// coalesced into a requeue, and a resume of a completed task is a no-op.
pub(super) unsafe fn poll<F>(ptr: NonNull<Header>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let harness = Harness::<F>::from_raw(ptr);

    match harness.header().state.start_poll() {
        StartPoll::Polling => {}
        StartPoll::Ignore => {
            harness.drop_reference();
            return;
        }
    }

    let waker = waker_ref(&ptr);
    let mut cx = Context::from_waker(&waker);

    // Stage access is exclusive while we hold RUNNING.
    let polled = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        match &mut *harness.cell().stage.get() {
            Stage::Pending(future) => Pin::new_unchecked(future).poll(&mut cx),
            _ => unreachable!("completed task won start_poll"),
        }
    }));

    match polled {
        Err(_) => {
            // Faults are not transported across task boundaries.
            tracing::error!(task = harness.header().id(), "task panicked, aborting");
            process::abort();
        }
        Ok(Poll::Ready(output)) => {
            // Replacing the stage drops the future in place.
            *harness.cell().stage.get() = Stage::Finished(output);
            harness.header().state.complete();

            let continuation = harness.cell().join_waker.lock().take();
            if let Some(w) = continuation {
                w.wake();
            }
            harness.drop_reference();
        }
        Ok(Poll::Pending) => match harness.header().state.end_poll() {
            EndPoll::Reschedule => schedule::<F>(ptr),
            EndPoll::Parked => harness.drop_reference(),
        },
    }
}

/// Requeue the task on the scheduler it was spawned on, transferring the
/// caller's reference into the queue.
pub(super) unsafe fn schedule<F>(ptr: NonNull<Header>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let harness = Harness::<F>::from_raw(ptr);
    let scheduler = harness.cell().scheduler.clone();
    scheduler.schedule(Notified::new(RawTask::from_ptr(ptr)));
}

pub(super) unsafe fn dealloc<F>(ptr: NonNull<Header>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    drop(Box::from_raw(ptr.cast::<Cell<F>>().as_ptr()));
}

/// `dst` must be a `*mut Poll<F::Output>`. Fills it with `Ready` when the
/// task has completed, otherwise parks `waker` in the continuation slot.
pub(super) unsafe fn try_read_output<F>(ptr: NonNull<Header>, dst: *mut (), waker: &Waker)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let harness = Harness::<F>::from_raw(ptr);

    if !harness.header().state.is_complete() {
        *harness.cell().join_waker.lock() = Some(waker.clone());

        // Completion may have raced past between the check and the store,
        // in which case our waker will never be taken. Re-check.
        if !harness.header().state.is_complete() {
            return;
        }
    }

    let stage = &mut *harness.cell().stage.get();
    match mem::replace(stage, Stage::Consumed) {
        Stage::Finished(output) => {
            *(dst as *mut Poll<F::Output>) = Poll::Ready(output);
        }
        _ => panic!("JoinHandle polled after completion"),
    }
}
