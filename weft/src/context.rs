//! Thread-local runtime context.
//!
//! Worker threads install their scheduler handle (and themselves) here so
//! that free functions like [`crate::spawn`] and the leaf futures (sleep,
//! net) can reach the runtime they are polled on, and so that wakeups
//! raised on a worker thread can land on that worker's local deque.

use crate::runtime::scheduler::Handle;
use crate::runtime::worker::Worker;
use std::cell::RefCell;
use std::sync::Arc;

pub(crate) struct Context {
    pub(crate) handle: Handle,
    pub(crate) worker: Option<Arc<Worker>>,
}

thread_local! {
    static CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

pub(crate) fn enter(handle: Handle, worker: Option<Arc<Worker>>) {
    CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = Some(Context { handle, worker });
    });
}

pub(crate) fn exit() {
    CONTEXT.with(|ctx| {
        *ctx.borrow_mut() = None;
    });
}

pub(crate) fn with_current<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Context) -> R,
{
    CONTEXT.with(|ctx| ctx.borrow().as_ref().map(f))
}

/// The scheduler handle of the runtime driving this thread.
#[track_caller]
pub(crate) fn expect_handle() -> Handle {
    with_current(|ctx| ctx.handle.clone())
        .expect("must be called from within a weft runtime (inside a spawned task)")
}
