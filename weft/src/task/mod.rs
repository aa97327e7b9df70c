//! The task module.
//!
//! A spawned future lives in a single heap allocation (the [`cell::Cell`])
//! holding the hot [`Header`] first, the scheduler handle used to requeue
//! the task, the join waker, and the future itself (later its output).
//!
//! Reference counting rules:
//!
//! - A task is created with two references: the [`Notified`] handle that
//!   enters the scheduler queues and the [`JoinHandle`] returned to the
//!   spawner.
//! - Every waker cloned from the task's context owns one reference.
//! - Queues never touch the count: a `Notified` moves through them as a raw
//!   pointer via [`Notified::into_raw`] / [`Notified::from_raw`], the two
//!   halves of one ownership transfer.
//! - The cell is deallocated exactly once, when the count reaches zero.

mod cell;
mod harness;
mod header;
mod join;
mod raw;
mod state;
mod task;
mod waker;

pub(crate) use header::Header;
pub(crate) use raw::RawTask;
pub(crate) use task::Notified;

pub use join::JoinHandle;

use crate::runtime::scheduler::Handle;
use std::future::Future;

/// Allocate a new task cell bound to `scheduler` and hand back the two
/// initial references.
pub(crate) fn new_task<F>(future: F, scheduler: Handle) -> (Notified, JoinHandle<F::Output>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let raw = RawTask::new(future, scheduler);
    let join = JoinHandle::new(raw);
    (Notified::new(raw), join)
}
