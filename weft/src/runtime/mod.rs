//! The multi-threaded scheduler: worker pool, queues, parker, reclamation
//! and the public runtime surface.

pub(crate) mod ebr;
pub(crate) mod parker;
pub(crate) mod queue;
pub(crate) mod scheduler;
pub(crate) mod worker;

#[allow(clippy::module_inception)]
mod runtime;
pub use runtime::{Builder, Runtime};

#[cfg(test)]
mod tests;

use crate::context;
use crate::task::JoinHandle;
use std::future::Future;

/// Spawn a task onto the runtime driving the current thread.
///
/// # Panics
///
/// Panics when called from outside a runtime (i.e. not from within a
/// spawned task).
#[track_caller]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    context::expect_handle().spawn(future)
}
