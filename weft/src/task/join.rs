use crate::task::raw::RawTask;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Handle to a spawned task, resolving to the task's output.
///
/// Dropping the handle detaches the task: it keeps running to completion
/// and its output is dropped with the task cell. A `JoinHandle` is the only
/// reader of the output and must not be polled after it resolved.
pub struct JoinHandle<T> {
    raw: RawTask,
    _marker: PhantomData<T>,
}

impl<T> JoinHandle<T> {
    pub(super) fn new(raw: RawTask) -> JoinHandle<T> {
        JoinHandle {
            raw,
            _marker: PhantomData,
        }
    }

    /// The runtime-unique id of the task.
    pub fn id(&self) -> u64 {
        self.raw.id()
    }

    /// Whether the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.raw.header().state.is_complete()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut ret = Poll::Pending;

        // Safety: `dst` matches the output type the task was created with.
        unsafe {
            self.raw
                .try_read_output(&mut ret as *mut Poll<T> as *mut (), cx.waker());
        }

        ret
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        self.raw.drop_reference();
    }
}

impl<T> Unpin for JoinHandle<T> {}

// Safety: the handle only moves the (Send) output across threads; all cell
// access is synchronized by the task state machine.
unsafe impl<T: Send> Send for JoinHandle<T> {}
unsafe impl<T: Send> Sync for JoinHandle<T> {}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle").field("id", &self.id()).finish()
    }
}
