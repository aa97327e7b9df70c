use crate::runtime::queue::Slot;
use crate::task::header::Header;
use crate::task::raw::RawTask;
use std::mem;
use std::ptr::NonNull;

/// An owning handle to a runnable task, worth exactly one reference.
///
/// `Notified` is what travels through the scheduler: the global queue holds
/// them directly, the steal deques hold them detached as raw pointers, and
/// a worker consumes one per resume.
pub(crate) struct Notified(RawTask);

impl Notified {
    pub(super) fn new(raw: RawTask) -> Notified {
        Notified(raw)
    }

    /// Duplicate the handle, incrementing the reference count.
    pub(crate) fn duplicate(&self) -> Notified {
        self.0.ref_inc();
        Notified(self.0)
    }

    /// Detach: yield the raw pointer without touching the count. Ownership
    /// of this handle's reference moves into the pointer; it must come back
    /// through [`Notified::adopt`].
    pub(crate) fn detach(self) -> NonNull<Header> {
        let ptr = self.0.header_ptr();
        mem::forget(self);
        ptr
    }

    /// Adopt: reconstitute a handle from a detached pointer without
    /// incrementing.
    pub(crate) fn adopt(ptr: NonNull<Header>) -> Notified {
        Notified(RawTask::from_ptr(ptr))
    }

    pub(crate) fn id(&self) -> u64 {
        self.0.id()
    }

    /// Resume the task, consuming this handle.
    pub(crate) fn run(self) {
        let raw = self.0;
        mem::forget(self);
        raw.poll();
    }
}

impl Drop for Notified {
    fn drop(&mut self) {
        self.0.drop_reference();
    }
}

impl Slot for Notified {
    fn into_raw(self) -> *mut () {
        self.detach().as_ptr().cast::<()>()
    }

    unsafe fn from_raw(ptr: *mut ()) -> Notified {
        Notified::adopt(NonNull::new_unchecked(ptr.cast::<Header>()))
    }
}

// Safety: the cell is fully synchronized (atomic state machine plus mutexed
// slots) and spawning requires `F: Send`.
unsafe impl Send for Notified {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;
    use crate::task::new_task;

    #[test]
    fn detach_adopt_preserves_the_count() {
        let runtime = Builder::new().worker_threads(1).try_build().unwrap();
        let (task, join) = new_task(async {}, runtime.handle().clone());

        let before = task.0.header().state.ref_count();
        let ptr = task.detach();
        let task = Notified::adopt(ptr);
        assert_eq!(task.0.header().state.ref_count(), before);

        drop(join);
        drop(task);
    }

    #[test]
    fn duplicate_and_drop_balance() {
        let runtime = Builder::new().worker_threads(1).try_build().unwrap();
        let (task, join) = new_task(async {}, runtime.handle().clone());

        let before = task.0.header().state.ref_count();
        let copy = task.duplicate();
        assert_eq!(task.0.header().state.ref_count(), before + 1);
        drop(copy);
        assert_eq!(task.0.header().state.ref_count(), before);

        drop(join);
        drop(task);
    }
}
