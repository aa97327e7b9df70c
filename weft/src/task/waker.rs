#![allow(unsafe_op_in_unsafe_fn)]

use crate::task::header::Header;
use crate::task::raw::RawTask;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops;
use std::ptr::NonNull;
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Borrowed waker handed to the future during a poll.
///
/// Since we pass a reference and not an owned waker, `drop` must never run
/// on this instance, hence the `ManuallyDrop`. Cloning it out of the
/// context is what takes an owned reference.
pub(super) struct WakerRef<'a> {
    waker: ManuallyDrop<Waker>,
    _p: PhantomData<&'a Header>,
}

pub(super) fn waker_ref(header: &NonNull<Header>) -> WakerRef<'_> {
    let waker = unsafe { ManuallyDrop::new(Waker::from_raw(raw_waker(*header))) };
    WakerRef {
        waker,
        _p: PhantomData,
    }
}

impl ops::Deref for WakerRef<'_> {
    type Target = Waker;

    fn deref(&self) -> &Waker {
        &self.waker
    }
}

unsafe fn clone_waker(ptr: *const ()) -> RawWaker {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    RawTask::from_ptr(header).ref_inc();
    raw_waker(header)
}

unsafe fn drop_waker(ptr: *const ()) {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    RawTask::from_ptr(header).drop_reference();
}

// Wake by consuming the waker: the waker's reference moves into the
// scheduler queue.
unsafe fn wake_by_val(ptr: *const ()) {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    RawTask::from_ptr(header).schedule();
}

// Wake without consuming the waker: take a fresh reference for the queue.
unsafe fn wake_by_ref(ptr: *const ()) {
    let header = NonNull::new_unchecked(ptr as *mut Header);
    let raw = RawTask::from_ptr(header);
    raw.ref_inc();
    raw.schedule();
}

static WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_by_val, wake_by_ref, drop_waker);

fn raw_waker(header: NonNull<Header>) -> RawWaker {
    RawWaker::new(header.as_ptr() as *const (), &WAKER_VTABLE)
}
