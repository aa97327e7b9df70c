use parking_lot::Mutex as PlMutex;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// An asynchronous mutex.
///
/// Unlike a blocking mutex, a task that cannot acquire the lock is
/// suspended and woken when the mutex becomes available. Waiters are served
/// in strict FIFO order: unlocking with waiters present hands the lock
/// directly to the head of the queue without ever exposing an unlocked
/// state, so no late arrival can barge in between a release and the
/// pending acquisition. A new caller can take the fast path only when the
/// waiter queue is empty.
pub struct Mutex<T: ?Sized> {
    state: PlMutex<LockState>,
    value: UnsafeCell<T>,
}

struct LockState {
    locked: bool,
    waiters: VecDeque<Arc<Waiter>>,
}

struct Waiter {
    /// Set by the releasing task: the lock was handed to this waiter and
    /// `locked` was left true on its behalf.
    granted: AtomicBool,
    waker: PlMutex<Option<Waker>>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Mutex {
            state: PlMutex::new(LockState {
                locked: false,
                waiters: VecDeque::new(),
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the mutex, suspending the task until it is available.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
        }
    }

    /// Attempt to acquire the mutex without suspending.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            None
        } else {
            state.locked = true;
            Some(MutexGuard { mutex: self })
        }
    }

    /// Mutable access without locking; the exclusive borrow is proof
    /// enough.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn unlock(&self) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(waiter) => {
                // Baton passing: `locked` stays true, ownership moves
                // directly to the head waiter.
                waiter.granted.store(true, Ordering::Release);
                let waker = waiter.waker.lock().take();
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
            None => {
                state.locked = false;
            }
        }
    }
}

// Safety: the value is only reachable through a guard, and the guard's
// existence is serialized by the lock protocol.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

/// Future returned by [`Mutex::lock`].
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    waiter: Option<Arc<Waiter>>,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Already queued: either the baton arrived or we refresh the waker.
        if let Some(waiter) = &self.waiter {
            if waiter.granted.load(Ordering::Acquire) {
                return Poll::Ready(MutexGuard { mutex: self.mutex });
            }
            *waiter.waker.lock() = Some(cx.waker().clone());
            // The baton may have been handed over between the check and the
            // waker store; without this re-check it would be lost.
            if waiter.granted.load(Ordering::Acquire) {
                return Poll::Ready(MutexGuard { mutex: self.mutex });
            }
            return Poll::Pending;
        }

        // First poll: test and enqueue under one lock scope, so there is no
        // window for the holder to release in between.
        let mut state = self.mutex.state.lock();
        if !state.locked {
            state.locked = true;
            return Poll::Ready(MutexGuard { mutex: self.mutex });
        }

        let waiter = Arc::new(Waiter {
            granted: AtomicBool::new(false),
            waker: PlMutex::new(Some(cx.waker().clone())),
        });
        state.waiters.push_back(waiter.clone());
        drop(state);
        self.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<T: ?Sized> Unpin for Lock<'_, T> {}

/// Scoped guard providing access to the protected value; releases the
/// mutex on drop.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::runtime::Builder;
    use std::sync::Arc;

    #[test]
    fn try_lock_respects_the_guard() {
        let mutex = Mutex::new(5);
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert_eq!(*mutex.try_lock().unwrap(), 5);
    }

    #[weft::test(worker_threads = 2)]
    async fn guard_gives_mutable_access() {
        let mutex = Mutex::new(1);
        {
            let mut guard = mutex.lock().await;
            *guard += 1;
        }
        assert_eq!(*mutex.lock().await, 2);
    }

    // Quick smoke check; the full 8 tasks x 10_000 increments contention
    // invariant is `mutex_contention_counts_exactly` in `runtime::tests`.
    #[test]
    fn contended_increments_are_exclusive() {
        let runtime = Builder::new().worker_threads(4).try_build().unwrap();
        let mutex = Arc::new(Mutex::new(0u64));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let mutex = mutex.clone();
                runtime.spawn(async move {
                    for _ in 0..1000 {
                        let mut guard = mutex.lock().await;
                        *guard += 1;
                    }
                })
            })
            .collect();

        runtime.block_on(async move {
            for task in tasks {
                task.await;
            }
        });

        assert_eq!(*mutex.try_lock().unwrap(), 8 * 1000);
    }

    /// Waiters must acquire in the order they first queued.
    #[test]
    fn waiters_are_fifo() {
        let runtime = Builder::new().worker_threads(1).try_build().unwrap();
        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(Mutex::new(Vec::new()));

        runtime.block_on({
            let mutex = mutex.clone();
            let order = order.clone();
            async move {
                // Hold the lock while the waiters queue up in index order.
                let gate = mutex.lock().await;
                let tasks: Vec<_> = (0..8u32)
                    .map(|i| {
                        let mutex = mutex.clone();
                        let order = order.clone();
                        weft::spawn(async move {
                            let _guard = mutex.lock().await;
                            order.lock().await.push(i);
                        })
                    })
                    .collect();

                // One worker: every waiter has parked itself by the time
                // the spawned tasks stop being resumable, so yield until
                // they all had a chance to enqueue.
                for _ in 0..64 {
                    weft::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                drop(gate);

                for task in tasks {
                    task.await;
                }

                let seen = order.lock().await.clone();
                assert_eq!(seen, (0..8).collect::<Vec<_>>());
            }
        });
    }
}
