//! BSD/macOS backend: kqueue with an `EVFILT_USER` self-wake event.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::task::Waker;
use std::time::Duration;

/// Ident of the user event used for self-wakes.
const WAKE_IDENT: usize = usize::MAX;

const EVENT_CAPACITY: usize = 128;

pub(crate) struct Poller {
    kq: RawFd,

    /// Armed one-shot registrations, one waker per fd (a task owns its fd
    /// and awaits one direction at a time).
    registrations: Mutex<HashMap<RawFd, Waker>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }

        let event = libc::kevent {
            ident: WAKE_IDENT as _,
            filter: libc::EVFILT_USER as _,
            flags: (libc::EV_ADD | libc::EV_CLEAR) as _,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        if unsafe { libc::kevent(kq, &event, 1, ptr::null_mut(), 0, ptr::null()) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(kq) };
            return Err(err);
        }

        Ok(Poller {
            kq,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn wake(&self) {
        let event = libc::kevent {
            ident: WAKE_IDENT as _,
            filter: libc::EVFILT_USER as _,
            flags: 0,
            fflags: libc::NOTE_TRIGGER,
            data: 0,
            udata: ptr::null_mut(),
        };
        unsafe { libc::kevent(self.kq, &event, 1, ptr::null_mut(), 0, ptr::null()) };
    }

    pub(crate) fn add_read(&self, fd: RawFd, waker: Waker) {
        self.add(fd, waker, libc::EVFILT_READ);
    }

    pub(crate) fn add_write(&self, fd: RawFd, waker: Waker) {
        self.add(fd, waker, libc::EVFILT_WRITE);
    }

    fn add(&self, fd: RawFd, waker: Waker, filter: i16) {
        // Replacing an existing entry drops the stale waker of a previous
        // one-shot on the same fd. kqueue's EV_ADD already updates an
        // existing (ident, filter) registration in place.
        self.registrations.lock().insert(fd, waker);

        let event = libc::kevent {
            ident: fd as _,
            filter: filter as _,
            flags: (libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT) as _,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        let rc = unsafe { libc::kevent(self.kq, &event, 1, ptr::null_mut(), 0, ptr::null()) };
        if rc < 0 {
            tracing::warn!(fd, "kqueue registration failed");
        }
    }

    /// Drop all armed registrations (shutdown path).
    pub(crate) fn clear(&self) {
        self.registrations.lock().clear();
    }

    pub(crate) fn wait(
        &self,
        timeout: Option<Duration>,
        mut fire: impl FnMut(Waker),
    ) -> io::Result<usize> {
        let timespec;
        let timeout_ptr = match timeout {
            None => ptr::null(),
            Some(duration) => {
                timespec = libc::timespec {
                    tv_sec: duration.as_secs() as _,
                    tv_nsec: duration.subsec_nanos() as _,
                };
                &timespec as *const libc::timespec
            }
        };

        let mut events: [libc::kevent; EVENT_CAPACITY] = unsafe { mem::zeroed() };
        let n = unsafe {
            libc::kevent(
                self.kq,
                ptr::null(),
                0,
                events.as_mut_ptr(),
                EVENT_CAPACITY as _,
                timeout_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        for event in &events[..n as usize] {
            if event.filter == libc::EVFILT_USER as _ {
                continue;
            }

            let fd = event.ident as RawFd;
            // Take the waker out before firing: waking can immediately
            // re-register the fd from another thread.
            let waker = self.registrations.lock().remove(&fd);
            if let Some(waker) = waker {
                fire(waker);
            }
        }

        Ok(n as usize)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe { libc::close(self.kq) };
    }
}

// Safety: the fd is a plain integer and the registration table carries its
// own lock.
unsafe impl Send for Poller {}
unsafe impl Sync for Poller {}
