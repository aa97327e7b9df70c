//! Linux backend: epoll with an eventfd self-wake channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::task::Waker;
use std::time::Duration;

/// Payload marking the wake eventfd. Real registrations carry the fd, which
/// is never `u64::MAX`.
const WAKE_TOKEN: u64 = u64::MAX;

const EVENT_CAPACITY: usize = 128;

pub(crate) struct Poller {
    epoll_fd: RawFd,
    wake_fd: RawFd,

    /// Armed one-shot registrations. At most one waker per fd: a task owns
    /// its fd and awaits one direction at a time, and re-registering
    /// replaces the stale entry.
    registrations: Mutex<HashMap<RawFd, Waker>>,
}

impl Poller {
    pub(crate) fn new() -> io::Result<Poller> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut event) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Poller {
            epoll_fd,
            wake_fd,
            registrations: Mutex::new(HashMap::new()),
        })
    }

    /// Interrupt a blocked `wait` promptly.
    pub(crate) fn wake(&self) {
        let value: u64 = 1;
        unsafe {
            libc::write(
                self.wake_fd,
                &value as *const u64 as *const libc::c_void,
                mem::size_of::<u64>(),
            );
        }
    }

    pub(crate) fn add_read(&self, fd: RawFd, waker: Waker) {
        self.add(fd, waker, libc::EPOLLIN);
    }

    pub(crate) fn add_write(&self, fd: RawFd, waker: Waker) {
        self.add(fd, waker, libc::EPOLLOUT);
    }

    fn add(&self, fd: RawFd, waker: Waker, interest: libc::c_int) {
        // Replacing an existing entry drops the stale waker of a previous
        // one-shot on the same fd (keep-alive connections re-arm here).
        self.registrations.lock().insert(fd, waker);

        let mut event = libc::epoll_event {
            events: (interest | libc::EPOLLONESHOT | libc::EPOLLRDHUP) as u32,
            u64: fd as u64,
        };

        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
                // The fd is still known from a consumed one-shot; modify the
                // existing registration in place.
                let rc =
                    unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, fd, &mut event) };
                debug_assert!(rc == 0, "EPOLL_CTL_MOD failed");
            } else {
                tracing::warn!(fd, "epoll registration failed");
            }
        }
    }

    /// Drop all armed registrations (shutdown path).
    pub(crate) fn clear(&self) {
        self.registrations.lock().clear();
    }

    /// Block up to `timeout` (forever when `None`) and hand every fired
    /// waker to `fire`. The self-wake event is consumed silently.
    pub(crate) fn wait(
        &self,
        timeout: Option<Duration>,
        mut fire: impl FnMut(Waker),
    ) -> io::Result<usize> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(duration) => {
                // Round up so a sub-millisecond deadline does not turn into
                // a zero-timeout busy loop.
                let mut ms = duration.as_millis();
                if duration.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        let mut events: [libc::epoll_event; EVENT_CAPACITY] = unsafe { mem::zeroed() };
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                EVENT_CAPACITY as libc::c_int,
                timeout_ms,
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
            let token = event.u64;
            if token == WAKE_TOKEN {
                let mut value: u64 = 0;
                unsafe {
                    libc::read(
                        self.wake_fd,
                        &mut value as *mut u64 as *mut libc::c_void,
                        mem::size_of::<u64>(),
                    );
                }
                continue;
            }

            let fd = token as RawFd;
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
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}

// Safety: the fds are plain integers and the registration table carries its
// own lock.
unsafe impl Send for Poller {}
unsafe impl Sync for Poller {}
