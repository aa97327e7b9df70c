//! OS-abstracted readiness notifier.
//!
//! Both backends expose the same surface: one-shot interest registration
//! keyed by file descriptor with a task waker as payload, a self-wake
//! channel to interrupt a blocked `wait`, and a callback-driven drain of
//! fired registrations. Registrations are consumed on fire; the consumer
//! re-registers if it needs more I/O.

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub(crate) use epoll::Poller;

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
mod kqueue;
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub(crate) use kqueue::Poller;
