//! Non-blocking TCP, driven by the reactor.
//!
//! Every I/O future tries its syscall eagerly on the first poll; only a
//! `WouldBlock` suspends the task and arms a one-shot readiness
//! registration for the fd. On readiness the task is re-queued and the
//! syscall retried. Hard errors resolve immediately.

mod tcp;

pub use tcp::{Accept, Read, TcpListener, TcpStream, Write};
