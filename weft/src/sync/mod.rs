//! Synchronization primitives for tasks: an async mutex with baton-passing
//! unlock and a bounded (or rendezvous) channel with direct handoff.

mod channel;
mod mutex;

pub use channel::Channel;
pub use mutex::{Mutex, MutexGuard};
