//! # Weft
//!
//! A cooperative, work-stealing async runtime for non-blocking network I/O
//! on POSIX systems.
//!
//! Thousands of logical tasks are multiplexed onto a small pool of worker
//! threads, each draining a per-worker Chase–Lev deque backed by a shared
//! overflow queue, while a dedicated reactor thread turns epoll/kqueue
//! readiness events and timer expiries into task wake-ups.
//!
//! Execution is strictly cooperative: within a task, control only transfers
//! at an `.await`. A task that spins without suspending starves its worker;
//! CPU-bound loops do not belong on the runtime.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! #[weft::main]
//! async fn main() {
//!     let task = weft::spawn(async {
//!         weft::time::sleep(Duration::from_millis(100)).await;
//!         2 + 2
//!     });
//!
//!     assert_eq!(task.await, 4);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`net`] — non-blocking TCP listener/stream with async accept, read and
//!   write
//! - [`sync`] — async mutex and channel
//! - [`time`] — timers driven by the reactor

mod context;
mod error;
mod reactor;
mod task;

pub mod net;
pub mod runtime;
pub mod sync;
pub mod time;

pub use error::BuildError;
pub use runtime::{spawn, Builder, Runtime};
pub use task::JoinHandle;

#[doc(inline)]
pub use weft_macros::main;

#[doc(inline)]
pub use weft_macros::test;
