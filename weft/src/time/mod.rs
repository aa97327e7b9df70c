//! Timers driven by the reactor's timer heap.

mod sleep;

pub use sleep::{sleep, sleep_until, Sleep};
