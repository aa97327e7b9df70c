use std::io;

/// Errors surfaced while constructing a [`crate::Runtime`].
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    /// The readiness poller (epoll/kqueue instance or its self-wake
    /// channel) could not be created.
    #[error("failed to create the readiness poller: {0}")]
    Poller(#[source] io::Error),

    /// A runtime thread could not be spawned.
    #[error("failed to spawn a runtime thread: {0}")]
    Thread(#[source] io::Error),
}
