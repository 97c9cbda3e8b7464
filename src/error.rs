//! Server-level errors.
//!
//! Only failures while starting the server are surfaced as errors. Everything
//! that goes wrong on an individual connection is handled inside the worker
//! and ends up as a status code or an abandoned socket.

use std::io;

/// Errors returned while starting or configuring the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("could not bind at {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The TLS certificate or key could not be loaded.
    #[error("invalid TLS configuration: {0}")]
    Tls(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A request handler failed to initialize.
    #[error("handler initialization failed: {0}")]
    Handler(String),

    /// `start()` was called on a component that is already running.
    #[error("already started")]
    AlreadyStarted,

    #[error(transparent)]
    Io(#[from] io::Error),
}
