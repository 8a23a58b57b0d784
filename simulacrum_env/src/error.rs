//! Error types for the Simulacrum environment layer.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Binding a listener to the requested port failed
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        /// Requested port (0 = ephemeral)
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// An `https` listener was requested without a TLS configuration
    #[error("No TLS configuration available for https listener")]
    TlsUnavailable,

    /// TLS handshake with a client failed
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// Accepting a connection failed on a running listener
    #[error("Listener error: {0}")]
    Accept(#[source] std::io::Error),

    /// A task was cancelled (or panicked) before producing its result
    #[error("Task `{0}` ended without a result")]
    TaskAborted(String),

    /// The scope no longer accepts new work
    #[error("Scope `{0}` is halted")]
    ScopeHalted(String),
}

impl EnvError {
    /// Creates a bind error.
    pub fn bind(port: u16, source: std::io::Error) -> Self {
        Self::Bind { port, source }
    }

    /// Creates a task-aborted error.
    pub fn aborted(task: impl Into<String>) -> Self {
        Self::TaskAborted(task.into())
    }
}
