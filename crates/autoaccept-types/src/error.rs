//! Error types shared across all autoaccept crates.

/// Errors that can occur outside the remote-debugging layer.
///
/// Each variant corresponds to a subsystem: configuration loading, the
/// launch-configuration bootstrap, or the host capability bridge.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("bootstrap error: {0}")]
    BootstrapError(String),

    #[error("host capability error: {0}")]
    HostError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
