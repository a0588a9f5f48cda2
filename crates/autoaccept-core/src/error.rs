//! Error types for the autoaccept-core crate.

use thiserror::Error;

/// Errors returned by [`AgentHandle`](crate::runtime::AgentHandle) calls.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The control task has exited.
    #[error("agent runtime is not running")]
    Stopped,
}
