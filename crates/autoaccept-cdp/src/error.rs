//! Error types for the autoaccept-cdp crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the remote-debugging path.
///
/// All of these are transient from the agent's point of view: they are
/// logged and cleaned up locally, never surfaced to the scheduler.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Failed to establish a WebSocket connection to a target.
    #[error("failed to connect to DevTools target at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A CDP command returned an error response.
    #[error("CDP error {code}: {message}")]
    CdpError {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A CDP command timed out waiting for a response.
    #[error("CDP command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A protocol-level error (serialization, unexpected message format, etc.).
    #[error("CDP protocol error: {detail}")]
    Protocol { detail: String },

    /// The connection was closed while a command was pending or being sent.
    #[error("DevTools connection closed")]
    Closed,

    /// JavaScript evaluation returned an exception.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// The HTTP target listing could not be fetched or decoded.
    #[error("target discovery failed at {url}: {reason}")]
    Discovery { url: String, reason: String },
}

/// Errors from the one-time launch-configuration bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot read launch configuration {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write launch configuration {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("launch configuration {path} is not a JSON object: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("no free debugging port in {first}..={last}")]
    NoFreePort { first: u16, last: u16 },

    #[error("no launch configuration path: set cdp.launch_config_path or HOME")]
    NoPath,
}
