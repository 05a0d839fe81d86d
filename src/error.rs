//! Error types for router connection, command execution and caching.
//!
//! The command executor is the only component that surfaces errors to
//! callers; transport and pool failures are translated by its retry
//! wrapper, and cache failures degrade to misses instead of propagating.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating runtime configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is absent. Device credentials fall
    /// in this group, and startup must fail fast when they are missing.
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    /// A variable is present but cannot be parsed into the expected type.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors that can occur while opening or driving a device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The TCP/SSH connect phase did not finish within the connect timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Authentication finished but no shell prompt appeared in time.
    ///
    /// The device is considered unusable: without a prompt there is no way
    /// to delimit command output.
    #[error("no shell prompt within {0:?} after authentication")]
    AuthTimeout(Duration),

    /// A Telnet login challenge (`Username:` / `Password:`) never arrived.
    #[error("login challenge {0:?} never arrived")]
    LoginChallenge(&'static str),

    /// The remote side closed the session while it was in use.
    #[error("session closed by the device")]
    SessionClosed,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),

    /// A socket-level error on the Telnet transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to hand data to the session I/O task.
    #[error("failed to send data to session: {0}")]
    SendData(#[from] tokio::sync::mpsc::error::SendError<String>),
}

/// Batch execution failures surfaced by the command executor.
///
/// Batches are all-or-nothing: the retry wrapper re-runs the whole batch
/// and re-raises the last failure once attempts are exhausted.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The command is not covered by the permitted-prefix allowlist.
    #[error("command rejected: {0:?} is not a permitted command")]
    Rejected(String),

    /// The whole batch exceeded its wall-clock budget.
    #[error("batch aborted after exceeding its {0:?} budget")]
    BatchTimeout(Duration),

    /// A transport failure aborted the batch.
    #[error(transparent)]
    Transport(#[from] ConnectError),
}

/// Cache tier failures. Never surfaced to callers: remote-tier errors are
/// logged and swallowed, and a total failure reads as a cache miss.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("remote tier error: {0}")]
    Remote(#[from] redis::RedisError),

    #[error("remote tier operation timed out")]
    RemoteTimeout,

    #[error("entry serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}
