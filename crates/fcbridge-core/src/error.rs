//! Error types for fcbridge.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, channel-layer, and
//! expectation-file errors are all captured here.

/// The error type for all fcbridge operations.
///
/// A malformed `get` response is deliberately absent: the verifier records it
/// as a per-entry `error` result instead of failing the batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial device could not be opened, was denied, or vanished
    /// while opening.
    #[error("transport error: {0}")]
    Transport(String),

    /// Unexpected data at the transport level.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for the device prompt after a command.
    ///
    /// This typically means the controller is not in CLI mode, the baud
    /// rate is wrong, or the firmware is busy (e.g. saving and rebooting).
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed (blank command, missing port).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The command channel is not running.
    #[error("not connected")]
    NotConnected,

    /// The device closed the stream or the port went away.
    #[error("connection lost")]
    ConnectionLost,

    /// The expectation file could not be parsed.
    #[error("invalid expectation file: {0}")]
    Parse(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
