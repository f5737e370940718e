//! Error types for the ventilation CAN client.
//!
//! Anything malformed arriving over the wire is absorbed locally with a
//! warning and never surfaces here; these variants cover local resource
//! failures and misuse of the API.

use thiserror::Error;

/// Errors surfaced by the device and its collaborators.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The CAN interface could not be opened or used.
    #[error("connection error: {0}")]
    Connection(String),

    /// The capture sink could not be created or closed.
    #[error("capture error: {0}")]
    Capture(#[source] std::io::Error),

    /// The dump file is missing, empty or unreadable.
    #[error("dump file error: {0}")]
    DumpFile(String),

    /// Malformed frame text or payload.
    #[error("frame error: {0}")]
    Frame(String),

    /// A stage queue closed while the device was still in use.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Invalid configuration or usage.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeviceError>;
