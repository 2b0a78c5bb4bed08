//! Error types for ateprobe.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for ateprobe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ateprobe operations.
///
/// Read timeouts inside a session are not errors: they surface as empty
/// responses, which the classifier reports as silence.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, snapshot files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A write did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The boot prompt never appeared.
    #[error("Boot prompt not seen within {}ms", waited.as_millis())]
    PromptNotFound {
        /// How long the synchronizer waited.
        waited: Duration,
    },

    /// Payload cannot be expressed in the 16-bit length field.
    #[error("Payload of {len} bytes exceeds the 65535-byte length field")]
    PayloadTooLong {
        /// Offending payload length.
        len: usize,
    },

    /// The reference probe of a bad-character search got no response.
    #[error("No baseline response; cannot compare substitutions")]
    NoBaseline,

    /// A register snapshot could not be interpreted.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The embedding application asked the current loop to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
