//! Packet decoding errors

use thiserror::Error;

/// Errors returned by [`crate::decode`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The datagram is shorter than a full telemetry packet
    #[error("Short buffer: needed {needed} bytes, got {actual}")]
    ShortBuffer { needed: usize, actual: usize },
}

/// Type alias for decode results
pub type Result<T> = std::result::Result<T, DecodeError>;
