//! Error types for the binary protocol codec.

use thiserror::Error;

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding gateway frames.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Encoded payload (or whole frame) is over the format's byte ceiling
    #[error("Payload too large: {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Enhanced frames carry a 4-byte notification id
    #[error("Notification id {0} does not fit in 4 bytes")]
    NotificationIdOutOfRange(i64),

    /// Token length is carried in 2 bytes
    #[error("Device token of {0} bytes is too long to frame")]
    TokenTooLong(usize),

    /// Token string is not valid hex
    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    /// Not enough bytes to decode a complete frame
    #[error("Truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Payload serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
