//! Error types for gateway connections.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors that can occur while opening or using a gateway session.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credential bytes could not be turned into a TLS client identity
    #[error("Invalid credential: {reason}")]
    InvalidCredential { reason: String },

    /// Host name is not usable for certificate validation
    #[error("Invalid server name '{0}'")]
    InvalidServerName(String),

    /// No trust roots could be loaded
    #[error("Failed to load trust roots: {0}")]
    TrustRoots(String),

    /// TCP connect failed or timed out
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// TLS handshake failed
    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        source: std::io::Error,
    },

    /// Writing a frame failed (typically a broken pipe after the peer hung up)
    #[error("Write failed: {0}")]
    Write(std::io::Error),

    /// Reading from the session failed
    #[error("Read failed: {0}")]
    Read(std::io::Error),

    /// Feedback stream ended mid-record
    #[error("Malformed feedback stream: {0}")]
    Feedback(#[from] apns_wire::CodecError),
}

impl GatewayError {
    /// Whether this error happened while establishing the session.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidCredential { .. }
                | GatewayError::InvalidServerName(_)
                | GatewayError::TrustRoots(_)
                | GatewayError::Connect { .. }
                | GatewayError::Handshake { .. }
        )
    }
}
