use std::path::PathBuf;

use apns_gateway::GatewayError;
use apns_wire::CodecError;
use thiserror::Error;

use crate::models::{DeliveryScope, NotificationId};
use crate::store::StoreError;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// No certificate is configured for the scope; nothing was sent
    #[error("Missing certificate for {scope}")]
    MissingCredential { scope: DeliveryScope },

    #[error("Failed to read certificate '{path}': {source}")]
    CredentialUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Payload of notification {notification_id} is {size} bytes, limit is {limit}")]
    PayloadTooLarge {
        notification_id: NotificationId,
        size: usize,
        limit: usize,
    },

    /// Session could not be opened; the whole pass is abandoned
    #[error("Connection to {endpoint} failed: {source}")]
    ConnectionFailure {
        endpoint: String,
        #[source]
        source: GatewayError,
    },

    #[error("Write failed: {0}")]
    WriteFailure(#[source] GatewayError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}
