pub mod config;
pub mod credentials;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::{DatabaseConfig, DeliveryConfig};
pub use credentials::{resolve_credential, CredentialStore, FileCredentialStore, StaticCredentialStore};
pub use error::{DeliveryError, DeliveryResult};
pub use models::*;
pub use services::*;
pub use store::{DeliveryStore, InMemoryDeliveryStore, PgDeliveryStore, StoreError, StoreResult};
