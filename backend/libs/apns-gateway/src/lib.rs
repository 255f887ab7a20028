//! Gateway connection management for the legacy binary push protocol
//!
//! One [`GatewaySession`] is one TLS connection authenticated with one
//! [`Credential`]. Sessions expose exactly two operations to delivery code:
//! writing a frame and reading with a bounded wait. The socket is closed when
//! the session is dropped, so every exit path (success, `?`, panic) releases it;
//! [`GatewaySession::close`] additionally sends a TLS close_notify.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use apns_gateway::{ApnsEnvironment, Credential, GatewayConnector, GatewayEndpoint, TlsGatewayConnector};
//!
//! # async fn example(pem: Vec<u8>) -> apns_gateway::GatewayResult<()> {
//! let connector = TlsGatewayConnector::with_native_roots(Duration::from_secs(10))?;
//! let endpoint = GatewayEndpoint::gateway(ApnsEnvironment::Sandbox);
//! let mut session = connector.connect(&Credential::from_pem(pem), &endpoint).await?;
//! session.write(&[0u8; 4]).await?;
//! let response = session.read_with_timeout(6, Duration::from_secs(2)).await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod credential;
pub mod endpoint;
pub mod error;
pub mod session;

pub use connector::{GatewayConnector, TlsGatewayConnector};
pub use credential::Credential;
pub use endpoint::{ApnsEnvironment, GatewayEndpoint};
pub use error::{GatewayError, GatewayResult};
pub use session::{FeedbackStream, GatewaySession, GatewayStream};
