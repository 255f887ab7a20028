use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::endpoint::GatewayEndpoint;
use crate::error::{GatewayError, GatewayResult};
use crate::session::GatewaySession;

/// Opens gateway sessions.
///
/// Delivery code only depends on this trait so the transport can be swapped
/// (e.g. an in-memory gateway in tests).
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open a session to `endpoint`, authenticating with `credential`.
    ///
    /// The handshake happens here; a returned session is ready for frames.
    async fn connect(
        &self,
        credential: &Credential,
        endpoint: &GatewayEndpoint,
    ) -> GatewayResult<GatewaySession>;
}

/// TLS connector presenting the credential as client certificate.
#[derive(Clone)]
pub struct TlsGatewayConnector {
    roots: Arc<RootCertStore>,
    connect_timeout: Duration,
}

impl TlsGatewayConnector {
    /// Trust the platform's root certificates.
    pub fn with_native_roots(connect_timeout: Duration) -> GatewayResult<Self> {
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| GatewayError::TrustRoots(e.to_string()))?;

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native);
        if ignored > 0 {
            warn!(ignored, "Skipped unparsable native root certificates");
        }
        if added == 0 {
            return Err(GatewayError::TrustRoots(
                "no usable native root certificates".to_string(),
            ));
        }
        debug!(added, "Loaded native root certificates");

        Ok(Self::with_roots(roots, connect_timeout))
    }

    /// Trust exactly `roots`.
    pub fn with_roots(roots: RootCertStore, connect_timeout: Duration) -> Self {
        Self {
            roots: Arc::new(roots),
            connect_timeout,
        }
    }

    fn client_config(&self, credential: &Credential) -> GatewayResult<ClientConfig> {
        let (certs, key) = credential.identity()?;

        if let Ok(expires_at) = credential.expires_at() {
            if expires_at < chrono::Utc::now() {
                warn!(%expires_at, "Push certificate has expired");
            }
        }

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| GatewayError::InvalidCredential {
                reason: e.to_string(),
            })?
            .with_root_certificates(self.roots.clone())
            .with_client_auth_cert(certs, key)
            .map_err(|e| GatewayError::InvalidCredential {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl GatewayConnector for TlsGatewayConnector {
    async fn connect(
        &self,
        credential: &Credential,
        endpoint: &GatewayEndpoint,
    ) -> GatewayResult<GatewaySession> {
        let config = self.client_config(credential)?;
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|_| GatewayError::InvalidServerName(endpoint.host.clone()))?;

        let tcp = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| GatewayError::Connect {
            endpoint: endpoint.to_string(),
            reason: format!("timed out after {:?}", self.connect_timeout),
        })?
        .map_err(|e| GatewayError::Connect {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let tls = TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .map_err(|source| GatewayError::Handshake {
                endpoint: endpoint.to_string(),
                source,
            })?;

        info!(endpoint = %endpoint, "Gateway session established");

        Ok(GatewaySession::new(tls, endpoint.clone()))
    }
}
