use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{GatewayError, GatewayResult};

/// Certificate identity used to authenticate a gateway session.
///
/// Holds PEM bytes containing the certificate chain followed by an
/// unencrypted private key, the same file the push certificate export
/// produces after `openssl pkcs12 -nodes`.
#[derive(Clone)]
pub struct Credential {
    pem: Arc<[u8]>,
}

impl Credential {
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> Self {
        Self {
            pem: Arc::from(pem.into()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|e| GatewayError::InvalidCredential {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        Ok(Self::from_pem(pem))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pem
    }

    /// Certificate chain and private key for the TLS client identity.
    pub fn identity(
        &self,
    ) -> GatewayResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let certs = self.certificates()?;

        let key = rustls_pemfile::private_key(&mut &self.pem[..])
            .map_err(|e| GatewayError::InvalidCredential {
                reason: format!("failed to parse private key: {e}"),
            })?
            .ok_or_else(|| GatewayError::InvalidCredential {
                reason: "no private key found in credential".to_string(),
            })?;

        Ok((certs, key))
    }

    fn certificates(&self) -> GatewayResult<Vec<CertificateDer<'static>>> {
        let certs = rustls_pemfile::certs(&mut &self.pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::InvalidCredential {
                reason: format!("failed to parse certificate: {e}"),
            })?;

        if certs.is_empty() {
            return Err(GatewayError::InvalidCredential {
                reason: "no certificate found in credential".to_string(),
            });
        }
        Ok(certs)
    }

    /// `notAfter` of the leaf certificate.
    pub fn expires_at(&self) -> GatewayResult<DateTime<Utc>> {
        let certs = self.certificates()?;
        let (_, leaf) = x509_parser::parse_x509_certificate(certs[0].as_ref()).map_err(|e| {
            GatewayError::InvalidCredential {
                reason: format!("failed to parse X.509 certificate: {e}"),
            }
        })?;

        DateTime::from_timestamp(leaf.validity().not_after.timestamp(), 0).ok_or_else(|| {
            GatewayError::InvalidCredential {
                reason: "certificate expiry out of range".to_string(),
            }
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("pem", &format_args!("<{} bytes>", self.pem.len()))
            .finish()
    }
}
