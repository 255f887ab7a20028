use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use apns_gateway::Credential;
use tracing::debug;

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{AppId, DeliveryScope};

/// Read-only source of push certificates.
pub trait CredentialStore: Send + Sync {
    /// Certificate bytes for one app, if configured.
    fn app_certificate(&self, app_id: AppId) -> DeliveryResult<Option<Vec<u8>>>;

    /// Process-wide certificate, if configured.
    fn default_certificate(&self) -> DeliveryResult<Option<Vec<u8>>>;
}

/// Resolve the credential for a pass. Called once per pass, before any I/O.
pub fn resolve_credential(
    store: &dyn CredentialStore,
    scope: DeliveryScope,
) -> DeliveryResult<Credential> {
    let pem = match scope {
        DeliveryScope::App(app_id) => store.app_certificate(app_id)?,
        DeliveryScope::Global => store.default_certificate()?,
    };

    pem.map(Credential::from_pem)
        .ok_or(DeliveryError::MissingCredential { scope })
}

/// Certificates on disk: `<cert_dir>/<app_id>.pem` plus an optional default file.
#[derive(Debug, Clone, Default)]
pub struct FileCredentialStore {
    cert_dir: Option<PathBuf>,
    default_cert_path: Option<PathBuf>,
}

impl FileCredentialStore {
    pub fn new(cert_dir: Option<PathBuf>, default_cert_path: Option<PathBuf>) -> Self {
        Self {
            cert_dir,
            default_cert_path,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.cert_dir.clone(), config.default_cert_path.clone())
    }

    fn read_optional(path: &Path) -> DeliveryResult<Option<Vec<u8>>> {
        match std::fs::read(path) {
            Ok(pem) if pem.iter().all(u8::is_ascii_whitespace) => {
                debug!(path = %path.display(), "Certificate file is blank");
                Ok(None)
            }
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DeliveryError::CredentialUnreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn app_certificate(&self, app_id: AppId) -> DeliveryResult<Option<Vec<u8>>> {
        match &self.cert_dir {
            Some(dir) => Self::read_optional(&dir.join(format!("{app_id}.pem"))),
            None => Ok(None),
        }
    }

    fn default_certificate(&self) -> DeliveryResult<Option<Vec<u8>>> {
        match &self.default_cert_path {
            Some(path) => Self::read_optional(path),
            None => Ok(None),
        }
    }
}

/// Certificates held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    apps: HashMap<AppId, Vec<u8>>,
    default: Option<Vec<u8>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, app_id: AppId, pem: impl Into<Vec<u8>>) -> Self {
        self.apps.insert(app_id, pem.into());
        self
    }

    pub fn with_default(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.default = Some(pem.into());
        self
    }
}

impl CredentialStore for StaticCredentialStore {
    fn app_certificate(&self, app_id: AppId) -> DeliveryResult<Option<Vec<u8>>> {
        Ok(self.apps.get(&app_id).cloned())
    }

    fn default_certificate(&self) -> DeliveryResult<Option<Vec<u8>>> {
        Ok(self.default.clone())
    }
}
