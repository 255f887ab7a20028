use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use apns_gateway::{ApnsEnvironment, GatewayEndpoint};

use crate::error::{DeliveryError, DeliveryResult};

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub environment: ApnsEnvironment,
    /// Notification delivery endpoint
    pub gateway: GatewayEndpoint,
    /// Feedback service endpoint
    pub feedback: GatewayEndpoint,
    /// Expiry written into enhanced frames, relative to send time
    pub notification_expiration: Duration,
    /// How long to wait for an error response after each write
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    /// Devices per connection when fanning out a group notification
    pub group_batch_size: usize,
    /// Directory holding `<app_id>.pem` certificates
    pub cert_dir: Option<PathBuf>,
    /// Process-wide certificate used for devices without an app
    pub default_cert_path: Option<PathBuf>,
    pub database: DatabaseConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::for_environment(ApnsEnvironment::Sandbox)
    }
}

impl DeliveryConfig {
    pub fn for_environment(environment: ApnsEnvironment) -> Self {
        Self {
            environment,
            gateway: GatewayEndpoint::gateway(environment),
            feedback: GatewayEndpoint::feedback(environment),
            notification_expiration: Duration::from_secs(86_400),
            response_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            group_batch_size: 100,
            cert_dir: None,
            default_cert_path: None,
            database: DatabaseConfig {
                url: "postgres://localhost/apn".to_string(),
                max_connections: 5,
            },
        }
    }

    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> DeliveryResult<Self> {
        dotenvy::dotenv().ok();

        let environment = parse_env("APNS_ENVIRONMENT", ApnsEnvironment::Sandbox)?;
        let defaults = Self::for_environment(environment);

        let gateway = GatewayEndpoint::new(
            parse_env("APNS_GATEWAY_HOST", defaults.gateway.host)?,
            parse_env("APNS_GATEWAY_PORT", defaults.gateway.port)?,
        );
        let feedback = GatewayEndpoint::new(
            parse_env("APNS_FEEDBACK_HOST", defaults.feedback.host)?,
            parse_env("APNS_FEEDBACK_PORT", defaults.feedback.port)?,
        );

        let group_batch_size: usize = parse_env("APNS_GROUP_BATCH_SIZE", defaults.group_batch_size)?;
        if group_batch_size == 0 {
            return Err(DeliveryError::Config(
                "APNS_GROUP_BATCH_SIZE must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            environment,
            gateway,
            feedback,
            notification_expiration: Duration::from_secs(parse_env(
                "APNS_NOTIFICATION_EXPIRATION_SECONDS",
                defaults.notification_expiration.as_secs(),
            )?),
            response_timeout: Duration::from_millis(parse_env(
                "APNS_RESPONSE_TIMEOUT_MS",
                defaults.response_timeout.as_millis() as u64,
            )?),
            connect_timeout: Duration::from_secs(parse_env(
                "APNS_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            group_batch_size,
            cert_dir: std::env::var("APNS_CERT_DIR").ok().map(PathBuf::from),
            default_cert_path: std::env::var("APNS_DEFAULT_CERT_PATH")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            database: DatabaseConfig {
                url: parse_env("DATABASE_URL", defaults.database.url)?,
                max_connections: parse_env(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset.
/// A value that is set but malformed is an error.
fn parse_env<T>(key: &str, default: T) -> DeliveryResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| DeliveryError::Config(format!("{key}={value:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "APNS_ENVIRONMENT",
        "APNS_GATEWAY_HOST",
        "APNS_GATEWAY_PORT",
        "APNS_RESPONSE_TIMEOUT_MS",
        "APNS_GROUP_BATCH_SIZE",
        "APNS_DEFAULT_CERT_PATH",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults() {
        let config = DeliveryConfig::default();
        assert_eq!(config.gateway.host, "gateway.sandbox.push.apple.com");
        assert_eq!(config.response_timeout, Duration::from_secs(2));
        assert_eq!(config.notification_expiration, Duration::from_secs(86_400));
        assert_eq!(config.group_batch_size, 100);
    }

    #[test]
    #[serial]
    fn test_from_env_production_with_overrides() {
        clear_env();
        std::env::set_var("APNS_ENVIRONMENT", "production");
        std::env::set_var("APNS_GATEWAY_PORT", "12195");
        std::env::set_var("APNS_RESPONSE_TIMEOUT_MS", "500");
        std::env::set_var("APNS_DEFAULT_CERT_PATH", "/etc/apns/global.pem");

        let config = DeliveryConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.environment, ApnsEnvironment::Production);
        assert_eq!(config.gateway.host, "gateway.push.apple.com");
        assert_eq!(config.gateway.port, 12195);
        assert_eq!(config.feedback.host, "feedback.push.apple.com");
        assert_eq!(config.response_timeout, Duration::from_millis(500));
        assert_eq!(
            config.default_cert_path,
            Some(PathBuf::from("/etc/apns/global.pem"))
        );
    }

    #[test]
    #[serial]
    fn test_malformed_value_is_an_error() {
        clear_env();
        std::env::set_var("APNS_GATEWAY_PORT", "not-a-port");
        let result = DeliveryConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(DeliveryError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_zero_batch_size_is_rejected() {
        clear_env();
        std::env::set_var("APNS_GROUP_BATCH_SIZE", "0");
        let result = DeliveryConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(DeliveryError::Config(_))));
    }
}
