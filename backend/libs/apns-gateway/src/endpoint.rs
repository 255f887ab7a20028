use std::fmt;
use std::str::FromStr;

/// Which gateway cluster to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApnsEnvironment {
    Production,
    #[default]
    Sandbox,
}

impl FromStr for ApnsEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(ApnsEnvironment::Production),
            "sandbox" | "development" | "dev" => Ok(ApnsEnvironment::Sandbox),
            other => Err(format!("unknown APNs environment '{other}'")),
        }
    }
}

/// Host and port of a gateway or feedback service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
}

impl GatewayEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Notification delivery endpoint
    pub fn gateway(environment: ApnsEnvironment) -> Self {
        match environment {
            ApnsEnvironment::Production => Self::new("gateway.push.apple.com", 2195),
            ApnsEnvironment::Sandbox => Self::new("gateway.sandbox.push.apple.com", 2195),
        }
    }

    /// Feedback service endpoint
    pub fn feedback(environment: ApnsEnvironment) -> Self {
        match environment {
            ApnsEnvironment::Production => Self::new("feedback.push.apple.com", 2196),
            ApnsEnvironment::Sandbox => Self::new("feedback.sandbox.push.apple.com", 2196),
        }
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
