//! Client configuration.
//!
//! A client targets one service URL. Calls are untimed unless a default
//! timeout is configured here or a per-call timeout is given.

use url::Url;

/// Configuration for calling one rpcc service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL; each call posts to `<service_url>/<method>`.
    pub service_url: Url,
    /// Applied to calls that do not set their own timeout.
    pub default_timeout_ms: Option<u64>,
    /// Sent with every call, before per-call headers.
    pub default_headers: Vec<(String, String)>,
}

impl ClientConfig {
    pub fn new(service_url: &str) -> Result<Self, ConfigError> {
        let service_url = Url::parse(service_url)
            .map_err(|e| ConfigError::InvalidUrl(service_url.to_string(), e.to_string()))?;
        Ok(Self {
            service_url,
            default_timeout_ms: None,
            default_headers: Vec::new(),
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `RPCC_SERVICE_URL` (required)
    /// - `RPCC_TIMEOUT_MS` (default: no timeout)
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("RPCC_SERVICE_URL").map_err(|_| ConfigError::MissingServiceUrl)?;
        let mut config = Self::new(&raw)?;
        if let Ok(timeout) = std::env::var("RPCC_TIMEOUT_MS") {
            let ms = timeout.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    var: "RPCC_TIMEOUT_MS",
                    value: timeout.clone(),
                    reason: e.to_string(),
                }
            })?;
            config.default_timeout_ms = Some(ms);
        }
        Ok(config)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// `<service_url>/<method>`, tolerating a trailing slash on the base.
    pub(crate) fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.service_url.as_str().trim_end_matches('/'), method)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("RPCC_SERVICE_URL environment variable is required")]
    MissingServiceUrl,
    #[error("invalid URL {0}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
}
