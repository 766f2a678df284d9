//! Server configuration.
//!
//! Defaults suit production: no stack traces on the wire, a 2 MiB body
//! limit, and server-derived context fields winning over client fields.
//! Override via environment variables or explicit construction.

use crate::context::ContextPrecedence;
use crate::error::ConfigError;

/// Default maximum request body size (2 MiB).
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Configuration of a service router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Attach `stack` to 500 responses and disclose undeclared error
    /// messages. Debug only.
    pub include_stack_trace: bool,
    /// Requests with larger bodies are rejected with 413.
    pub body_limit_bytes: usize,
    pub context_precedence: ContextPrecedence,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            include_stack_trace: false,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            context_precedence: ContextPrecedence::ServerWins,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `RPCC_STACK_TRACE` (default: `false`)
    /// - `RPCC_BODY_LIMIT_BYTES` (default: 2097152)
    /// - `RPCC_CONTEXT_PRECEDENCE`: `server` or `client` (default: `server`)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            include_stack_trace: env_bool("RPCC_STACK_TRACE", defaults.include_stack_trace)?,
            body_limit_bytes: env_parse("RPCC_BODY_LIMIT_BYTES", defaults.body_limit_bytes)?,
            context_precedence: env_parse("RPCC_CONTEXT_PRECEDENCE", defaults.context_precedence)?,
        })
    }
}

fn env_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}

fn env_parse<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(raw) = std::env::var(var) else {
        return Ok(default);
    };
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}
