//! # Server Errors
//!
//! [`ServerError`] covers router construction, which fails fast when the
//! handler map does not match the service's declared methods. Per-call
//! failures never surface as Rust errors: they are rendered into the wire
//! response by [`RpcResponse`](crate::exec::RpcResponse).

use rpcc_core::SchemaError;
use thiserror::Error;

/// Router construction failure.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The schema could not be compiled into validators.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The class is missing from the model or is not a service.
    #[error("class '{0}' is not a service (a service has methods and no attributes)")]
    NotAService(String),

    /// A declared method has no handler.
    #[error("no handler registered for method '{class}.{method}'")]
    MissingHandler { class: String, method: String },

    /// A handler was registered for a method the service does not declare.
    #[error("handler registered for undeclared method '{class}.{method}'")]
    UnknownMethod { class: String, method: String },

    /// The service has a ServerOnlyContext but no extractor was given.
    #[error("service '{0}' declares a server-only context but no context extractor was registered")]
    MissingContextExtractor(String),

    /// Configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Error reading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}
