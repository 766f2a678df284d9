//! Client error types.
//!
//! Every variant carries the method name. Transport failures also echo the
//! request options so a failed call can be diagnosed from the error alone.

use serde_json::Value;

use crate::config::ConfigError;

/// Options of the request that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub service_url: String,
    pub timeout_ms: Option<u64>,
}

/// A domain exception declared in the method's `throws`, rebuilt from the
/// response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct DeclaredException {
    pub method: String,
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// Errors from rpcc calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The timer won the race against the response.
    #[error("Request aborted due to timeout on method \"{method}\"")]
    Timeout {
        method: String,
        options: RequestOptions,
    },
    /// No response was received.
    #[error("request for method \"{method}\" failed: {source}")]
    Request {
        method: String,
        options: RequestOptions,
        source: reqwest::Error,
    },
    /// The server rejected the request (400).
    #[error("Bad Request: method \"{method}\" rejected with {} error(s)", .errors.len())]
    Validation { method: String, errors: Vec<Value> },
    /// Any other non-2xx response.
    #[error("{status} - {reason}")]
    Status {
        method: String,
        status: u16,
        reason: String,
    },
    #[error(transparent)]
    Declared(DeclaredException),
    /// An undeclared server-side failure.
    #[error("InternalServerError: {message}")]
    InternalServerError {
        method: String,
        message: String,
        stack: Option<String>,
    },
    /// The arguments cannot be serialized for this method.
    #[error("invalid arguments for method \"{method}\": {reason}")]
    InvalidArguments { method: String, reason: String },
    /// A 2xx response whose body does not fit the return type.
    #[error("could not decode response of method \"{method}\": {reason}")]
    Decode { method: String, reason: String },
    #[error("method \"{method}\" is not declared by service \"{service}\"")]
    UnknownMethod { service: String, method: String },
    #[error("class \"{0}\" is not a service")]
    NotAService(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// The method the failing call targeted, if any.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Timeout { method, .. }
            | Self::Request { method, .. }
            | Self::Validation { method, .. }
            | Self::Status { method, .. }
            | Self::InternalServerError { method, .. }
            | Self::InvalidArguments { method, .. }
            | Self::Decode { method, .. }
            | Self::UnknownMethod { method, .. } => Some(method),
            Self::Declared(exception) => Some(&exception.method),
            Self::NotAService(_) | Self::Config(_) => None,
        }
    }

    /// The declared exception, when the failure is one.
    pub fn declared(&self) -> Option<&DeclaredException> {
        match self {
            Self::Declared(exception) => Some(exception),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
