//! Handler-facing types: the [`Call`] a method handler receives, the
//! [`HandlerError`] it fails with, and the [`ContextExtractor`] hook that
//! computes ServerOnlyContext fields from the transport request.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::context::Context;

/// Boxed future returned by a [`MethodHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send>>;

/// A type-erased method implementation.
pub type MethodHandler = Arc<dyn Fn(Call) -> HandlerFuture + Send + Sync>;

/// Boxed future returned by a [`ContextExtractor`].
pub type ExtractFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Map<String, Value>, HandlerError>> + Send + 'a>>;

/// Wrap an async closure as a [`MethodHandler`].
pub fn handler_fn<F, Fut>(f: F) -> MethodHandler
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(move |call| Box::pin(f(call)))
}

/// Computes ServerOnlyContext fields from the request head. Runs once per
/// call, after validation and before the handler.
pub trait ContextExtractor: Send + Sync {
    fn extract<'a>(&'a self, request: &'a Parts) -> ExtractFuture<'a>;
}

impl<F, Fut> ContextExtractor for F
where
    F: Fn(&Parts) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Map<String, Value>, HandlerError>> + Send + 'static,
{
    fn extract<'a>(&'a self, request: &'a Parts) -> ExtractFuture<'a> {
        Box::pin(self(request))
    }
}

/// One invocation of a method handler.
#[derive(Debug, Clone)]
pub struct Call {
    method: String,
    context: Option<Context>,
    args: Vec<Value>,
}

impl Call {
    pub fn new(method: impl Into<String>, context: Option<Context>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            context,
            args,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Present only when the service declares a ClientContext or a
    /// ServerOnlyContext.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Positional arguments in declared parameter order. Omitted optional
    /// parameters are `null`.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Deserialize the argument at `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HandlerError> {
        let value = self.args.get(index).ok_or_else(|| {
            HandlerError::internal(format!(
                "method '{}' has no argument at position {index}",
                self.method
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            HandlerError::internal(format!(
                "argument {index} of method '{}' has an unexpected shape: {e}",
                self.method
            ))
        })
    }
}

/// A failure raised by a handler or a context extractor.
///
/// `name` decides how the failure crosses the wire: a name listed in the
/// method's `throws` is passed through as a declared exception, any other
/// name is reported as `InternalServerError`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    name: String,
    message: String,
    stack: Option<String>,
}

impl HandlerError {
    /// An error named `name`. A backtrace is captured when enabled through
    /// `RUST_BACKTRACE`.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            name: name.into(),
            message: message.into(),
            stack,
        }
    }

    /// An error no method declares.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            name: "Error".into(),
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}
