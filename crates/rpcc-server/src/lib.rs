//! # rpcc-server -- Dispatch Executor
//!
//! Serves a compiled service over HTTP with Axum. A [`ServiceRouter`]
//! takes the schema IR, the compiled [`ServiceModel`](rpcc_core::ServiceModel),
//! a service class name and one [`MethodHandler`] per declared method, and
//! builds a router answering the rpcc wire protocol:
//!
//! | Outcome                | Status | Body                                         |
//! |------------------------|--------|----------------------------------------------|
//! | Return value           | 200    | the value, Date fields as ISO-8601           |
//! | Invalid request        | 400    | `{message: "Bad Request", errors: [...]}`    |
//! | Declared exception     | 500    | `{name, message, stack?}`                    |
//! | Any other failure      | 500    | `{name: "InternalServerError", message, stack?}` |
//!
//! ```ignore
//! let router = ServiceRouter::new(ir, model, "Greeter", ServerConfig::from_env()?)
//!     .handler("greet", handler_fn(|call| async move {
//!         let name: String = call.arg(0)?;
//!         Ok(json!(format!("hello {name}")))
//!     }))
//!     .build()?;
//! let (addr, _task) = serve(router, "0.0.0.0:8080".parse()?).await?;
//! ```
//!
//! Several services can share one server by nesting their routers under
//! distinct prefixes with [`axum::Router::nest`].

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod handler;
pub mod router;
pub mod telemetry;

pub use config::ServerConfig;
pub use context::{Context, ContextPrecedence};
pub use error::{ConfigError, ServerError};
pub use exec::{CallRecord, Dispatcher, ExecOptions, Outcome, RpcResponse, INTERNAL_SERVER_ERROR};
pub use handler::{handler_fn, Call, ContextExtractor, HandlerError, MethodHandler};
pub use router::{serve, ServiceRouter};
