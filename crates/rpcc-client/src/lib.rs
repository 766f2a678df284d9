//! # rpcc-client -- Client Runtime for rpcc Services
//!
//! Calls the methods of a compiled service over HTTP with `reqwest`:
//!
//! ```ignore
//! let client = RpcClient::new(ClientConfig::from_env()?, model, "Greeter")?;
//! let greeting: String = client
//!     .call_as("greet", vec![json!("bob")], None, CallOptions::default().with_timeout_ms(500))
//!     .await?;
//! ```
//!
//! Calls are never retried: a method call is not assumed to be idempotent.

pub mod client;
pub mod config;
pub mod error;

pub use client::{interpret_response, CallOptions, RpcClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, DeclaredException, RequestOptions};
