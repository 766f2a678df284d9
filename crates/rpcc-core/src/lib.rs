//! # rpcc-core -- Foundational Types for the RPC Contract Compiler
//!
//! Defines the data shared by every other crate of the workspace:
//!
//! - [`ir`]: the typed view of a schema IR document (definitions, property
//!   schemas, method schemas), parsed from JSON or YAML.
//! - [`model`]: the compiled [`ServiceModel`] consumed by the validation
//!   engine, the dispatch executor, the client runtime and binding emitters.
//! - [`context`]: configuration and resolved state of `ClientContext` and
//!   `ServerOnlyContext`.
//! - [`temporal`]: Date coercion at the wire boundary.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `rpcc-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod context;
pub mod error;
pub mod ir;
pub mod model;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use context::{
    ContextConfig, ContextModel, ContextSetting, ContextState, CLIENT_CONTEXT, SERVER_ONLY_CONTEXT,
};
pub use error::{DateCoercionError, SchemaError};
pub use ir::{Definition, DefinitionKind, Member, MethodSchema, ObjectSchema, PropertySchema, SchemaIr};
pub use model::{
    AliasDescriptor, AttributeDescriptor, ClassDescriptor, EnumDescriptor, ExceptionDescriptor,
    MethodDescriptor, ParameterDescriptor, ServiceModel, TypeDef, TypeExpr,
};
pub use temporal::{normalize_dates, WireDate};
