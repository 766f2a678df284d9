//! # rpcc-schema -- Schema Compilation & Request Validation
//!
//! ## Compilation (`compile`)
//!
//! [`compile`] turns a [`SchemaIr`](rpcc_core::SchemaIr) into a
//! [`ServiceModel`](rpcc_core::ServiceModel): references are resolved,
//! exceptions are separated from classes by shape, classes are sorted so
//! that every referenced class precedes its referrers, and each method gets
//! an ordered parameter list, a return type and a closed `throws` list.
//!
//! ## Validation (`validate`)
//!
//! [`ClassValidator`] compiles one Draft 7 validator per method of a service
//! class, with the ClientContext schema injected under `ctx` and the IR
//! definitions embedded for local `$ref` resolution. Validation accepts both
//! the flattened and the legacy body shapes.
//!
//! ## Crate Policy
//!
//! - Depends only on `rpcc-core` internally.
//! - Validators never resolve references over the network.

pub mod compile;
pub mod validate;

pub use compile::{compile, find_refs, type_expr, type_to_string, RefWalk};
pub use validate::{
    ClassValidator, RequestBody, ValidationError, ValidationViolations, Violation, CTX_FIELD,
};
