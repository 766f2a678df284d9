//! # Request Validation
//!
//! Compiles one JSON Schema validator (Draft 7) per method of a service
//! class and validates request bodies against it.
//!
//! Each validator is built from the method's `params` object schema as it
//! appears in the IR, augmented with:
//!
//! - a `ctx` property referencing the effective ClientContext type, when one
//!   is present in the model;
//! - the IR `definitions` map, so every `#/definitions/<Name>` reference
//!   resolves inside the compiled schema.
//!
//! A retriever that refuses every external URI is installed, so building
//! and running a validator never touches the network.
//!
//! ## Body Shapes
//!
//! Two encodings are accepted on the wire and normalized before validation
//! (see [`RequestBody`]): the flattened `{<param>: ..., ctx: {...}}` shape
//! and the legacy `{args: {...}, context: {...}}` shape.
//!
//! ## Thread Safety
//!
//! [`ClassValidator`] is `Send + Sync`; it is built once per service and
//! shared for the process lifetime.

use std::collections::HashMap;
use std::fmt;

use jsonschema::{Draft, Retrieve, Uri, ValidationOptions, Validator};
use rpcc_core::ir::DEFINITIONS_PREFIX;
use rpcc_core::{SchemaError, SchemaIr, ServiceModel};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Name of the body field carrying the client context.
pub const CTX_FIELD: &str = "ctx";

/// Retriever that rejects every external reference.
struct LocalOnlyRetriever;

impl Retrieve for LocalOnlyRetriever {
    fn retrieve(
        &self,
        uri: &Uri<&str>,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Err(format!("external schema reference '{}' is not allowed", uri.as_str()).into())
    }
}

/// A request body rejected before or by its method's validator.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    /// No validator is registered under this name.
    #[error("method '{method}' is not supported")]
    MethodNotFound { method: String },

    /// The body is not a JSON object.
    #[error("could not parse body of method '{method}'")]
    MalformedBody { method: String },

    /// The body does not conform to the method's parameter schema.
    #[error("request for method '{method}' failed validation:\n{violations}")]
    SchemaViolation {
        method: String,
        violations: ValidationViolations,
    },
}

impl ValidationError {
    pub fn method(&self) -> &str {
        match self {
            ValidationError::MethodNotFound { method }
            | ValidationError::MalformedBody { method }
            | ValidationError::SchemaViolation { method, .. } => method,
        }
    }

    /// The `errors` list of a `400 Bad Request` response.
    pub fn wire_errors(&self) -> Vec<Value> {
        match self {
            ValidationError::MethodNotFound { method } => {
                vec![json!({ "message": "Method not supported", "method": method })]
            }
            ValidationError::MalformedBody { method } => {
                vec![json!({ "message": "Could not parse body", "method": method })]
            }
            ValidationError::SchemaViolation { violations, .. } => violations
                .violations()
                .iter()
                .map(|v| {
                    json!({
                        "message": v.message,
                        "keyword": v.keyword,
                        "instancePath": v.instance_path,
                        "schemaPath": v.schema_path,
                    })
                })
                .collect(),
        }
    }
}

/// A single validation violation with structured context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// JSON Pointer path to the violating field in the body.
    pub instance_path: String,
    /// JSON Pointer path within the schema that triggered the error.
    pub schema_path: String,
    /// The failing JSON Schema keyword (`minLength`, `required`, ...).
    pub keyword: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance_path.is_empty() {
            write!(f, "  (root): {}", self.message)
        } else {
            write!(f, "  {}: {}", self.instance_path, self.message)
        }
    }
}

/// Collection of validation violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationViolations {
    violations: Vec<Violation>,
}

impl ValidationViolations {
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn into_inner(self) -> Vec<Violation> {
        self.violations
    }
}

impl fmt::Display for ValidationViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

/// The accepted wire encodings of a request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `{<param>: ..., ctx: {...}}`.
    Flattened(Map<String, Value>),
    /// `{args: {...}, context: {...}}`.
    Legacy {
        args: Map<String, Value>,
        context: Option<Value>,
    },
    /// Anything that is not a JSON object.
    Malformed(Value),
}

impl RequestBody {
    /// Classify a decoded body. A body is legacy when `args` holds an object
    /// and the only other key, if any, is `context`.
    pub fn classify(body: Value) -> Self {
        match body {
            Value::Object(mut map) if is_legacy(&map) => {
                let context = map.remove("context").filter(|c| !c.is_null());
                let args = match map.remove("args") {
                    Some(Value::Object(args)) => args,
                    _ => Map::new(),
                };
                RequestBody::Legacy { args, context }
            }
            Value::Object(map) => RequestBody::Flattened(map),
            other => RequestBody::Malformed(other),
        }
    }

    /// The flattened form of this body; `None` when malformed.
    pub fn into_flattened(self) -> Option<Map<String, Value>> {
        match self {
            RequestBody::Flattened(map) => Some(map),
            RequestBody::Legacy { mut args, context } => {
                if let Some(context) = context {
                    args.insert(CTX_FIELD.to_string(), context);
                }
                Some(args)
            }
            RequestBody::Malformed(_) => None,
        }
    }
}

fn is_legacy(map: &Map<String, Value>) -> bool {
    matches!(map.get("args"), Some(Value::Object(_)))
        && map.keys().all(|k| k == "args" || k == "context")
}

fn build_options() -> ValidationOptions {
    let mut opts = jsonschema::options();
    opts.with_draft(Draft::Draft7);
    opts.should_validate_formats(true);
    opts.with_retriever(LocalOnlyRetriever);
    opts
}

/// Compiled request validators for every method of one service class.
pub struct ClassValidator {
    class: String,
    validators: HashMap<String, Validator>,
}

impl fmt::Debug for ClassValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("ClassValidator")
            .field("class", &self.class)
            .field("methods", &methods)
            .finish()
    }
}

impl ClassValidator {
    /// Compile validators for every method of `class`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::UnknownClass`] if `class` is not in `model`, and
    /// [`SchemaError::ValidatorBuild`] if a method's schema does not compile.
    pub fn new(ir: &SchemaIr, model: &ServiceModel, class: &str) -> Result<Self, SchemaError> {
        let descriptor = model
            .class(class)
            .ok_or_else(|| SchemaError::UnknownClass(class.to_string()))?;
        let raw_class = ir
            .raw_definition(class)
            .ok_or_else(|| SchemaError::UnknownClass(class.to_string()))?;

        let ctx_schema = model
            .context
            .client
            .type_name()
            .map(|name| json!({ "$ref": format!("{DEFINITIONS_PREFIX}{name}") }));
        let definitions = ir.raw_definitions().clone();
        let opts = build_options();

        let build_error = |method: &str, reason: String| SchemaError::ValidatorBuild {
            class: class.to_string(),
            method: method.to_string(),
            reason,
        };

        let mut validators = HashMap::with_capacity(descriptor.methods.len());
        for method in &descriptor.methods {
            let mut schema = raw_class["properties"][&method.name]["properties"]["params"].clone();
            let obj = schema
                .as_object_mut()
                .ok_or_else(|| build_error(&method.name, "'params' is not an object schema".into()))?;

            if let Some(ctx) = &ctx_schema {
                let props = obj.entry("properties").or_insert_with(|| json!({}));
                if let Some(props) = props.as_object_mut() {
                    props.insert(CTX_FIELD.to_string(), ctx.clone());
                }
            }
            obj.insert("definitions".to_string(), definitions.clone());

            let validator = opts
                .build(&schema)
                .map_err(|e| build_error(&method.name, e.to_string()))?;
            validators.insert(method.name.clone(), validator);
        }

        Ok(Self {
            class: class.to_string(),
            validators,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.validators.contains_key(method)
    }

    /// Validate a request body for `method` and return it in flattened form.
    pub fn validate(&self, method: &str, body: Value) -> Result<Map<String, Value>, ValidationError> {
        let validator = self
            .validators
            .get(method)
            .ok_or_else(|| ValidationError::MethodNotFound {
                method: method.to_string(),
            })?;

        let malformed = || ValidationError::MalformedBody {
            method: method.to_string(),
        };
        let body = RequestBody::classify(body)
            .into_flattened()
            .ok_or_else(malformed)?;

        let instance = Value::Object(body);
        let violations: Vec<Violation> = validator
            .iter_errors(&instance)
            .map(|e| {
                let schema_path = e.schema_path.to_string();
                Violation {
                    instance_path: e.instance_path.to_string(),
                    keyword: schema_path.rsplit('/').next().unwrap_or_default().to_string(),
                    schema_path,
                    message: e.to_string(),
                }
            })
            .collect();

        if !violations.is_empty() {
            return Err(ValidationError::SchemaViolation {
                method: method.to_string(),
                violations: ValidationViolations { violations },
            });
        }

        match instance {
            Value::Object(body) => Ok(body),
            _ => Err(malformed()),
        }
    }
}
