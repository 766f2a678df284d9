//! # Error Types
//!
//! Errors raised while loading a schema IR document and compiling it into a
//! [`ServiceModel`](crate::model::ServiceModel). All errors use `thiserror`.
//!
//! Every variant names the offending definition and, where one exists, the
//! property path inside it (`add.params.a`), so a broken IR can be fixed
//! without bisecting the document.

use thiserror::Error;

/// Failure to load or compile a schema IR document.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The document is not a JSON/YAML object with a `definitions` map.
    #[error("malformed schema document: {0}")]
    MalformedDocument(String),

    /// A property schema matched none of the recognized shapes.
    #[error("definition '{definition}' at '{path}': unrecognized property schema ({reason})")]
    UnrecognizedShape {
        /// Definition containing the property.
        definition: String,
        /// Dotted path of the property inside the definition.
        path: String,
        /// What was wrong with the node.
        reason: String,
    },

    /// A `$ref` points at a name missing from `definitions`.
    #[error("definition '{definition}' at '{path}' references unknown type '{target}'")]
    UnresolvedRef {
        /// Definition containing the reference.
        definition: String,
        /// Property holding the reference.
        path: String,
        /// The missing type name.
        target: String,
    },

    /// A method's `throws` resolves to a definition that is not an exception.
    #[error("method '{definition}.{method}' declares '{target}' in throws, which is not an exception type")]
    NotAnException {
        /// Class declaring the method.
        definition: String,
        /// Method name.
        method: String,
        /// The offending type name.
        target: String,
    },

    /// Class definitions reference each other in a cycle.
    #[error("cyclic reference between class definitions: {}", cycle.join(" -> "))]
    CyclicReference {
        /// Definitions on the cycle; the first name is repeated at the end.
        cycle: Vec<String>,
    },

    /// A custom context type named in the configuration is not an object
    /// definition of the IR.
    #[error("{role} type '{type_name}' is not an object definition of the schema")]
    UnknownContextType {
        /// `ClientContext` or `ServerOnlyContext`.
        role: &'static str,
        /// The configured type name.
        type_name: String,
    },

    /// A class name is not part of the compiled model.
    #[error("class '{0}' is not defined in the service model")]
    UnknownClass(String),

    /// A per-method request validator could not be compiled.
    #[error("failed to compile request validator for '{class}.{method}': {reason}")]
    ValidatorBuild {
        /// Service class.
        class: String,
        /// Method name.
        method: String,
        /// Compiler message.
        reason: String,
    },

    /// The IR file could not be read or parsed.
    #[error("failed to load schema from '{path}': {reason}")]
    Load {
        /// Path of the file.
        path: String,
        /// Underlying IO or parse error.
        reason: String,
    },
}

/// A Date-typed value could not be coerced at the wire boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot coerce '{value}' to a date: {reason}")]
pub struct DateCoercionError {
    /// The rejected value, rendered as JSON.
    pub value: String,
    /// Parser message.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_reference_names_the_whole_cycle() {
        let err = SchemaError::CyclicReference {
            cycle: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic reference between class definitions: A -> B -> A"
        );
    }

    #[test]
    fn unresolved_ref_names_definition_and_property() {
        let err = SchemaError::UnresolvedRef {
            definition: "Svc".into(),
            path: "get.returns".into(),
            target: "Missing".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'Svc'"));
        assert!(msg.contains("get.returns"));
        assert!(msg.contains("'Missing'"));
    }
}
