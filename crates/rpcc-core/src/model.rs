//! # Service Model
//!
//! The compiled, dependency-ordered form of a schema IR. Built once by the
//! schema compiler and shared read-only by the validation engine, the
//! dispatch executor and the client runtime.
//!
//! The model serializes to the JSON document consumed by binding emitters:
//! field names are camelCase (`returnType`, `last`) and every type is
//! rendered through [`TypeExpr`]'s display form (`Array<Date>`,
//! `string | User`).

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::context::ContextModel;

/// Target-language-neutral type of an attribute, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    String,
    /// Both `number` and `integer`.
    Number,
    Boolean,
    Null,
    /// `string` with `format: date-time`.
    Date,
    Ref(String),
    Array(Box<TypeExpr>),
    Union(Vec<TypeExpr>),
}

impl TypeExpr {
    /// Whether a Date can occur anywhere inside a value of this type,
    /// following references through `model`.
    pub fn mentions_date(&self, model: &ServiceModel) -> bool {
        fn walk(ty: &TypeExpr, model: &ServiceModel, seen: &mut Vec<String>) -> bool {
            match ty {
                TypeExpr::Date => true,
                TypeExpr::Array(inner) => walk(inner, model, seen),
                TypeExpr::Union(members) => members.iter().any(|m| walk(m, model, seen)),
                TypeExpr::Ref(name) => {
                    if seen.iter().any(|s| s == name) {
                        return false;
                    }
                    seen.push(name.clone());
                    match model.lookup(name) {
                        Some(TypeDef::Class(class)) => {
                            class.attributes.iter().any(|a| walk(&a.type_expr, model, seen))
                        }
                        Some(TypeDef::Alias(alias)) => walk(&alias.type_expr, model, seen),
                        _ => false,
                    }
                }
                _ => false,
            }
        }
        walk(self, model, &mut Vec::new())
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::String => f.write_str("string"),
            TypeExpr::Number => f.write_str("number"),
            TypeExpr::Boolean => f.write_str("boolean"),
            TypeExpr::Null => f.write_str("null"),
            TypeExpr::Date => f.write_str("Date"),
            TypeExpr::Ref(name) => f.write_str(name),
            TypeExpr::Array(inner) => write!(f, "Array<{inner}>"),
            TypeExpr::Union(members) => {
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{member}")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for TypeExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A non-method property of a class or exception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: TypeExpr,
    pub optional: bool,
}

/// One positional parameter of a method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: TypeExpr,
    pub optional: bool,
    /// Set on the final parameter only.
    pub last: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    pub name: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: TypeExpr,
    /// Exception names this method may raise, de-duplicated.
    pub throws: Vec<String>,
}

impl MethodDescriptor {
    pub fn declares(&self, exception: &str) -> bool {
        self.throws.iter().any(|t| t == exception)
    }
}

/// A compiled object definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassDescriptor {
    pub name: String,
    pub attributes: Vec<AttributeDescriptor>,
    pub methods: Vec<MethodDescriptor>,
}

impl ClassDescriptor {
    /// A class with methods and no attributes gets a router and a client.
    pub fn is_service(&self) -> bool {
        !self.methods.is_empty() && self.attributes.is_empty()
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Exceptions share the class shape; their `methods` are always empty.
pub type ExceptionDescriptor = ClassDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDescriptor {
    pub name: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AliasDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: TypeExpr,
}

/// A definition of the model, found by name.
#[derive(Debug, Clone, Copy)]
pub enum TypeDef<'a> {
    Class(&'a ClassDescriptor),
    Exception(&'a ExceptionDescriptor),
    Enum(&'a EnumDescriptor),
    Alias(&'a AliasDescriptor),
}

/// Output of the schema compiler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceModel {
    /// The IR document, serialized verbatim.
    pub schema: String,
    pub exceptions: Vec<ExceptionDescriptor>,
    /// Dependency-ordered: a referenced class precedes its referrers.
    pub classes: Vec<ClassDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    pub aliases: Vec<AliasDescriptor>,
    pub context: ContextModel,
}

impl ServiceModel {
    pub fn class(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.iter().find(|c| c.name == name)
    }

    pub fn exception(&self, name: &str) -> Option<&ExceptionDescriptor> {
        self.exceptions.iter().find(|e| e.name == name)
    }

    pub fn is_exception(&self, name: &str) -> bool {
        self.exception(name).is_some()
    }

    /// Service classes, in model order.
    pub fn services(&self) -> impl Iterator<Item = &ClassDescriptor> {
        self.classes.iter().filter(|c| c.is_service())
    }

    /// Resolve any named definition.
    pub fn lookup(&self, name: &str) -> Option<TypeDef<'_>> {
        if let Some(class) = self.class(name) {
            return Some(TypeDef::Class(class));
        }
        if let Some(exception) = self.exception(name) {
            return Some(TypeDef::Exception(exception));
        }
        if let Some(e) = self.enums.iter().find(|e| e.name == name) {
            return Some(TypeDef::Enum(e));
        }
        self.aliases
            .iter()
            .find(|a| a.name == name)
            .map(TypeDef::Alias)
    }

    /// Attribute names of the client context type, if one is present.
    pub fn client_context_fields(&self) -> Vec<&str> {
        self.context_fields(self.context.client.type_name())
    }

    /// Attribute names of the server-only context type, if one is present.
    pub fn server_context_fields(&self) -> Vec<&str> {
        self.context_fields(self.context.server_only.type_name())
    }

    fn context_fields(&self, type_name: Option<&str>) -> Vec<&str> {
        type_name
            .and_then(|name| self.class(name))
            .map(|class| class.attributes.iter().map(|a| a.name.as_str()).collect())
            .unwrap_or_default()
    }
}
