//! # Schema IR
//!
//! Typed view of the language-neutral schema document produced by the
//! schema extraction tool. The document is a JSON (or YAML) object whose
//! `definitions` map holds one entry per named type. Document order of
//! `definitions` and of every `properties` map is significant; it is kept
//! intact because `serde_json` is built with `preserve_order`.
//!
//! Parsing classifies each definition as an object schema (which may carry
//! methods), an enum, or an alias, and turns every property schema into a
//! [`PropertySchema`]. Anything that fits none of the recognized shapes is
//! rejected with [`SchemaError::UnrecognizedShape`] naming the definition
//! and property path.
//!
//! The raw document is retained next to the typed view: the compiler
//! serializes it verbatim into the service model and the validation engine
//! compiles JSON Schema validators straight from it.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::SchemaError;

/// Prefix of every local reference in the IR.
pub const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// JSON primitive type names understood by the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl Primitive {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    /// The JSON Schema spelling of this primitive.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// Schema of a single value: an attribute, a parameter, a return type or an
/// array element.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertySchema {
    Primitive {
        kind: Primitive,
        format: Option<String>,
    },
    /// Reference to another definition, by bare name.
    Ref(String),
    Array(Box<PropertySchema>),
    /// `anyOf` alternatives in declared order, duplicates kept.
    Union(Vec<PropertySchema>),
}

impl PropertySchema {
    /// `true` for `{type: "string", format: "date-time"}`.
    pub fn is_date(&self) -> bool {
        matches!(
            self,
            PropertySchema::Primitive { kind: Primitive::String, format: Some(f) } if f == "date-time"
        )
    }
}

/// A remote method: its parameter object, return type and declared errors.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSchema {
    pub params: ObjectSchema,
    pub returns: PropertySchema,
    /// A reference or a union of references to exception definitions.
    pub throws: Option<PropertySchema>,
}

/// What a property of an object definition describes.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Attribute(PropertySchema),
    Method(MethodSchema),
}

/// A named property, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub member: Member,
}

/// An object schema: ordered properties plus `required` and `propertyOrder`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    pub properties: Vec<Property>,
    pub required: Vec<String>,
    pub property_order: Vec<String>,
}

impl ObjectSchema {
    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

/// Classification of a top-level definition.
#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionKind {
    /// Classes and exception shapes.
    Object(ObjectSchema),
    /// `{type, enum: [...]}` literal sets.
    Enum(Vec<Value>),
    /// A definition whose body is itself a property schema.
    Alias(PropertySchema),
}

/// One entry of the IR `definitions` map.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
}

/// A parsed schema IR document.
#[derive(Debug, Clone)]
pub struct SchemaIr {
    definitions: Vec<Definition>,
    document: Value,
}

impl SchemaIr {
    /// Parse an already-decoded IR document.
    pub fn from_value(document: Value) -> Result<Self, SchemaError> {
        let defs = document
            .as_object()
            .ok_or_else(|| SchemaError::MalformedDocument("document is not an object".into()))?
            .get("definitions")
            .ok_or_else(|| SchemaError::MalformedDocument("missing 'definitions'".into()))?
            .as_object()
            .ok_or_else(|| {
                SchemaError::MalformedDocument("'definitions' is not an object".into())
            })?;

        let definitions = defs
            .iter()
            .map(|(name, body)| parse_definition(name, body))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            definitions,
            document,
        })
    }

    pub fn from_json_str(source: &str) -> Result<Self, SchemaError> {
        let document: Value = serde_json::from_str(source)
            .map_err(|e| SchemaError::MalformedDocument(format!("invalid JSON: {e}")))?;
        Self::from_value(document)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, SchemaError> {
        let document: Value = serde_yaml::from_str(source)
            .map_err(|e| SchemaError::MalformedDocument(format!("invalid YAML: {e}")))?;
        Self::from_value(document)
    }

    /// Load an IR file. `.yaml`/`.yml` files are read as YAML, everything
    /// else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");

        let parsed = if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        };
        parsed.map_err(|e| match e {
            SchemaError::MalformedDocument(reason) => SchemaError::Load {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// All definitions, in document order.
    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// The untouched document this IR was parsed from.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The raw `definitions` map of the document.
    pub fn raw_definitions(&self) -> &Value {
        &self.document["definitions"]
    }

    /// The raw JSON body of one definition.
    pub fn raw_definition(&self, name: &str) -> Option<&Value> {
        self.document["definitions"].get(name)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

fn child(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn unrecognized(definition: &str, path: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::UnrecognizedShape {
        definition: definition.to_string(),
        path: if path.is_empty() {
            "(root)".to_string()
        } else {
            path.to_string()
        },
        reason: reason.into(),
    }
}

fn parse_definition(name: &str, body: &Value) -> Result<Definition, SchemaError> {
    let obj = body
        .as_object()
        .ok_or_else(|| unrecognized(name, "", "definition is not an object"))?;

    let kind = if let Some(values) = obj.get("enum") {
        let values = values
            .as_array()
            .ok_or_else(|| unrecognized(name, "", "'enum' is not an array"))?;
        DefinitionKind::Enum(values.clone())
    } else if obj.contains_key("properties") || obj.get("type") == Some(&Value::from("object")) {
        DefinitionKind::Object(parse_object(obj, name, "", true)?)
    } else {
        DefinitionKind::Alias(parse_property(body, name, "")?)
    };

    Ok(Definition {
        name: name.to_string(),
        kind,
    })
}

fn parse_object(
    obj: &Map<String, Value>,
    definition: &str,
    path: &str,
    allow_methods: bool,
) -> Result<ObjectSchema, SchemaError> {
    if let Some(t) = obj.get("type") {
        if t != "object" {
            return Err(unrecognized(definition, path, format!("expected an object schema, found type {t}")));
        }
    }

    let mut schema = ObjectSchema::default();

    if let Some(props) = obj.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| unrecognized(definition, path, "'properties' is not an object"))?;
        for (name, node) in props {
            let at = child(path, name);
            let member = if allow_methods && is_method_shape(node) {
                Member::Method(parse_method(node, definition, &at)?)
            } else {
                Member::Attribute(parse_property(node, definition, &at)?)
            };
            schema.properties.push(Property {
                name: name.clone(),
                member,
            });
        }
    }

    schema.required = string_list(obj.get("required"), definition, &child(path, "required"))?;
    schema.property_order =
        string_list(obj.get("propertyOrder"), definition, &child(path, "propertyOrder"))?;
    Ok(schema)
}

fn string_list(node: Option<&Value>, definition: &str, path: &str) -> Result<Vec<String>, SchemaError> {
    let Some(node) = node else {
        return Ok(Vec::new());
    };
    node.as_array()
        .ok_or_else(|| unrecognized(definition, path, "expected an array of names"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| unrecognized(definition, path, "expected an array of names"))
        })
        .collect()
}

fn is_method_shape(node: &Value) -> bool {
    let Some(obj) = node.as_object() else {
        return false;
    };
    if obj.get("type").is_some_and(|t| t != "object") {
        return false;
    }
    obj.get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| p.contains_key("params") && p.contains_key("returns"))
}

fn parse_method(node: &Value, definition: &str, path: &str) -> Result<MethodSchema, SchemaError> {
    let props = &node["properties"];

    let params_path = child(path, "params");
    let params = props["params"]
        .as_object()
        .ok_or_else(|| unrecognized(definition, &params_path, "'params' is not an object schema"))?;
    let params = parse_object(params, definition, &params_path, false)?;

    let returns = parse_property(&props["returns"], definition, &child(path, "returns"))?;

    let throws = match props.get("throws") {
        Some(node) => {
            let at = child(path, "throws");
            let parsed = parse_property(node, definition, &at)?;
            if !only_refs(&parsed) {
                return Err(unrecognized(
                    definition,
                    &at,
                    "'throws' must be a reference or a union of references",
                ));
            }
            Some(parsed)
        }
        None => None,
    };

    Ok(MethodSchema {
        params,
        returns,
        throws,
    })
}

fn only_refs(node: &PropertySchema) -> bool {
    match node {
        PropertySchema::Ref(_) => true,
        PropertySchema::Union(members) => members.iter().all(only_refs),
        _ => false,
    }
}

fn parse_property(node: &Value, definition: &str, path: &str) -> Result<PropertySchema, SchemaError> {
    let obj = node
        .as_object()
        .ok_or_else(|| unrecognized(definition, path, "property schema is not an object"))?;

    if let Some(target) = obj.get("$ref") {
        let target = target
            .as_str()
            .ok_or_else(|| unrecognized(definition, path, "'$ref' is not a string"))?;
        let name = target.strip_prefix(DEFINITIONS_PREFIX).ok_or_else(|| {
            unrecognized(
                definition,
                path,
                format!("'{target}' is not a local {DEFINITIONS_PREFIX} reference"),
            )
        })?;
        return Ok(PropertySchema::Ref(name.to_string()));
    }

    if let Some(alternatives) = obj.get("anyOf") {
        let alternatives = alternatives
            .as_array()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| unrecognized(definition, path, "'anyOf' must be a non-empty array"))?;
        return alternatives
            .iter()
            .enumerate()
            .map(|(i, alt)| parse_property(alt, definition, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(PropertySchema::Union);
    }

    let format = obj.get("format").and_then(Value::as_str).map(str::to_string);

    match obj.get("type") {
        Some(Value::String(name)) => parse_typed(name, obj, format, definition, path),
        Some(Value::Array(names)) if !names.is_empty() => names
            .iter()
            .map(|n| {
                let kind = n.as_str().and_then(Primitive::from_name).ok_or_else(|| {
                    unrecognized(definition, path, format!("{n} is not a primitive type name"))
                })?;
                let format = if kind == Primitive::String { format.clone() } else { None };
                Ok(PropertySchema::Primitive { kind, format })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(PropertySchema::Union),
        Some(other) => Err(unrecognized(definition, path, format!("unsupported 'type' value {other}"))),
        None => Err(unrecognized(definition, path, "expected 'type', '$ref' or 'anyOf'")),
    }
}

fn parse_typed(
    name: &str,
    obj: &Map<String, Value>,
    format: Option<String>,
    definition: &str,
    path: &str,
) -> Result<PropertySchema, SchemaError> {
    match name {
        "array" => {
            let items = obj
                .get("items")
                .filter(|i| i.is_object())
                .ok_or_else(|| unrecognized(definition, path, "array schema without an 'items' schema"))?;
            let element = parse_property(items, definition, &format!("{path}[]"))?;
            Ok(PropertySchema::Array(Box::new(element)))
        }
        "object" => Err(unrecognized(
            definition,
            path,
            "inline object schemas are not supported, declare a named definition",
        )),
        other => {
            let kind = Primitive::from_name(other)
                .ok_or_else(|| unrecognized(definition, path, format!("unknown type '{other}'")))?;
            Ok(PropertySchema::Primitive { kind, format })
        }
    }
}
