//! # Schema Compiler
//!
//! Transforms a parsed [`SchemaIr`] into a [`ServiceModel`]:
//!
//! 1. Every `$ref` is resolved against `definitions`; a dangling reference
//!    fails with [`SchemaError::UnresolvedRef`].
//! 2. Definitions are partitioned by shape. An object schema whose
//!    properties are exactly `{message, name, stack}` (all strings, with
//!    `message` and `name` required) is an exception. Enums and aliases go
//!    to their own lists. Every other object schema is a class.
//! 3. Classes are emitted in a stable topological order: a class referenced
//!    by another appears before it, ties broken by IR order. Edges to
//!    exceptions, enums and aliases are always satisfied; self references
//!    impose no order. A cycle fails with [`SchemaError::CyclicReference`].
//! 4. Each class property becomes an attribute or, for method schemas, a
//!    [`MethodDescriptor`] whose parameters follow `params.propertyOrder`.
//!
//! Compilation is deterministic: identical IR yields an identical model.

use std::collections::HashSet;

use rpcc_core::ir::{
    Definition, DefinitionKind, Member, MethodSchema, ObjectSchema, Primitive, Property,
    PropertySchema, SchemaIr,
};
use rpcc_core::{
    AliasDescriptor, AttributeDescriptor, ClassDescriptor, ContextConfig, ContextModel,
    ContextSetting, ContextState, EnumDescriptor, ExceptionDescriptor, MethodDescriptor,
    ParameterDescriptor, SchemaError, ServiceModel, TypeExpr, CLIENT_CONTEXT,
    SERVER_ONLY_CONTEXT,
};

const EXCEPTION_FIELDS: [&str; 3] = ["message", "name", "stack"];

// ── Reference discovery ─────────────────────────────────────────────

/// Accumulates reference targets in first-encounter order, de-duplicated.
#[derive(Debug, Default)]
pub struct RefCollector {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl RefCollector {
    fn visit(&mut self, target: &str) {
        if self.seen.insert(target.to_string()) {
            self.order.push(target.to_string());
        }
    }

    pub fn into_refs(self) -> Vec<String> {
        self.order
    }
}

/// IR nodes that may contain references.
pub trait RefWalk {
    fn walk_refs(&self, out: &mut RefCollector);
}

impl RefWalk for PropertySchema {
    fn walk_refs(&self, out: &mut RefCollector) {
        match self {
            PropertySchema::Ref(target) => out.visit(target),
            PropertySchema::Array(items) => items.walk_refs(out),
            PropertySchema::Union(members) => members.iter().for_each(|m| m.walk_refs(out)),
            PropertySchema::Primitive { .. } => {}
        }
    }
}

impl RefWalk for MethodSchema {
    fn walk_refs(&self, out: &mut RefCollector) {
        self.params.walk_refs(out);
        self.returns.walk_refs(out);
        if let Some(throws) = &self.throws {
            throws.walk_refs(out);
        }
    }
}

impl RefWalk for Member {
    fn walk_refs(&self, out: &mut RefCollector) {
        match self {
            Member::Attribute(schema) => schema.walk_refs(out),
            Member::Method(method) => method.walk_refs(out),
        }
    }
}

impl RefWalk for ObjectSchema {
    fn walk_refs(&self, out: &mut RefCollector) {
        for property in &self.properties {
            property.member.walk_refs(out);
        }
    }
}

impl RefWalk for Definition {
    fn walk_refs(&self, out: &mut RefCollector) {
        match &self.kind {
            DefinitionKind::Object(obj) => obj.walk_refs(out),
            DefinitionKind::Alias(schema) => schema.walk_refs(out),
            DefinitionKind::Enum(_) => {}
        }
    }
}

/// Every reference target reachable from `node`, depth-first, first
/// encounter wins.
pub fn find_refs<N: RefWalk + ?Sized>(node: &N) -> Vec<String> {
    let mut out = RefCollector::default();
    node.walk_refs(&mut out);
    out.into_refs()
}

// ── Type rendering ──────────────────────────────────────────────────

/// Map a property schema to its language-neutral type.
pub fn type_expr(node: &PropertySchema) -> TypeExpr {
    match node {
        _ if node.is_date() => TypeExpr::Date,
        PropertySchema::Primitive { kind, .. } => match kind {
            Primitive::String => TypeExpr::String,
            Primitive::Number | Primitive::Integer => TypeExpr::Number,
            Primitive::Boolean => TypeExpr::Boolean,
            Primitive::Null => TypeExpr::Null,
        },
        PropertySchema::Ref(name) => TypeExpr::Ref(name.clone()),
        PropertySchema::Array(items) => TypeExpr::Array(Box::new(type_expr(items))),
        PropertySchema::Union(members) => TypeExpr::Union(members.iter().map(type_expr).collect()),
    }
}

/// Render a property schema the way binding emitters print it.
pub fn type_to_string(node: &PropertySchema) -> String {
    type_expr(node).to_string()
}

// ── Compilation ─────────────────────────────────────────────────────

/// Compile `ir` into a service model, resolving context types per `context`.
pub fn compile(ir: &SchemaIr, context: &ContextConfig) -> Result<ServiceModel, SchemaError> {
    check_refs(ir)?;

    let mut exceptions: Vec<ExceptionDescriptor> = Vec::new();
    let mut class_defs: Vec<(&str, &ObjectSchema)> = Vec::new();
    let mut enums = Vec::new();
    let mut aliases = Vec::new();

    for def in ir.definitions() {
        match &def.kind {
            DefinitionKind::Object(obj) if is_exception_shape(obj) => {
                exceptions.push(ClassDescriptor {
                    name: def.name.clone(),
                    attributes: describe_attributes(obj),
                    methods: Vec::new(),
                });
            }
            DefinitionKind::Object(obj) => class_defs.push((def.name.as_str(), obj)),
            DefinitionKind::Enum(values) => enums.push(EnumDescriptor {
                name: def.name.clone(),
                values: values.clone(),
            }),
            DefinitionKind::Alias(schema) => aliases.push(AliasDescriptor {
                name: def.name.clone(),
                type_expr: type_expr(schema),
            }),
        }
    }

    let exception_names: HashSet<&str> = exceptions.iter().map(|e| e.name.as_str()).collect();

    let classes = order_classes(&class_defs)?
        .into_iter()
        .map(|(name, obj)| describe_class(name, obj, &exception_names))
        .collect::<Result<Vec<_>, _>>()?;

    let context = ContextModel {
        client: resolve_context(&context.client, CLIENT_CONTEXT, &classes)?,
        server_only: resolve_context(&context.server_only, SERVER_ONLY_CONTEXT, &classes)?,
    };

    let schema = serde_json::to_string(ir.document())
        .map_err(|e| SchemaError::MalformedDocument(e.to_string()))?;

    Ok(ServiceModel {
        schema,
        exceptions,
        classes,
        enums,
        aliases,
        context,
    })
}

fn check_refs(ir: &SchemaIr) -> Result<(), SchemaError> {
    let known: HashSet<&str> = ir.definitions().iter().map(|d| d.name.as_str()).collect();
    let unresolved = |definition: &str, path: &str, refs: Vec<String>| {
        match refs.into_iter().find(|r| !known.contains(r.as_str())) {
            Some(target) => Err(SchemaError::UnresolvedRef {
                definition: definition.to_string(),
                path: path.to_string(),
                target,
            }),
            None => Ok(()),
        }
    };

    for def in ir.definitions() {
        match &def.kind {
            DefinitionKind::Object(obj) => {
                for property in &obj.properties {
                    unresolved(&def.name, &property.name, find_refs(&property.member))?;
                }
            }
            DefinitionKind::Alias(schema) => unresolved(&def.name, "(root)", find_refs(schema))?,
            DefinitionKind::Enum(_) => {}
        }
    }
    Ok(())
}

fn is_exception_shape(obj: &ObjectSchema) -> bool {
    obj.properties.len() == EXCEPTION_FIELDS.len()
        && EXCEPTION_FIELDS.iter().all(|field| {
            matches!(
                obj.property(field).map(|p| &p.member),
                Some(Member::Attribute(PropertySchema::Primitive {
                    kind: Primitive::String,
                    ..
                }))
            )
        })
        && obj.is_required("message")
        && obj.is_required("name")
}

/// Stable topological order over classes; ties go to the earliest in IR order.
fn order_classes<'a>(
    class_defs: &[(&'a str, &'a ObjectSchema)],
) -> Result<Vec<(&'a str, &'a ObjectSchema)>, SchemaError> {
    let class_names: HashSet<&str> = class_defs.iter().map(|(name, _)| *name).collect();
    let deps: Vec<Vec<String>> = class_defs
        .iter()
        .map(|(name, obj)| {
            find_refs(*obj)
                .into_iter()
                .filter(|r| r != name && class_names.contains(r.as_str()))
                .collect()
        })
        .collect();

    let mut emitted = vec![false; class_defs.len()];
    let mut emitted_names: HashSet<&str> = HashSet::new();
    let mut order = Vec::with_capacity(class_defs.len());

    while order.len() < class_defs.len() {
        let ready = (0..class_defs.len())
            .find(|&i| !emitted[i] && deps[i].iter().all(|d| emitted_names.contains(d.as_str())));
        let Some(i) = ready else {
            return Err(SchemaError::CyclicReference {
                cycle: find_cycle(class_defs, &deps, &emitted),
            });
        };
        emitted[i] = true;
        emitted_names.insert(class_defs[i].0);
        order.push(class_defs[i]);
    }
    Ok(order)
}

// Every blocked class has at least one blocked dependency, so following the
// first one from any blocked class must revisit a class.
fn find_cycle(class_defs: &[(&str, &ObjectSchema)], deps: &[Vec<String>], emitted: &[bool]) -> Vec<String> {
    let index_of = |name: &str| class_defs.iter().position(|(n, _)| *n == name);
    let mut path: Vec<usize> = Vec::new();
    let mut current = emitted.iter().position(|done| !done);

    while let Some(i) = current {
        if let Some(start) = path.iter().position(|&p| p == i) {
            let mut cycle: Vec<String> = path[start..].iter().map(|&p| class_defs[p].0.to_string()).collect();
            cycle.push(class_defs[i].0.to_string());
            return cycle;
        }
        path.push(i);
        current = deps[i]
            .iter()
            .filter_map(|d| index_of(d))
            .find(|&j| !emitted[j]);
    }
    path.iter().map(|&p| class_defs[p].0.to_string()).collect()
}

fn describe_attributes(obj: &ObjectSchema) -> Vec<AttributeDescriptor> {
    obj.properties
        .iter()
        .filter_map(|p| match &p.member {
            Member::Attribute(schema) => Some(AttributeDescriptor {
                name: p.name.clone(),
                type_expr: type_expr(schema),
                optional: !obj.is_required(&p.name),
            }),
            Member::Method(_) => None,
        })
        .collect()
}

fn describe_class(
    name: &str,
    obj: &ObjectSchema,
    exceptions: &HashSet<&str>,
) -> Result<ClassDescriptor, SchemaError> {
    let methods = obj
        .properties
        .iter()
        .filter_map(|p| match &p.member {
            Member::Method(method) => Some(describe_method(name, &p.name, method, exceptions)),
            Member::Attribute(_) => None,
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClassDescriptor {
        name: name.to_string(),
        attributes: describe_attributes(obj),
        methods,
    })
}

fn describe_method(
    class: &str,
    name: &str,
    method: &MethodSchema,
    exceptions: &HashSet<&str>,
) -> Result<MethodDescriptor, SchemaError> {
    let ordered = ordered_parameters(&method.params);
    let count = ordered.len();
    let parameters = ordered
        .into_iter()
        .enumerate()
        .map(|(i, p)| match &p.member {
            Member::Attribute(schema) => Ok(ParameterDescriptor {
                name: p.name.clone(),
                type_expr: type_expr(schema),
                optional: !method.params.is_required(&p.name),
                last: i + 1 == count,
            }),
            Member::Method(_) => Err(SchemaError::UnrecognizedShape {
                definition: class.to_string(),
                path: format!("{name}.params.{}", p.name),
                reason: "a parameter cannot be a method schema".into(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let throws = method.throws.as_ref().map(find_refs).unwrap_or_default();
    if let Some(target) = throws.iter().find(|t| !exceptions.contains(t.as_str())) {
        return Err(SchemaError::NotAnException {
            definition: class.to_string(),
            method: name.to_string(),
            target: target.clone(),
        });
    }

    Ok(MethodDescriptor {
        name: name.to_string(),
        parameters,
        return_type: type_expr(&method.returns),
        throws,
    })
}

/// `propertyOrder` first, then unlisted properties in declared order.
fn ordered_parameters(params: &ObjectSchema) -> Vec<&Property> {
    let mut ordered: Vec<&Property> = Vec::with_capacity(params.properties.len());
    for name in &params.property_order {
        if let Some(p) = params.property(name) {
            if !ordered.iter().any(|o| o.name == p.name) {
                ordered.push(p);
            }
        }
    }
    for p in &params.properties {
        if !ordered.iter().any(|o| o.name == p.name) {
            ordered.push(p);
        }
    }
    ordered
}

fn resolve_context(
    setting: &ContextSetting,
    role: &'static str,
    classes: &[ClassDescriptor],
) -> Result<ContextState, SchemaError> {
    let defined = |name: &str| classes.iter().any(|c| c.name == name);
    match setting {
        ContextSetting::Disabled => Ok(ContextState::Disabled),
        ContextSetting::Default if defined(role) => Ok(ContextState::Present(role.to_string())),
        ContextSetting::Default => Ok(ContextState::Absent),
        ContextSetting::Custom(name) if defined(name) => Ok(ContextState::Present(name.clone())),
        ContextSetting::Custom(name) => Err(SchemaError::UnknownContextType {
            role,
            type_name: name.clone(),
        }),
    }
}
