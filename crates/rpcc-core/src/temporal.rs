//! # Temporal Types -- Date Coercion at the Wire Boundary
//!
//! Date-typed values (`{type: "string", format: "date-time"}` in the IR,
//! `Date` in the model) travel as ISO-8601 strings. Both ends normalize them
//! to one canonical rendering: UTC, millisecond precision, `Z` suffix
//! (`2026-01-15T12:00:00.250Z`).
//!
//! Parsing is lenient: any RFC 3339 offset is accepted and converted to
//! UTC, and a JSON integer is read as milliseconds since the Unix epoch.
//! Sub-millisecond precision is truncated so a value survives any number of
//! round trips unchanged.
//!
//! [`normalize_dates`] walks a JSON value guided by its [`TypeExpr`],
//! following references, arrays, aliases and unions through the
//! [`ServiceModel`], and rewrites every Date it finds in place.

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::DateCoercionError;
use crate::model::{ClassDescriptor, ServiceModel, TypeDef, TypeExpr};

/// Alias hops followed before giving up on a self-referential alias chain.
const MAX_ALIAS_HOPS: usize = 32;

/// A UTC instant with millisecond precision, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WireDate(DateTime<Utc>);

impl WireDate {
    /// Current UTC time, truncated to milliseconds.
    pub fn now() -> Self {
        Self::from_utc(Utc::now())
    }

    /// Wrap a `DateTime<Utc>`, truncating sub-millisecond precision.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        let millis_only = dt.nanosecond() / 1_000_000 * 1_000_000;
        Self(dt.with_nanosecond(millis_only).unwrap_or(dt))
    }

    pub fn from_epoch_millis(millis: i64) -> Result<Self, DateCoercionError> {
        DateTime::from_timestamp_millis(millis)
            .map(Self)
            .ok_or_else(|| DateCoercionError {
                value: millis.to_string(),
                reason: "epoch milliseconds out of range".into(),
            })
    }

    /// Parse an RFC 3339 string with any offset.
    pub fn parse(s: &str) -> Result<Self, DateCoercionError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self::from_utc(dt.with_timezone(&Utc)))
            .map_err(|e| DateCoercionError {
                value: format!("{s:?}"),
                reason: e.to_string(),
            })
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Canonical wire rendering, e.g. `2026-01-15T12:00:00.000Z`.
    pub fn to_iso8601(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl std::fmt::Display for WireDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl From<DateTime<Utc>> for WireDate {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

impl Serialize for WireDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso8601())
    }
}

impl<'de> Deserialize<'de> for WireDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        WireDate::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Rewrite every Date-typed value inside `value` to its canonical rendering.
///
/// Values that do not match the expected shape are left untouched; request
/// validation is responsible for rejecting them. Only a value in a Date
/// position that cannot be read as an instant is an error.
pub fn normalize_dates(
    value: &mut Value,
    ty: &TypeExpr,
    model: &ServiceModel,
) -> Result<(), DateCoercionError> {
    if !ty.mentions_date(model) {
        return Ok(());
    }
    normalize(value, ty, model, 0)
}

fn normalize(
    value: &mut Value,
    ty: &TypeExpr,
    model: &ServiceModel,
    hops: usize,
) -> Result<(), DateCoercionError> {
    match ty {
        TypeExpr::Date => coerce_date(value),
        TypeExpr::Array(inner) => {
            if let Value::Array(items) = value {
                for item in items {
                    normalize(item, inner, model, 0)?;
                }
            }
            Ok(())
        }
        TypeExpr::Ref(name) => match model.lookup(name) {
            Some(TypeDef::Class(class)) | Some(TypeDef::Exception(class)) => {
                normalize_object(value, class, model)
            }
            Some(TypeDef::Alias(alias)) if hops < MAX_ALIAS_HOPS => {
                normalize(value, &alias.type_expr, model, hops + 1)
            }
            _ => Ok(()),
        },
        TypeExpr::Union(members) => normalize_union(value, members, model, hops),
        TypeExpr::String | TypeExpr::Number | TypeExpr::Boolean | TypeExpr::Null => Ok(()),
    }
}

fn coerce_date(value: &mut Value) -> Result<(), DateCoercionError> {
    let date = match &*value {
        Value::Null => return Ok(()),
        Value::String(s) => WireDate::parse(s)?,
        Value::Number(n) => match n.as_i64() {
            Some(millis) => WireDate::from_epoch_millis(millis)?,
            None => {
                return Err(DateCoercionError {
                    value: n.to_string(),
                    reason: "epoch milliseconds must be an integer".into(),
                })
            }
        },
        other => {
            return Err(DateCoercionError {
                value: other.to_string(),
                reason: "expected an ISO-8601 string".into(),
            })
        }
    };
    *value = Value::String(date.to_iso8601());
    Ok(())
}

fn normalize_object(
    value: &mut Value,
    class: &ClassDescriptor,
    model: &ServiceModel,
) -> Result<(), DateCoercionError> {
    if let Value::Object(map) = value {
        for attr in &class.attributes {
            if let Some(field) = map.get_mut(&attr.name) {
                normalize(field, &attr.type_expr, model, 0)?;
            }
        }
    }
    Ok(())
}

// A union is normalized through the first member matching the value's JSON
// kind, after alias references among the members are expanded. A string is
// coerced only when the union has Date but no plain string.
fn normalize_union(
    value: &mut Value,
    members: &[TypeExpr],
    model: &ServiceModel,
    hops: usize,
) -> Result<(), DateCoercionError> {
    let mut flat = Vec::with_capacity(members.len());
    expand_aliases(members, model, hops, &mut flat);

    match &*value {
        Value::String(_) => {
            let has_date = flat.iter().any(|m| **m == TypeExpr::Date);
            let has_string = flat.iter().any(|m| **m == TypeExpr::String);
            if has_date && !has_string {
                coerce_date(value)?;
            }
            Ok(())
        }
        Value::Array(_) => match flat.iter().find(|m| matches!(m, TypeExpr::Array(_))) {
            Some(member) => normalize(value, member, model, hops),
            None => Ok(()),
        },
        Value::Object(map) => {
            let matching = flat.iter().find_map(|m| match m {
                TypeExpr::Ref(name) => match model.lookup(name) {
                    Some(TypeDef::Class(c)) | Some(TypeDef::Exception(c))
                        if c.attributes
                            .iter()
                            .all(|a| a.optional || map.contains_key(&a.name)) =>
                    {
                        Some(c)
                    }
                    _ => None,
                },
                _ => None,
            });
            match matching {
                Some(class) => normalize_object(value, class, model),
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn expand_aliases<'a>(
    members: &'a [TypeExpr],
    model: &'a ServiceModel,
    hops: usize,
    out: &mut Vec<&'a TypeExpr>,
) {
    for member in members {
        let alias = match member {
            TypeExpr::Ref(name) if hops < MAX_ALIAS_HOPS => match model.lookup(name) {
                Some(TypeDef::Alias(alias)) => Some(&alias.type_expr),
                _ => None,
            },
            _ => None,
        };
        match (alias, member) {
            (Some(TypeExpr::Union(inner)), _) => expand_aliases(inner, model, hops + 1, out),
            (Some(target), _) => expand_aliases(std::slice::from_ref(target), model, hops + 1, out),
            (None, TypeExpr::Union(inner)) if hops < MAX_ALIAS_HOPS => {
                expand_aliases(inner, model, hops + 1, out)
            }
            (None, _) => out.push(member),
        }
    }
}
