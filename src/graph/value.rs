//! Typed property values and conformance against declared property types

use crate::ontology::PropertyType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Typed property values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Always kept sorted and deduplicated, so array merges commute
    Array(Vec<PropertyValue>),
}

/// Properties collection, ordered by name
pub type Properties = BTreeMap<String, PropertyValue>;

impl PropertyValue {
    /// Convert a raw JSON value to the declared type.
    ///
    /// Returns `Ok(None)` for null. Integers are accepted for `float`
    /// properties and a lone scalar is promoted for array properties; any
    /// other mismatch is an error describing the violation.
    pub fn conform(value: &Value, ty: PropertyType) -> Result<Option<PropertyValue>, String> {
        if value.is_null() {
            return Ok(None);
        }
        if ty.is_array() {
            let items: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                scalar => vec![scalar],
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if item.is_null() {
                    continue;
                }
                out.push(Self::conform_scalar(item, ty.element())?);
            }
            return Ok(Some(PropertyValue::Array(normalize(out))));
        }
        Self::conform_scalar(value, ty).map(Some)
    }

    fn conform_scalar(value: &Value, ty: PropertyType) -> Result<PropertyValue, String> {
        let converted = match (ty, value) {
            (PropertyType::Str, Value::String(s)) => Some(PropertyValue::String(s.clone())),
            (PropertyType::Int, Value::Number(n)) => n.as_i64().map(PropertyValue::Int),
            (PropertyType::Float, Value::Number(n)) => n.as_f64().map(PropertyValue::Float),
            (PropertyType::Bool, Value::Bool(b)) => Some(PropertyValue::Bool(*b)),
            _ => None,
        };
        converted.ok_or_else(|| format!("expected {}, found {}", ty, describe(value)))
    }

    /// Infer a declared type from a raw value, for schema extension.
    ///
    /// Returns `None` for nulls, objects, empty or mixed arrays.
    pub fn infer_type(value: &Value) -> Option<PropertyType> {
        match value {
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::Number(n) if n.is_i64() => Some(PropertyType::Int),
            Value::Number(_) => Some(PropertyType::Float),
            Value::String(_) => Some(PropertyType::Str),
            Value::Array(items) => {
                let mut element: Option<PropertyType> = None;
                for item in items.iter().filter(|v| !v.is_null()) {
                    let ty = match Self::infer_type(item)? {
                        t if t.is_array() => return None,
                        t => t,
                    };
                    element = match (element, ty) {
                        (None, t) => Some(t),
                        (Some(a), b) if a == b => Some(a),
                        (Some(PropertyType::Int), PropertyType::Float)
                        | (Some(PropertyType::Float), PropertyType::Int) => Some(PropertyType::Float),
                        _ => return None,
                    };
                }
                element.map(|t| t.array_of())
            }
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Total order used for array normalization.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.canonical_cmp(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) => 1,
            Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::Array(_) => 4,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => write!(f, "{}", s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Sort and deduplicate array elements.
pub fn normalize(mut items: Vec<PropertyValue>) -> Vec<PropertyValue> {
    items.sort_by(|a, b| a.canonical_cmp(b));
    items.dedup_by(|a, b| a.canonical_cmp(b) == Ordering::Equal);
    items
}

/// Set union of two normalized arrays.
pub fn union(existing: &[PropertyValue], incoming: &[PropertyValue]) -> Vec<PropertyValue> {
    normalize(existing.iter().chain(incoming.iter()).cloned().collect())
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
