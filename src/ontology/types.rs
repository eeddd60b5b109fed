//! Ontology type definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Declared type of a property.
///
/// Serializes using the schema notation `str`, `int`, `float`, `bool`
/// and the array forms `str[]`, `int[]`, `float[]`, `bool[]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PropertyType {
    Str,
    Int,
    Float,
    Bool,
    StrArray,
    IntArray,
    FloatArray,
    BoolArray,
}

impl PropertyType {
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Self::StrArray | Self::IntArray | Self::FloatArray | Self::BoolArray
        )
    }

    /// The scalar type of an array type (identity for scalars).
    pub fn element(&self) -> PropertyType {
        match self {
            Self::StrArray => Self::Str,
            Self::IntArray => Self::Int,
            Self::FloatArray => Self::Float,
            Self::BoolArray => Self::Bool,
            scalar => *scalar,
        }
    }

    /// The array type holding elements of this scalar type.
    pub fn array_of(&self) -> PropertyType {
        match self {
            Self::Str | Self::StrArray => Self::StrArray,
            Self::Int | Self::IntArray => Self::IntArray,
            Self::Float | Self::FloatArray => Self::FloatArray,
            Self::Bool | Self::BoolArray => Self::BoolArray,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::StrArray => "str[]",
            Self::IntArray => "int[]",
            Self::FloatArray => "float[]",
            Self::BoolArray => "bool[]",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, array) = match s.trim().strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s.trim(), false),
        };
        let scalar = match base {
            "str" | "string" => Self::Str,
            "int" | "integer" | "long" => Self::Int,
            "float" | "double" => Self::Float,
            "bool" | "boolean" => Self::Bool,
            other => return Err(format!("unknown property type: {}", other)),
        };
        Ok(if array { scalar.array_of() } else { scalar })
    }
}

impl TryFrom<String> for PropertyType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.as_str().to_string()
    }
}

/// Whether a type is represented as a node or as an edge in the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    #[default]
    Node,
    Edge,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => f.write_str("node"),
            Self::Edge => f.write_str("edge"),
        }
    }
}

/// Declared properties, keyed by property name.
pub type PropertySchema = BTreeMap<String, PropertyType>;

/// A registered type in the ontology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyType {
    /// Unique type name (e.g., "Protein", "has_member")
    pub name: String,
    /// `is_a` parent, if any
    pub parent: Option<String>,
    /// Node or edge
    pub kind: TypeKind,
    /// Properties declared directly on this type
    pub properties: PropertySchema,
    /// Source module that first registered the type
    pub introduced_by: String,
    /// Registry revision at registration time
    pub revision: u64,
    /// Registry revision of the last property extension
    #[serde(default)]
    pub revised_at: u64,
}

/// A request to register (or re-register) a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub properties: PropertySchema,
}

impl TypeDeclaration {
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            kind: TypeKind::Node,
            properties: PropertySchema::new(),
        }
    }

    pub fn edge(name: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Edge,
            ..Self::node(name)
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.properties.insert(name.into(), ty);
        self
    }
}

/// One revision bump of the registry: a new type or new properties on an
/// existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyDelta {
    pub revision: u64,
    pub type_name: String,
    /// True when the delta created the type
    pub created: bool,
    pub added_properties: PropertySchema,
    pub source: String,
}
