//! External identifiers and entity mentions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A namespaced external identifier, written `namespace:value`
/// (e.g., `uniprot:P12345`, `go:GO:0071144`).
///
/// Only the first `:` separates the namespace, so values may contain
/// colons. An identifier without a namespace has an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExternalId {
    pub namespace: String,
    pub value: String,
}

impl ExternalId {
    pub fn new(namespace: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            value: value.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (namespace, value) = match raw.split_once(':') {
            Some((ns, value)) => (ns.trim().to_lowercase(), value.trim()),
            None => (String::new(), raw),
        };
        if value.is_empty() {
            return Err(format!("empty identifier value in '{}'", raw));
        }
        Ok(Self::new(namespace, value))
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}:{}", self.namespace, self.value)
        }
    }
}

impl TryFrom<String> for ExternalId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ExternalId> for String {
    fn from(value: ExternalId) -> Self {
        value.to_string()
    }
}

/// A raw per-source reference to an entity: its declared type and the
/// identifiers the source knows it by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub type_name: String,
    pub ids: BTreeSet<ExternalId>,
}

impl Mention {
    pub fn new(type_name: impl Into<String>, ids: impl IntoIterator<Item = ExternalId>) -> Self {
        Self {
            type_name: type_name.into(),
            ids: ids.into_iter().collect(),
        }
    }

    /// Parse `namespace:value` strings into a mention.
    pub fn parse<'a>(
        type_name: impl Into<String>,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, String> {
        let ids = ids
            .into_iter()
            .map(ExternalId::parse)
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            type_name: type_name.into(),
            ids,
        })
    }

    /// Alias strings (identifier values) carried by the mention.
    pub fn aliases(&self) -> BTreeSet<String> {
        self.ids.iter().map(|id| id.value.clone()).collect()
    }

    /// Full `namespace:value` strings, sorted.
    pub fn id_strings(&self) -> Vec<String> {
        self.ids.iter().map(ToString::to_string).collect()
    }
}
