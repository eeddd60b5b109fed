//! Schema violations: property values that could not be stored

use serde::{Deserialize, Serialize};
use std::fmt;

/// A property dropped because it did not fit the ontology.
///
/// The record itself is kept; only the offending value is discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaViolation {
    pub source: String,
    pub type_name: String,
    /// Identifiers of the record the property came from
    pub subject: String,
    pub property: String,
    pub reason: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} on {} from {}: {}",
            self.type_name, self.property, self.subject, self.source, self.reason
        )
    }
}
