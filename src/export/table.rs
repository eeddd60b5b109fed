//! Pipe-delimited bulk tables, one per ontology type
//!
//! Cell rules:
//! - columns are separated by `|`
//! - string cells are wrapped in `"`, embedded `"` doubled, and `\n`, `\r`,
//!   `\t` replaced by a space
//! - arrays are one string cell with elements joined by `;`; `;` and `\`
//!   inside an element are backslash-escaped
//! - numbers and booleans are bare; floats use shortest round-trip form
//! - a property the row does not have is an empty cell

use crate::graph::{CanonicalEntity, GraphAssembler, Properties, PropertyValue, Relation};
use crate::ontology::{OntologyRegistry, TypeKind};
use std::collections::{BTreeMap, BTreeSet};

pub const COLUMN_DELIMITER: char = '|';
pub const ARRAY_DELIMITER: char = ';';

/// A rendered-ready table for one type.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub kind: TypeKind,
    pub type_name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Path relative to the output directory, e.g. `nodes/Protein.psv`.
    pub fn relative_path(&self) -> String {
        let dir = match self.kind {
            TypeKind::Node => "nodes",
            TypeKind::Edge => "edges",
        };
        format!("{}/{}.psv", dir, self.type_name)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in std::iter::once(&self.header).chain(&self.rows) {
            let mut first = true;
            for cell in line {
                if !first {
                    out.push(COLUMN_DELIMITER);
                }
                first = false;
                out.push_str(cell);
            }
            out.push('\n');
        }
        out
    }
}

/// Node tables then edge tables, each group in type-name order.
pub fn build_tables(registry: &OntologyRegistry, assembler: &GraphAssembler) -> Vec<Table> {
    let mut by_type: BTreeMap<&str, Vec<&CanonicalEntity>> = BTreeMap::new();
    for entity in assembler.entities() {
        by_type.entry(&entity.type_name).or_default().push(entity);
    }
    let mut tables: Vec<Table> = by_type
        .into_iter()
        .map(|(type_name, entities)| {
            let columns = columns(registry, type_name, entities.iter().map(|e| &e.properties));
            let mut header = vec!["canonical_id".to_string(), "type".to_string()];
            header.extend(columns.iter().cloned());
            header.push("provenance".to_string());

            let rows = entities
                .iter()
                .map(|entity| {
                    let mut row = vec![
                        quote(entity.canonical_id.as_str()),
                        quote(&entity.type_name),
                    ];
                    row.extend(property_cells(&columns, &entity.properties));
                    row.push(list_cell(&entity.provenance));
                    row
                })
                .collect();
            Table {
                kind: TypeKind::Node,
                type_name: type_name.to_string(),
                header,
                rows,
            }
        })
        .collect();

    let mut by_type: BTreeMap<&str, Vec<&Relation>> = BTreeMap::new();
    for relation in assembler.relations() {
        by_type.entry(&relation.type_name).or_default().push(relation);
    }
    tables.extend(by_type.into_iter().map(|(type_name, relations)| {
        let columns = columns(registry, type_name, relations.iter().map(|r| &r.properties));
        let mut header: Vec<String> = ["canonical_id", "type", "source", "target"]
            .into_iter()
            .map(String::from)
            .collect();
        header.extend(columns.iter().cloned());
        header.push("provenance".to_string());

        let rows = relations
            .iter()
            .map(|relation| {
                let mut row = vec![
                    quote(relation.id.as_str()),
                    quote(&relation.type_name),
                    quote(relation.source_entity.as_str()),
                    quote(relation.target_entity.as_str()),
                ];
                row.extend(property_cells(&columns, &relation.properties));
                row.push(list_cell(&relation.provenance));
                row
            })
            .collect();
        Table {
            kind: TypeKind::Edge,
            type_name: type_name.to_string(),
            header,
            rows,
        }
    }));

    tables
}

/// Declared (and inherited) properties, plus any stored property the
/// schema does not list.
fn columns<'a>(
    registry: &OntologyRegistry,
    type_name: &str,
    rows: impl Iterator<Item = &'a Properties>,
) -> Vec<String> {
    let mut columns: BTreeSet<String> = registry.effective_properties(type_name).into_keys().collect();
    for properties in rows {
        columns.extend(properties.keys().cloned());
    }
    columns.into_iter().collect()
}

fn property_cells<'a>(
    columns: &'a [String],
    properties: &'a Properties,
) -> impl Iterator<Item = String> + 'a {
    columns
        .iter()
        .map(|column| properties.get(column).map(cell).unwrap_or_default())
}

/// Render one property value as a cell.
pub fn cell(value: &PropertyValue) -> String {
    match value {
        PropertyValue::String(s) => quote(s),
        PropertyValue::Array(items) => {
            let elements: Vec<String> = items.iter().map(array_element).collect();
            quote(&elements.join(&ARRAY_DELIMITER.to_string()))
        }
        scalar => scalar.to_string(),
    }
}

fn array_element(value: &PropertyValue) -> String {
    let raw = value.to_string();
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ARRAY_DELIMITER || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn list_cell(items: &[String]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|s| array_element(&PropertyValue::String(s.clone())))
        .collect();
    quote(&elements.join(&ARRAY_DELIMITER.to_string()))
}

/// Wrap a string as a cell.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\"\""),
            '\n' | '\r' | '\t' => out.push(' '),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
