//! Deterministic bulk output: per-type tables, the final ontology and a
//! manifest

mod table;

pub use table::{build_tables, cell, quote, Table, ARRAY_DELIMITER, COLUMN_DELIMITER};

use crate::adapter::SourceRun;
use crate::engine::EngineState;
use crate::graph::PropertyConflict;
use crate::ontology::{save_document, OntologyError, TypeKind};
use crate::resolve::ResolutionAmbiguity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const ONTOLOGY_FILE: &str = "ontology.yaml";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Ontology(#[from] OntologyError),
}

pub type ExportResult<T> = Result<T, ExportError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    pub kind: TypeKind,
    pub type_name: String,
    pub path: String,
    pub rows: usize,
}

/// Accompanies the tables: what was built, from which runs, with which
/// conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_revision: u64,
    pub entity_count: usize,
    pub relation_count: usize,
    pub runs: Vec<SourceRun>,
    pub conflicts: Vec<PropertyConflict>,
    pub ambiguities: Vec<ResolutionAmbiguity>,
    /// Dropped properties per source
    pub schema_violations: BTreeMap<String, usize>,
    pub tables: Vec<TableSummary>,
}

impl Manifest {
    pub fn run(&self, adapter_name: &str) -> Option<&SourceRun> {
        self.runs.iter().find(|run| run.adapter_name == adapter_name)
    }
}

/// Writes the output directory.
pub struct Serializer {
    output_dir: PathBuf,
}

impl Serializer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Replace any previous tables and write tables, ontology and manifest.
    pub fn write(&self, state: &EngineState, runs: &[SourceRun]) -> ExportResult<Manifest> {
        for dir in ["nodes", "edges"] {
            let path = self.output_dir.join(dir);
            if path.exists() {
                std::fs::remove_dir_all(&path).map_err(|e| io_error(&path, e))?;
            }
            std::fs::create_dir_all(&path).map_err(|e| io_error(&path, e))?;
        }

        let tables = build_tables(&state.registry, &state.assembler);
        let mut summaries = Vec::with_capacity(tables.len());
        for table in &tables {
            let relative = table.relative_path();
            self.write_file(&relative, table.render())?;
            summaries.push(TableSummary {
                kind: table.kind,
                type_name: table.type_name.clone(),
                path: relative,
                rows: table.rows.len(),
            });
        }

        save_document(&state.registry, self.output_dir.join(ONTOLOGY_FILE))?;

        let mut schema_violations = BTreeMap::new();
        for violation in &state.violations {
            *schema_violations.entry(violation.source.clone()).or_insert(0) += 1;
        }
        let manifest = Manifest {
            schema_revision: state.registry.revision(),
            entity_count: state.assembler.entity_count(),
            relation_count: state.assembler.relation_count(),
            runs: runs.to_vec(),
            conflicts: state.assembler.conflicts().to_vec(),
            ambiguities: state.ambiguities.clone(),
            schema_violations,
            tables: summaries,
        };
        self.write_file(MANIFEST_FILE, serde_json::to_string_pretty(&manifest)?)?;

        info!(
            output = %self.output_dir.display(),
            tables = manifest.tables.len(),
            revision = manifest.schema_revision,
            "bulk output written"
        );
        Ok(manifest)
    }

    fn write_file(&self, relative: &str, contents: String) -> ExportResult<()> {
        let path = self.output_dir.join(relative);
        std::fs::write(&path, contents).map_err(|e| io_error(&path, e))
    }
}

/// Read a manifest written by [`Serializer::write`].
pub fn load_manifest(output_dir: impl AsRef<Path>) -> ExportResult<Manifest> {
    let path = output_dir.as_ref().join(MANIFEST_FILE);
    let text = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}
