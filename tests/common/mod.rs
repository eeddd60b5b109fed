//! Shared helpers for pipeline integration tests
//!
//! A `Workspace` is a scratch directory holding snapshots, a base ontology,
//! a pipeline config, the state database and the output directory.

#![allow(dead_code)]

use biomerge::{Manifest, Pipeline, PipelineConfig, RunMode};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CONFIG_FILE: &str = "biomerge.yaml";

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Write one JSON record per line.
    pub fn snapshot(&self, relative: &str, records: &[Value]) -> PathBuf {
        let mut text = String::new();
        for record in records {
            text.push_str(&record.to_string());
            text.push('\n');
        }
        self.write(relative, &text)
    }

    /// Write the config with `output_dir: out` and `state_db: state.db`
    /// prepended, and load it.
    pub fn config(&self, body: &str) -> PipelineConfig {
        let yaml = format!("output_dir: out\nstate_db: state.db\n{}", body);
        let path = self.write(CONFIG_FILE, &yaml);
        PipelineConfig::load(path).unwrap()
    }

    pub async fn run(&self, mode: RunMode) -> Manifest {
        let config = PipelineConfig::load(self.path().join(CONFIG_FILE)).unwrap();
        let pipeline = Pipeline::open(config).unwrap();
        pipeline.run(mode).await.unwrap()
    }

    /// Raw text of an output file.
    pub fn read_output(&self, relative: &str) -> String {
        std::fs::read_to_string(self.output_dir().join(relative)).unwrap()
    }

    /// Data rows of a table, header excluded.
    pub fn table_rows(&self, relative: &str) -> Vec<String> {
        self.read_output(relative)
            .lines()
            .skip(1)
            .map(String::from)
            .collect()
    }

    /// Every table file under the output directory, keyed by relative path.
    pub fn tables(&self) -> Vec<(String, String)> {
        let mut tables = Vec::new();
        for dir in ["nodes", "edges"] {
            let root = self.output_dir().join(dir);
            let Ok(entries) = std::fs::read_dir(&root) else {
                continue;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                let name = format!("{}/{}", dir, path.file_name().unwrap().to_string_lossy());
                tables.push((name, std::fs::read_to_string(&path).unwrap()));
            }
        }
        tables.sort();
        tables
    }
}

pub fn entity(type_name: &str, ids: &[&str], properties: Value) -> Value {
    json!({"type": type_name, "ids": ids, "properties": properties})
}

pub fn relation(type_name: &str, source: (&str, &str), target: (&str, &str)) -> Value {
    json!({
        "type": type_name,
        "source": {"type": source.0, "id": source.1},
        "target": {"type": target.0, "id": target.1}
    })
}

/// Gene with a Protein subtype and a protein interaction edge.
pub const BASE_ONTOLOGY: &str = "\
Gene:
  properties:
    symbol: str
Protein:
  parent: Gene
  properties:
    mass: float
    synonyms: str[]
interacts_with:
  kind: edge
  properties:
    score: float
";
