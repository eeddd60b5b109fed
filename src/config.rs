//! Pipeline configuration
//!
//! ```yaml
//! ontology: ontology.yaml
//! output_dir: out
//! sources:
//!   - name: UniProt
//!     snapshot: data/uniprot.jsonl
//!     extends_schema: true
//!     time_budget_secs: 600
//!     ontology:
//!       Protein: { parent: Gene, properties: { mass: float } }
//!   - name: Curated
//!     records:
//!       - { type: Gene, ids: ["gene:ABC1"] }
//! ```
//!
//! Relative paths resolve against the directory holding the config file.

use crate::adapter::{RawRecord, SourceModule, SourceSpec};
use crate::ontology::{PropertySchema, TypeDeclaration, TypeKind};
use crate::resolve::ResolverPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// UUID v5 namespace for default state database names
const STATE_DB_NS: Uuid = Uuid::from_bytes([
    0x0f, 0x6a, 0xd2, 0x33, 0x98, 0x1b, 0x47, 0xc5, 0x8e, 0x54, 0xa1, 0x7c, 0x26, 0xe0, 0x49, 0xbd,
]);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no sources configured")]
    NoSources,

    #[error("duplicate source name: {0}")]
    DuplicateSource(String),

    #[error("source {0} needs either a snapshot or inline records")]
    MissingInput(String),

    #[error("source {0} has both a snapshot and inline records")]
    ConflictingInput(String),
}

/// A type a source declares up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredType {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub properties: PropertySchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// JSON Lines snapshot
    #[serde(default)]
    pub snapshot: Option<PathBuf>,
    /// Records given directly in the config
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub extends_schema: bool,
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub ontology: BTreeMap<String, DeclaredType>,
}

fn default_enabled() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Base ontology document; an empty ontology when absent
    #[serde(default)]
    pub ontology: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub state_db: Option<PathBuf>,
    #[serde(default)]
    pub resolver: ResolverPolicy,
    pub sources: Vec<SourceConfig>,
    /// Directory relative paths resolve against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // Absolute, so keys derived from resolved paths are stable across runs.
        let absolute = std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_yaml(&text, base_dir)
    }

    pub fn from_yaml(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: PipelineConfig = serde_yaml::from_str(text)?;
        config.base_dir = base_dir.into();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            match (&source.snapshot, source.records.is_empty()) {
                (None, true) => return Err(ConfigError::MissingInput(source.name.clone())),
                (Some(_), false) => return Err(ConfigError::ConflictingInput(source.name.clone())),
                _ => {}
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn ontology_path(&self) -> Option<PathBuf> {
        self.ontology.as_deref().map(|p| self.resolve(p))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    /// Configured state database, or one under the platform data directory
    /// keyed by the output directory.
    pub fn state_db_path(&self) -> PathBuf {
        if let Some(path) = &self.state_db {
            return self.resolve(path);
        }
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
        let output = self.output_dir();
        let key = Uuid::new_v5(&STATE_DB_NS, output.to_string_lossy().as_bytes());
        data_dir.join("biomerge").join(format!("{}.db", key))
    }

    /// Source specs in configured order.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|source| {
                let module = match &source.snapshot {
                    Some(path) => SourceModule::JsonLines {
                        path: self.resolve(path),
                    },
                    None => SourceModule::Inline {
                        records: source.records.clone(),
                    },
                };
                SourceSpec {
                    name: source.name.clone(),
                    module,
                    extends_schema: source.extends_schema,
                    enabled: source.enabled,
                    time_budget: source.time_budget_secs.map(Duration::from_secs),
                    declarations: ordered_declarations(&source.ontology),
                }
            })
            .collect()
    }
}

/// Declarations with every parent declared in the same map placed before
/// its children. Types caught in a cycle keep name order; the registry
/// rejects them.
fn ordered_declarations(types: &BTreeMap<String, DeclaredType>) -> Vec<TypeDeclaration> {
    let mut pending: BTreeSet<&str> = types.keys().map(String::as_str).collect();
    let mut ordered = Vec::with_capacity(types.len());

    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .copied()
            .filter(|name| match types[*name].parent.as_deref() {
                Some(parent) => !pending.contains(parent),
                None => true,
            })
            .collect();
        let batch = if ready.is_empty() {
            pending.iter().copied().collect()
        } else {
            ready
        };
        for name in batch {
            pending.remove(name);
            let declared = &types[name];
            ordered.push(TypeDeclaration {
                name: name.to_string(),
                parent: declared.parent.clone(),
                kind: declared.kind,
                properties: declared.properties.clone(),
            });
        }
    }
    ordered
}
