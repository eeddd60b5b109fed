//! Pipeline: config → engine → sequential source runs → bulk output
//!
//! A fresh run clears the run state and snapshots the base ontology. A
//! resumed run rebuilds from that snapshot, replaying completed sources
//! whose content is unchanged and running the rest live, then writes the
//! same output a fresh run would.

use crate::adapter::{AdapterRunner, CancellationToken};
use crate::config::{ConfigError, PipelineConfig};
use crate::engine::HarmonizationEngine;
use crate::export::{ExportError, Manifest, Serializer};
use crate::ontology::{load_document, parse_document, OntologyError, OntologyRegistry};
use crate::storage::{OpenStore, SqliteStore, StateStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that stop the whole pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Ontology error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Discard previous run state and process every source
    Fresh,
    /// Reuse completed runs whose content is unchanged
    Resume,
}

pub struct Pipeline<S: StateStore> {
    config: PipelineConfig,
    store: S,
    token: CancellationToken,
}

impl Pipeline<SqliteStore> {
    /// Open the configured state database.
    pub fn open(config: PipelineConfig) -> PipelineResult<Self> {
        let store = SqliteStore::open(config.state_db_path())?;
        Ok(Self::with_store(config, store))
    }
}

impl<S: StateStore> Pipeline<S> {
    pub fn with_store(config: PipelineConfig, store: S) -> Self {
        Self {
            config,
            store,
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Token that cancels the source run in progress.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run(&self, mode: RunMode) -> PipelineResult<Manifest> {
        let (registry, prior) = match mode {
            RunMode::Fresh => {
                self.store.reset()?;
                let yaml = read_base_ontology(&self.config)?;
                let registry = parse_document(&yaml)?;
                self.store.save_base_ontology(&yaml)?;
                (registry, Vec::new())
            }
            RunMode::Resume => {
                let yaml = match self.store.load_base_ontology()? {
                    Some(yaml) => yaml,
                    None => {
                        let yaml = read_base_ontology(&self.config)?;
                        self.store.save_base_ontology(&yaml)?;
                        yaml
                    }
                };
                (parse_document(&yaml)?, self.store.load_runs()?)
            }
        };
        info!(
            mode = ?mode,
            base_types = registry.len(),
            prior_runs = prior.len(),
            "pipeline starting"
        );

        let engine = Arc::new(HarmonizationEngine::new(registry, self.config.resolver.clone()));
        engine.ensure_core_types()?;

        let runner = AdapterRunner::new(engine.clone(), self.token.clone());
        let runs = runner
            .run_all(&self.config.source_specs(), &self.store, prior)
            .await?;

        let state = engine.snapshot();
        let manifest = Serializer::new(self.config.output_dir()).write(&state, &runs)?;
        Ok(manifest)
    }
}

/// Base ontology text from the configured document (empty when unset).
pub fn read_base_ontology(config: &PipelineConfig) -> PipelineResult<String> {
    match config.ontology_path() {
        Some(path) => std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::Ontology(OntologyError::Document(format!("{}: {}", path.display(), e)))
        }),
        None => Ok(String::new()),
    }
}

/// The base ontology with core types seeded, as a run would start with it.
pub fn load_base_registry(config: &PipelineConfig) -> PipelineResult<OntologyRegistry> {
    let registry = match config.ontology_path() {
        Some(path) => load_document(path)?,
        None => OntologyRegistry::new(),
    };
    let engine = HarmonizationEngine::new(registry, config.resolver.clone());
    engine.ensure_core_types()?;
    Ok(engine.snapshot().registry)
}
