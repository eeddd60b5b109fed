//! AdapterRunner: sequential execution of source runs
//!
//! Sources run strictly one after another in configured order, so every
//! schema extension a source makes is visible to all later sources and to
//! none before it. Each run moves `Pending → Running → {Completed, Failed,
//! Skipped}`; a failure keeps whatever the run already committed and the
//! runner moves on.
//!
//! On resume, a source whose content checkpoint matches a prior Completed
//! run is reproduced from its commit journal instead of re-reading the
//! snapshot. Everything else runs live.

use super::cancel::CancellationToken;
use super::engine_sink::{EngineSink, FrameworkContext, JournalEntry};
use super::sink::{AdapterError, AdapterSink, EmitResult};
use super::source::{digest, SourceModule};
use crate::engine::HarmonizationEngine;
use crate::ontology::{OntologyDelta, TypeDeclaration};
use crate::storage::{JournalUpdate, StateStore, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        };
        f.write_str(label)
    }
}

/// Ledger entry for one source in one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRun {
    pub adapter_name: String,
    pub sequence_index: usize,
    pub status: RunStatus,
    /// Records read and processed, rejected ones included
    pub records_emitted: usize,
    pub records_rejected: usize,
    #[serde(default)]
    pub schema_violations: usize,
    #[serde(default)]
    pub conflicts: usize,
    #[serde(default)]
    pub ambiguities: usize,
    pub ontology_deltas: Vec<OntologyDelta>,
    pub content_checkpoint: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Reproduced from the commit journal rather than the snapshot
    #[serde(default)]
    pub replayed: bool,
}

impl SourceRun {
    pub fn pending(adapter_name: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            sequence_index,
            status: RunStatus::Pending,
            records_emitted: 0,
            records_rejected: 0,
            schema_violations: 0,
            conflicts: 0,
            ambiguities: 0,
            ontology_deltas: Vec::new(),
            content_checkpoint: None,
            started_at: None,
            finished_at: None,
            error: None,
            replayed: false,
        }
    }

    fn tally(&mut self, result: &EmitResult) {
        self.records_emitted += 1;
        if result.is_rejected() {
            self.records_rejected += 1;
        }
        self.schema_violations += result.violations.len();
        self.conflicts += result.conflicts;
        if result.ambiguity.is_some() {
            self.ambiguities += 1;
        }
    }
}

/// A configured source: the module plus how the engine treats it.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub name: String,
    pub module: SourceModule,
    pub extends_schema: bool,
    pub enabled: bool,
    pub time_budget: Option<Duration>,
    /// Types registered before the first record is read
    pub declarations: Vec<TypeDeclaration>,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, module: SourceModule) -> Self {
        Self {
            name: name.into(),
            module,
            extends_schema: false,
            enabled: true,
            time_budget: None,
            declarations: Vec::new(),
        }
    }

    pub fn extending_schema(mut self) -> Self {
        self.extends_schema = true;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_declaration(mut self, declaration: TypeDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Checkpoint over the snapshot content and everything else that
    /// shapes what the run commits.
    pub async fn checkpoint(&self) -> Result<String, AdapterError> {
        let content = self.module.checkpoint().await?;
        let declarations = serde_json::to_string(&self.declarations)
            .map_err(|e| AdapterError::Failure(format!("cannot encode declarations: {}", e)))?;
        let key = format!(
            "{}\u{1f}{}\u{1f}{}",
            content, declarations, self.extends_schema
        );
        Ok(digest(key.as_bytes()))
    }
}

pub struct AdapterRunner {
    engine: Arc<HarmonizationEngine>,
    token: CancellationToken,
}

impl AdapterRunner {
    pub fn new(engine: Arc<HarmonizationEngine>, token: CancellationToken) -> Self {
        Self { engine, token }
    }

    /// Run every source in order, persisting each run as it finishes.
    ///
    /// `prior` is the ledger of an earlier invocation (empty for a fresh
    /// run). Storage errors abort the whole sequence.
    pub async fn run_all<S: StateStore + ?Sized>(
        &self,
        sources: &[SourceSpec],
        store: &S,
        prior: Vec<SourceRun>,
    ) -> StorageResult<Vec<SourceRun>> {
        let prior: HashMap<String, SourceRun> = prior
            .into_iter()
            .map(|run| (run.adapter_name.clone(), run))
            .collect();
        let mut runs: Vec<SourceRun> = sources
            .iter()
            .enumerate()
            .map(|(index, spec)| SourceRun::pending(&spec.name, index))
            .collect();

        for (index, spec) in sources.iter().enumerate() {
            if self.token.is_cancelled() {
                // An earlier ledger row stays as is so a later resume can still reuse it.
                if prior.contains_key(&spec.name) {
                    warn!(source = %spec.name, "cancelled before start, prior run kept");
                } else {
                    warn!(source = %spec.name, "cancelled before start, left pending");
                    store.save_run(&runs[index], JournalUpdate::Keep)?;
                }
                continue;
            }

            let checkpoint = if spec.enabled && spec.module.is_available() {
                match spec.checkpoint().await {
                    Ok(checkpoint) => Some(checkpoint),
                    Err(e) => {
                        let run = self.failed_before_start(index, spec, e);
                        store.save_run(&run, JournalUpdate::Clear)?;
                        runs[index] = run;
                        continue;
                    }
                }
            } else {
                None
            };

            let reusable = prior.get(&spec.name).filter(|run| {
                run.status == RunStatus::Completed
                    && checkpoint.is_some()
                    && run.content_checkpoint == checkpoint
            });

            let run = match reusable {
                Some(previous) => {
                    let journal = store.load_journal(&spec.name)?;
                    let run = self.replay(index, spec, previous, journal).await;
                    let update = if run.status == RunStatus::Completed {
                        JournalUpdate::Keep
                    } else {
                        JournalUpdate::Clear
                    };
                    store.save_run(&run, update)?;
                    run
                }
                None => {
                    let mut started = SourceRun::pending(&spec.name, index);
                    started.status = RunStatus::Running;
                    started.started_at = Some(Utc::now());
                    store.save_run(&started, JournalUpdate::Clear)?;

                    let (run, journal) = self.run_live(index, spec, checkpoint).await;
                    let update = if run.status == RunStatus::Completed {
                        JournalUpdate::Replace(&journal)
                    } else {
                        JournalUpdate::Clear
                    };
                    store.save_run(&run, update)?;
                    run
                }
            };
            runs[index] = run;
        }

        Ok(runs)
    }

    /// Run one source from its snapshot. Returns the run and its journal.
    pub async fn run_live(
        &self,
        index: usize,
        spec: &SourceSpec,
        checkpoint: Option<String>,
    ) -> (SourceRun, Vec<JournalEntry>) {
        let mut run = SourceRun::pending(&spec.name, index);
        if !spec.enabled {
            info!(source = %spec.name, "source disabled, skipping");
            run.status = RunStatus::Skipped;
            return (run, Vec::new());
        }
        if !spec.module.is_available() {
            warn!(source = %spec.name, "snapshot not available, skipping");
            run.status = RunStatus::Skipped;
            return (run, Vec::new());
        }

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.content_checkpoint = checkpoint;
        info!(source = %spec.name, index, "source run started");

        let revision_before = self.engine.revision();
        let sink = EngineSink::new(
            self.engine.clone(),
            FrameworkContext::new(&spec.name, spec.extends_schema),
        );
        let outcome = drive(spec, &sink, &self.token, &mut run).await;
        self.finish(&mut run, revision_before, outcome);
        (run, sink.take_journal())
    }

    /// Reproduce a completed run by re-applying its journal.
    pub async fn replay(
        &self,
        index: usize,
        spec: &SourceSpec,
        previous: &SourceRun,
        journal: Vec<JournalEntry>,
    ) -> SourceRun {
        let mut run = SourceRun::pending(&spec.name, index);
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.content_checkpoint = previous.content_checkpoint.clone();
        run.replayed = true;
        info!(source = %spec.name, entries = journal.len(), "replaying completed run");

        let revision_before = self.engine.revision();
        let sink = EngineSink::new(
            self.engine.clone(),
            FrameworkContext::new(&spec.name, spec.extends_schema),
        );
        let outcome = replay_journal(&sink, journal, &self.token, &mut run).await;
        self.finish(&mut run, revision_before, outcome);
        run
    }

    fn finish(&self, run: &mut SourceRun, revision_before: u64, outcome: Result<(), AdapterError>) {
        run.ontology_deltas = self
            .engine
            .with_state(|state| state.registry.deltas_since(revision_before));
        run.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                run.status = RunStatus::Completed;
                info!(
                    source = %run.adapter_name,
                    records = run.records_emitted,
                    rejected = run.records_rejected,
                    deltas = run.ontology_deltas.len(),
                    "source run completed"
                );
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                error!(
                    source = %run.adapter_name,
                    records = run.records_emitted,
                    error = %e,
                    "source run failed, committed records retained"
                );
                run.error = Some(e.to_string());
            }
        }
    }

    fn failed_before_start(&self, index: usize, spec: &SourceSpec, e: AdapterError) -> SourceRun {
        error!(source = %spec.name, error = %e, "cannot checkpoint source");
        let mut run = SourceRun::pending(&spec.name, index);
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.error = Some(e.to_string());
        run
    }
}

/// Push a source's declarations and records through `sink`.
pub async fn drive<S: AdapterSink + ?Sized>(
    spec: &SourceSpec,
    sink: &S,
    token: &CancellationToken,
    run: &mut SourceRun,
) -> Result<(), AdapterError> {
    let deadline = spec.time_budget.map(|budget| (Instant::now() + budget, budget));

    for declaration in &spec.declarations {
        sink.declare(declaration.clone()).await?;
    }

    let mut stream = spec.module.open().await?;
    loop {
        if token.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        if let Some((at, budget)) = deadline {
            if Instant::now() >= at {
                return Err(AdapterError::TimedOut(budget));
            }
        }

        let fetch = async {
            match deadline {
                Some((at, budget)) => tokio::time::timeout_at(at, stream.next_record())
                    .await
                    .map_err(|_| AdapterError::TimedOut(budget))?,
                None => stream.next_record().await,
            }
        };
        let next = tokio::select! {
            _ = token.cancelled() => return Err(AdapterError::Cancelled),
            next = fetch => next?,
        };

        let Some(record) = next else {
            return Ok(());
        };
        let result = sink.emit(record).await?;
        run.tally(&result);
    }
}

async fn replay_journal<S: AdapterSink + ?Sized>(
    sink: &S,
    journal: Vec<JournalEntry>,
    token: &CancellationToken,
    run: &mut SourceRun,
) -> Result<(), AdapterError> {
    for entry in journal {
        if token.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        match entry {
            JournalEntry::Declare(declaration) => {
                sink.declare(declaration).await?;
            }
            JournalEntry::Record(record) => {
                let result = sink.emit(record).await?;
                run.tally(&result);
            }
        }
    }
    Ok(())
}
