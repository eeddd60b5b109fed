//! Storage trait definitions

use crate::adapter::{JournalEntry, SourceRun};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted row that no longer parses. Fatal at startup.
    #[error("Corrupted state in {table}: {detail}")]
    Corrupted { table: &'static str, detail: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What to do with a source's commit journal when its run is saved
#[derive(Debug, Clone, Copy)]
pub enum JournalUpdate<'a> {
    Keep,
    Replace(&'a [JournalEntry]),
    Clear,
}

/// Persistent run state: the base ontology, the run ledger and the commit
/// journals of completed runs.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait StateStore: Send + Sync {
    /// Drop the ledger, journals and base ontology.
    fn reset(&self) -> StorageResult<()>;

    /// Store the ontology every run of this state starts from (YAML).
    fn save_base_ontology(&self, yaml: &str) -> StorageResult<()>;

    fn load_base_ontology(&self) -> StorageResult<Option<String>>;

    /// Upsert a run and update its journal in one transaction.
    fn save_run(&self, run: &SourceRun, journal: JournalUpdate<'_>) -> StorageResult<()>;

    /// All runs in the ledger, by sequence index.
    fn load_runs(&self) -> StorageResult<Vec<SourceRun>>;

    /// The journal of a source's last completed run (empty if none).
    fn load_journal(&self, source: &str) -> StorageResult<Vec<JournalEntry>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: StateStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
