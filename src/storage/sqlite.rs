//! SQLite storage backend for run state

use super::traits::{JournalUpdate, OpenStore, StateStore, StorageError, StorageResult};
use crate::adapter::{JournalEntry, SourceRun};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const BASE_ONTOLOGY_KEY: &str = "base_ontology";

/// SQLite-backed run state store
///
/// One database file with tables for metadata, the run ledger and the
/// commit journal. Thread-safe via an internal mutex on the connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Key/value metadata (base ontology snapshot)
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- One row per source, latest run wins
            CREATE TABLE IF NOT EXISTS source_runs (
                adapter_name TEXT PRIMARY KEY,
                sequence_index INTEGER NOT NULL,
                status TEXT NOT NULL,
                run_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_source_runs_sequence
                ON source_runs(sequence_index);

            -- Declarations and records of the last completed run, in order
            CREATE TABLE IF NOT EXISTS journal (
                adapter_name TEXT NOT NULL,
                position INTEGER NOT NULL,
                entry_json TEXT NOT NULL,
                PRIMARY KEY (adapter_name, position)
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn corrupted(table: &'static str, detail: impl std::fmt::Display) -> StorageError {
        StorageError::Corrupted {
            table,
            detail: detail.to_string(),
        }
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StateStore for SqliteStore {
    fn reset(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            DELETE FROM journal;
            DELETE FROM source_runs;
            DELETE FROM meta;
            "#,
        )?;
        Ok(())
    }

    fn save_base_ontology(&self, yaml: &str) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![BASE_ONTOLOGY_KEY, yaml],
        )?;
        Ok(())
    }

    fn load_base_ontology(&self) -> StorageResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let yaml = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![BASE_ONTOLOGY_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(yaml)
    }

    fn save_run(&self, run: &SourceRun, journal: JournalUpdate<'_>) -> StorageResult<()> {
        let run_json = serde_json::to_string(run)?;
        let entries = match journal {
            JournalUpdate::Replace(entries) => Some(
                entries
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => None,
        };

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO source_runs (adapter_name, sequence_index, status, run_json)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(adapter_name) DO UPDATE SET
                sequence_index = excluded.sequence_index,
                status = excluded.status,
                run_json = excluded.run_json
            "#,
            params![
                run.adapter_name,
                run.sequence_index as i64,
                run.status.to_string(),
                run_json,
            ],
        )?;

        match journal {
            JournalUpdate::Keep => {}
            JournalUpdate::Clear | JournalUpdate::Replace(_) => {
                tx.execute(
                    "DELETE FROM journal WHERE adapter_name = ?1",
                    params![run.adapter_name],
                )?;
            }
        }
        if let Some(entries) = entries {
            let mut stmt = tx.prepare(
                "INSERT INTO journal (adapter_name, position, entry_json) VALUES (?1, ?2, ?3)",
            )?;
            for (position, entry) in entries.iter().enumerate() {
                stmt.execute(params![run.adapter_name, position as i64, entry])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_runs(&self) -> StorageResult<Vec<SourceRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT adapter_name, run_json FROM source_runs ORDER BY sequence_index, adapter_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (name, json) = row?;
            let run: SourceRun = serde_json::from_str(&json)
                .map_err(|e| Self::corrupted("source_runs", format!("{}: {}", name, e)))?;
            runs.push(run);
        }
        Ok(runs)
    }

    fn load_journal(&self, source: &str) -> StorageResult<Vec<JournalEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT position, entry_json FROM journal WHERE adapter_name = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![source], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (position, json) = row?;
            let entry: JournalEntry = serde_json::from_str(&json).map_err(|e| {
                Self::corrupted("journal", format!("{}#{}: {}", source, position, e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
