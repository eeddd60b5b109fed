//! Source modules: lazy, restartable record streams over fixed snapshots
//!
//! A source module is one variant of [`SourceModule`]. Opening it yields a
//! [`RecordStream`] that reads one [`RawRecord`] at a time; opening it again
//! restarts from the beginning of the same snapshot.

use super::sink::AdapterError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use uuid::Uuid;

/// UUID v5 namespace for content checkpoints
const CHECKPOINT_NS: Uuid = Uuid::from_bytes([
    0x51, 0xc4, 0x0b, 0x9e, 0x27, 0x8d, 0x4a, 0x13, 0xa6, 0xf0, 0x3b, 0x7e, 0x90, 0x12, 0xd5, 0x68,
]);

/// Untyped property bag as it arrives from a source
pub type RawProperties = BTreeMap<String, serde_json::Value>;

/// One endpoint of a raw relation: the entity type and one of its identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRef {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: String,
}

impl EndpointRef {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

/// A record produced by a source module.
///
/// JSON shape, one per line:
///
/// ```text
/// {"type": "Protein", "ids": ["uniprot:P12345"], "properties": {"mass": 120.1}}
/// {"type": "interacts_with", "source": {"type": "Protein", "id": "uniprot:P1"},
///  "target": {"type": "Protein", "id": "uniprot:P2"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRecord {
    Relation {
        #[serde(rename = "type")]
        type_name: String,
        source: EndpointRef,
        target: EndpointRef,
        #[serde(default)]
        properties: RawProperties,
    },
    Entity {
        #[serde(rename = "type")]
        type_name: String,
        ids: Vec<String>,
        #[serde(default)]
        properties: RawProperties,
    },
}

impl RawRecord {
    pub fn entity<'a>(type_name: &str, ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Entity {
            type_name: type_name.to_string(),
            ids: ids.into_iter().map(String::from).collect(),
            properties: RawProperties::new(),
        }
    }

    pub fn relation(type_name: &str, source: EndpointRef, target: EndpointRef) -> Self {
        Self::Relation {
            type_name: type_name.to_string(),
            source,
            target,
            properties: RawProperties::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: serde_json::Value) -> Self {
        match &mut self {
            Self::Entity { properties, .. } | Self::Relation { properties, .. } => {
                properties.insert(name.to_string(), value);
            }
        }
        self
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Entity { type_name, .. } | Self::Relation { type_name, .. } => type_name,
        }
    }

    /// Short human-readable label for logs and rejections
    pub fn describe(&self) -> String {
        match self {
            Self::Entity { type_name, ids, .. } => format!("{} [{}]", type_name, ids.join(", ")),
            Self::Relation {
                type_name,
                source,
                target,
                ..
            } => format!("{} {}→{}", type_name, source.id, target.id),
        }
    }
}

/// A per-database source connector.
#[derive(Debug, Clone)]
pub enum SourceModule {
    /// Immutable local snapshot, one JSON record per line. Blank lines and
    /// lines starting with `#` are ignored.
    JsonLines { path: PathBuf },
    /// Records held in memory
    Inline { records: Vec<RawRecord> },
}

impl SourceModule {
    /// Whether the snapshot exists. Unavailable sources are skipped.
    pub fn is_available(&self) -> bool {
        match self {
            Self::JsonLines { path } => path.is_file(),
            Self::Inline { .. } => true,
        }
    }

    /// Digest of the snapshot contents.
    ///
    /// Identical snapshots always yield the same checkpoint string.
    pub async fn checkpoint(&self) -> Result<String, AdapterError> {
        let bytes = match self {
            Self::JsonLines { path } => tokio::fs::read(path).await?,
            Self::Inline { records } => serde_json::to_vec(records)
                .map_err(|e| AdapterError::Failure(format!("cannot encode inline records: {}", e)))?,
        };
        Ok(digest(&bytes))
    }

    /// Open a fresh stream positioned at the first record.
    pub async fn open(&self) -> Result<RecordStream, AdapterError> {
        let inner = match self {
            Self::JsonLines { path } => {
                let file = tokio::fs::File::open(path).await?;
                StreamInner::Lines {
                    lines: BufReader::new(file).lines(),
                    path: path.clone(),
                    line_number: 0,
                }
            }
            Self::Inline { records } => StreamInner::Inline(records.clone().into_iter()),
        };
        Ok(RecordStream { inner })
    }
}

/// UUID v5 digest of arbitrary bytes
pub(crate) fn digest(bytes: &[u8]) -> String {
    Uuid::new_v5(&CHECKPOINT_NS, bytes).to_string()
}

enum StreamInner {
    Lines {
        lines: Lines<BufReader<tokio::fs::File>>,
        path: PathBuf,
        line_number: usize,
    },
    Inline(std::vec::IntoIter<RawRecord>),
}

/// A lazy sequence of raw records.
pub struct RecordStream {
    inner: StreamInner,
}

impl RecordStream {
    /// Read the next record; `Ok(None)` at end of stream.
    ///
    /// A line that does not parse is an unrecoverable failure: the stream
    /// cannot tell what the rest of the snapshot means.
    pub async fn next_record(&mut self) -> Result<Option<RawRecord>, AdapterError> {
        match &mut self.inner {
            StreamInner::Inline(records) => Ok(records.next()),
            StreamInner::Lines {
                lines,
                path,
                line_number,
            } => loop {
                let Some(line) = lines.next_line().await? else {
                    return Ok(None);
                };
                *line_number += 1;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                return serde_json::from_str(trimmed).map(Some).map_err(|e| {
                    AdapterError::Failure(format!(
                        "{}:{}: malformed record: {}",
                        path.display(),
                        line_number,
                        e
                    ))
                });
            },
        }
    }
}
