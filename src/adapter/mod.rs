//! Adapter layer
//!
//! Source modules produce raw records; the runner pushes them, one source
//! at a time, through an `AdapterSink` into the harmonization engine.

mod cancel;
mod engine_sink;
mod runner;
mod sink;
mod source;

pub use cancel::CancellationToken;
pub use engine_sink::{EngineSink, FrameworkContext, JournalEntry};
pub use runner::{drive, AdapterRunner, RunStatus, SourceRun, SourceSpec};
pub use sink::{AdapterError, AdapterSink, EmitResult, Rejection, RejectionReason};
pub use source::{EndpointRef, RawProperties, RawRecord, RecordStream, SourceModule};
