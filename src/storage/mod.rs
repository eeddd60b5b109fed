//! Run-state storage
//!
//! Resume support goes through the `StateStore` trait. The implementation
//! is `SqliteStore`, a single database file per pipeline.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{JournalUpdate, OpenStore, StateStore, StorageError, StorageResult};
