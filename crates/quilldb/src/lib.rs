//! quilldb — a session-oriented document store with automatic secondary
//! indexes.
//!
//! ## Crate layout
//! - `core`: documents, sessions, index synchronization, the transactional
//!   store seam, and the in-memory backend.
//!
//! Open a [`Store`], register index projections, then work in sessions:
//! save and delete queue mutations, commit flushes them atomically, cancel
//! discards them.

pub use quilldb_core as core;

pub use quilldb_core::{
    Command, DocRef, Document, DocumentId, Error, IndexRow, IndexSpec, IsolationLevel, Record,
    RowValues, Session, SessionOptions, SessionState, Store, StoreConfig, Value,
    backend::{MemorySnapshot, MemoryStore},
};

/// Workspace version re-export for downstream tooling and tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
///
/// Domain vocabulary plus the serde derives a record type needs.
///

pub mod prelude {
    pub use quilldb_core::prelude::*;
    pub use serde::{Deserialize, Serialize};
}
