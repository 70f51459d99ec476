//! The transactional-store seam.
//!
//! The engine never touches physical storage directly: it fetches documents
//! and index rows through [`TransactionalStore`] and applies pending commands
//! through a [`StoreTransaction`]. A transaction that fails — on `execute` or
//! on `commit` — must leave the store exactly as it was.

pub mod memory;

pub use memory::{MemorySnapshot, MemoryStore};

use crate::{
    document::{Document, DocumentId},
    index::IndexRow,
    session::Command,
};
use std::fmt;
use thiserror::Error as ThisError;

///
/// IsolationLevel
///
/// Isolation requested for one commit transaction. How (and whether) a level
/// is honored is the backing store's business; the session only carries it.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "read-uncommitted",
            Self::ReadCommitted => "read-committed",
            Self::RepeatableRead => "repeatable-read",
            Self::Serializable => "serializable",
        };
        write!(f, "{name}")
    }
}

///
/// StorageError
///

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("backend error: {message}")]
    Backend { message: String },

    #[error("transaction conflict: {message}")]
    Conflict { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

/// Predicate over index rows, used by the read side of the seam.
pub type RowPredicate<'a> = &'a dyn Fn(&IndexRow) -> bool;

///
/// TransactionalStore
///
/// Narrow interface to the backing store. Reads are unscoped; writes happen
/// only inside a transaction handle obtained from `begin`.
///

pub trait TransactionalStore: Send + Sync + 'static {
    fn begin(&self, level: IsolationLevel) -> Result<Box<dyn StoreTransaction>, StorageError>;

    fn fetch(&self, id: DocumentId) -> Result<Option<Document>, StorageError>;

    /// All persisted rows of one index matching the predicate. Rows carry
    /// their owning identity, so id-only lookups derive from this.
    fn fetch_index(
        &self,
        index: &str,
        predicate: RowPredicate<'_>,
    ) -> Result<Vec<IndexRow>, StorageError>;

    /// Identities of every persisted document, for document-set queries and
    /// allocator seeding.
    fn scan(&self) -> Result<Vec<DocumentId>, StorageError>;
}

/// Owning identities of index rows matching a predicate, deduplicated in row
/// order.
pub fn fetch_by_index(
    store: &dyn TransactionalStore,
    index: &str,
    predicate: RowPredicate<'_>,
) -> Result<Vec<DocumentId>, StorageError> {
    let rows = store.fetch_index(index, predicate)?;
    let mut ids = Vec::with_capacity(rows.len());
    for row in rows {
        if !ids.contains(&row.doc) {
            ids.push(row.doc);
        }
    }

    Ok(ids)
}

///
/// StoreTransaction
///
/// One atomic application of a command batch. `commit` consumes the handle;
/// `rollback` (or dropping the handle) discards every executed command.
///

pub trait StoreTransaction: Send {
    fn execute(&mut self, command: &Command) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn rollback(self: Box<Self>);
}
