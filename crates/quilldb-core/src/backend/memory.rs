//! In-memory backing store with staged transactions.
//!
//! Writes go to a staged copy of the state and replace it wholesale on
//! commit, so a failed or rolled-back transaction is never observable —
//! the same all-or-nothing shape the engine demands from real backends.

use crate::{
    backend::{IsolationLevel, RowPredicate, StorageError, StoreTransaction, TransactionalStore},
    document::{Document, DocumentId},
    index::IndexRow,
    session::Command,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
struct MemoryState {
    documents: BTreeMap<DocumentId, Document>,
    rows: BTreeSet<IndexRow>,
}

///
/// MemorySnapshot
///
/// Point-in-time dump of the whole store, comparable for equality. Tests use
/// it to assert that cancelled or failed sessions leave the store
/// bit-identical.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemorySnapshot(MemoryState);

impl MemorySnapshot {
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.0.documents.len()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.0.rows.len()
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<MemoryState>,
    fail_next_commit: AtomicBool,
    mutations: AtomicU64,
}

///
/// MemoryStore
///
/// Cheap to clone; clones share state, so a test can keep a handle while the
/// engine owns another.
///

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot(self.inner.state.lock().clone())
    }

    /// Arm a one-shot failure for the next transaction commit. The staged
    /// state is discarded, simulating a mid-transaction storage failure.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Total individual mutations applied by committed transactions.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.inner.mutations.load(Ordering::SeqCst)
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self, _level: IsolationLevel) -> Result<Box<dyn StoreTransaction>, StorageError> {
        let staged = self.inner.state.lock().clone();

        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            staged,
            applied: 0,
        }))
    }

    fn fetch(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        Ok(self.inner.state.lock().documents.get(&id).cloned())
    }

    fn fetch_index(
        &self,
        index: &str,
        predicate: RowPredicate<'_>,
    ) -> Result<Vec<IndexRow>, StorageError> {
        let state = self.inner.state.lock();

        Ok(state
            .rows
            .iter()
            .filter(|row| row.index == index && predicate(row))
            .cloned()
            .collect())
    }

    fn scan(&self) -> Result<Vec<DocumentId>, StorageError> {
        Ok(self.inner.state.lock().documents.keys().copied().collect())
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    staged: MemoryState,
    applied: u64,
}

impl StoreTransaction for MemoryTransaction {
    fn execute(&mut self, command: &Command) -> Result<(), StorageError> {
        match command {
            Command::InsertDocument(doc) => {
                if self.staged.documents.contains_key(&doc.id) {
                    return Err(StorageError::conflict(format!(
                        "document {} already exists",
                        doc.id
                    )));
                }
                self.staged.documents.insert(doc.id, doc.clone());
            }
            Command::UpdateDocument(doc) => {
                self.staged.documents.insert(doc.id, doc.clone());
            }
            Command::DeleteDocument(id) => {
                self.staged.documents.remove(id);
            }
            Command::InsertIndexRow(row) => {
                self.staged.rows.insert(row.clone());
            }
            Command::DeleteIndexRow(row) => {
                self.staged.rows.remove(row);
            }
        }
        self.applied += 1;

        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            // Staged state drops here; nothing was published.
            return Err(StorageError::backend("injected commit failure"));
        }

        let staged = self.staged;
        *self.inner.state.lock() = staged;
        self.inner.mutations.fetch_add(self.applied, Ordering::SeqCst);

        Ok(())
    }

    fn rollback(self: Box<Self>) {
        // Dropping the staged copy is the rollback.
    }
}
