//! The unit of work.
//!
//! A session tracks object identity, turns saves and deletes into pending
//! commands via the index synchronizer, and flushes everything as one atomic
//! transaction on commit. Sessions are single-caller: `&mut self` on every
//! mutating operation makes concurrent use unrepresentable, so there is no
//! internal locking.
//!
//! State machine: `Active → Committing → {Committed, Cancelled} → Disposed`.
//! Every operation checks the state and surfaces `InvalidState` outside its
//! window. A failed commit returns the session to `Active` with its queue
//! intact so the caller may retry or cancel.

pub(crate) mod identity;
pub(crate) mod queue;

pub use identity::{DocRef, IdentityError, IdentityMap};
pub use queue::{Command, CommandQueue};

use crate::{
    backend::{IsolationLevel, StorageError, TransactionalStore},
    document::{Document, DocumentId},
    error::Error,
    index::{IndexRow, IndexSpec, IndexSynchronizer},
    query::{DocQuery, IndexQuery, LoadQuery},
    serialize::{deserialize, serialize},
    store::{SessionOptions, Store},
    traits::Record,
};
use std::{
    collections::{BTreeSet, HashSet},
    fmt,
    sync::Arc,
};
use thiserror::Error as ThisError;
use tracing::{debug, error};

///
/// SessionState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Active,
    Committing,
    Committed,
    Cancelled,
    Disposed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
            Self::Disposed => "disposed",
        };
        write!(f, "{name}")
    }
}

///
/// SessionError
///

#[derive(Debug, ThisError)]
pub enum SessionError {
    #[error("document {id} not found")]
    NotFound { id: DocumentId },

    #[error("document {id} has type '{found}', expected '{expected}'")]
    WrongType {
        id: DocumentId,
        expected: &'static str,
        found: String,
    },

    #[error("'{op}' is not valid while the session is {state}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
}

///
/// Session
///
/// One logical unit of work against a [`Store`]: an identity map, an index
/// synchronizer, and a command queue, flushed atomically by `commit` /
/// `commit_async` or discarded by `cancel`.
///
/// Dropping an `Active` session commits implicitly unless the store (or this
/// session's options) disabled `commit_on_drop`; a drop-commit failure is
/// logged, never panicked.
///

pub struct Session {
    store: Store,
    state: SessionState,
    isolation: IsolationLevel,
    commit_on_drop: bool,
    committed_once: bool,
    identity: IdentityMap,
    queue: CommandQueue,
    sync: IndexSynchronizer,
    deleted: HashSet<DocumentId>,
}

impl Session {
    pub(crate) fn new(store: Store, options: SessionOptions) -> Self {
        let config = store.inner().config;

        Self {
            store,
            state: SessionState::Active,
            isolation: options.isolation.unwrap_or(config.isolation),
            commit_on_drop: options.commit_on_drop.unwrap_or(config.commit_on_drop),
            committed_once: false,
            identity: IdentityMap::default(),
            queue: CommandQueue::default(),
            sync: IndexSynchronizer::default(),
            deleted: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Pending commands after collapsing; zero right after commit or cancel.
    #[must_use]
    pub const fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Set the isolation level for the next commit. Chainable; valid while
    /// `Active`, before the first commit.
    pub fn isolation_level(&mut self, level: IsolationLevel) -> Result<&mut Self, Error> {
        self.ensure_active("isolation_level")?;
        if self.committed_once {
            return Err(SessionError::InvalidState {
                op: "isolation_level",
                state: self.state,
            }
            .into());
        }
        self.isolation = level;

        Ok(self)
    }

    // ======================================================================
    // Save / delete
    // ======================================================================

    /// First save of an object: assigns its identity, tracks it, and queues
    /// the document insert plus the full index projection. No store I/O.
    pub fn save<T: Record>(&mut self, object: T) -> Result<DocRef<T>, Error> {
        self.ensure_active("save")?;

        let id = self.store.allocate_id();
        let payload = serialize(&object)?;
        let rows = self.project_obj(&object, id)?;
        let doc_ref = self.identity.track(object, id)?;

        debug!(doc = %id, doc_type = T::TYPE, rows = rows.len(), "save: tracked new object");

        self.queue.enqueue(Command::InsertDocument(Document {
            id,
            doc_type: T::TYPE.to_string(),
            payload,
        }));
        for command in self.sync.plan_save(id, rows) {
            self.queue.enqueue(command);
        }

        Ok(doc_ref)
    }

    /// Save modifications of an already-tracked object. Re-serializes the
    /// object behind the handle, queues a document update, and diffs the
    /// index projection against the last one this session produced — calling
    /// this twice without changes queues nothing new.
    pub fn save_tracked<T: Record>(&mut self, doc_ref: DocRef<T>) -> Result<(), Error> {
        self.ensure_active("save")?;

        let id = self.identity.lookup(doc_ref)?;
        let (payload, rows) = {
            let object = self.identity.object::<T>(doc_ref)?;
            (serialize(object)?, self.project_obj(object, id)?)
        };

        debug!(doc = %id, doc_type = T::TYPE, "save: tracked update");

        self.queue.enqueue(Command::UpdateDocument(Document {
            id,
            doc_type: T::TYPE.to_string(),
            payload,
        }));
        for command in self.sync.plan_save(id, rows) {
            self.queue.enqueue(command);
        }

        Ok(())
    }

    /// Save a raw document. Indexes are projections of mapped objects, so a
    /// raw save queues no index mutations. Returns the (possibly fresh)
    /// identity.
    pub fn save_document(&mut self, mut document: Document) -> Result<DocumentId, Error> {
        self.ensure_active("save")?;

        if document.id.is_assigned() {
            self.deleted.remove(&document.id);
            self.identity.cache_document(document.clone());
            self.queue.enqueue(Command::UpdateDocument(document.clone()));
        } else {
            document.id = self.store.allocate_id();
            self.identity.cache_document(document.clone());
            self.queue.enqueue(Command::InsertDocument(document.clone()));
        }

        Ok(document.id)
    }

    /// Delete a tracked object: queues the document delete plus deletes for
    /// every index row this session knows for it, and untracks the object.
    pub fn delete<T: Record>(&mut self, doc_ref: DocRef<T>) -> Result<(), Error> {
        self.ensure_active("delete")?;

        let id = self.identity.lookup(doc_ref)?;
        debug!(doc = %id, doc_type = T::TYPE, "delete: tracked object");

        self.queue.enqueue(Command::DeleteDocument(id));
        for command in self.sync.plan_delete(id) {
            self.queue.enqueue(command);
        }
        self.identity.untrack(id);
        self.deleted.insert(id);

        Ok(())
    }

    /// Delete by identity. If this session has never seen the document, its
    /// persisted rows are read back through the registry so the row deletes
    /// are still unconditional and complete.
    pub fn delete_document(&mut self, id: DocumentId) -> Result<(), Error> {
        self.ensure_active("delete")?;

        let row_deletes = if self.sync.contains(id) {
            self.sync.plan_delete(id)
        } else {
            self.persisted_rows(id)?
                .into_iter()
                .map(Command::DeleteIndexRow)
                .collect()
        };

        debug!(doc = %id, rows = row_deletes.len(), "delete: by identity");

        self.queue.enqueue(Command::DeleteDocument(id));
        for command in row_deletes {
            self.queue.enqueue(command);
        }
        self.identity.untrack(id);
        self.deleted.insert(id);

        Ok(())
    }

    // ======================================================================
    // Get / load
    // ======================================================================

    /// Typed get. Resolves through the identity map first — a repeated get
    /// returns the identical handle without touching the store — and
    /// otherwise fetches, deserializes, and tracks.
    pub fn get<T: Record>(&mut self, id: DocumentId) -> Result<DocRef<T>, Error> {
        self.ensure_active("get")?;

        if self.deleted.contains(&id) {
            return Err(SessionError::NotFound { id }.into());
        }
        if let Some(doc_ref) = self.identity.resolve::<T>(id)? {
            return Ok(doc_ref);
        }

        let document = self
            .store
            .inner()
            .backend
            .fetch(id)?
            .ok_or(SessionError::NotFound { id })?;

        self.hydrate(&document)
    }

    /// Untyped get; absent documents are `Ok(None)`.
    pub fn get_document(&mut self, id: DocumentId) -> Result<Option<Document>, Error> {
        self.ensure_active("get")?;

        if self.deleted.contains(&id) {
            return Ok(None);
        }
        if let Some(document) = self.identity.cached_document(id) {
            return Ok(Some(document.clone()));
        }

        let fetched = self.store.inner().backend.fetch(id)?;
        if let Some(document) = &fetched {
            self.identity.cache_document(document.clone());
        }

        Ok(fetched)
    }

    /// Deserialize and track an already-fetched document. Re-tracking a
    /// document this session already resolved returns the existing handle.
    pub fn hydrate<T: Record>(&mut self, document: &Document) -> Result<DocRef<T>, Error> {
        self.ensure_active("hydrate")?;

        if let Some(doc_ref) = self.identity.resolve::<T>(document.id)? {
            return Ok(doc_ref);
        }
        if document.doc_type != T::TYPE {
            return Err(SessionError::WrongType {
                id: document.id,
                expected: T::TYPE,
                found: document.doc_type.clone(),
            }
            .into());
        }

        let object: T = deserialize(&document.payload)?;
        let rows = self.project_obj(&object, document.id)?;
        let doc_ref = self.identity.track(object, document.id)?;

        // Freshly-loaded content is what is persisted; seed the synchronizer
        // so the first save diffs against it.
        self.sync.seed(document.id, rows);
        self.identity.cache_document(document.clone());

        Ok(doc_ref)
    }

    /// Borrow a tracked object.
    pub fn entity<T: Record>(&self, doc_ref: DocRef<T>) -> Result<&T, Error> {
        Ok(self.identity.object(doc_ref)?)
    }

    /// Borrow a tracked object mutably. Changes become persistent when the
    /// handle is saved again.
    pub fn entity_mut<T: Record>(&mut self, doc_ref: DocRef<T>) -> Result<&mut T, Error> {
        Ok(self.identity.object_mut(doc_ref)?)
    }

    // ======================================================================
    // Query entry points
    // ======================================================================

    /// Lazy typed query over documents of `T`.
    pub fn load<T: Record>(&mut self) -> LoadQuery<'_, T> {
        LoadQuery::new(self)
    }

    /// Lazy untyped query over the whole document set.
    pub fn query(&mut self) -> DocQuery<'_> {
        DocQuery::new(self)
    }

    /// Lazy query over one index's persisted row set.
    #[must_use]
    pub fn query_index<I: IndexSpec>(&self) -> IndexQuery<'_, I> {
        IndexQuery::new(self)
    }

    // ======================================================================
    // Commit / cancel lifecycle
    // ======================================================================

    /// Flush every pending command as one transaction. On success the queue
    /// is empty and the session is `Committed`; on failure the transaction is
    /// rolled back in full, the queue is restored unchanged, and the session
    /// returns to `Active` for retry or cancel.
    pub fn commit(&mut self) -> Result<(), Error> {
        self.ensure_active("commit")?;
        self.state = SessionState::Committing;

        let batch = self.queue.drain_all();
        debug!(commands = batch.len(), isolation = %self.isolation, "commit");

        match apply_batch(self.store.inner().backend.as_ref(), self.isolation, &batch) {
            Ok(()) => {
                self.state = SessionState::Committed;
                self.committed_once = true;
                Ok(())
            }
            Err(err) => {
                self.queue.requeue(batch);
                self.state = SessionState::Active;
                Err(err.into())
            }
        }
    }

    /// Same contract as [`commit`](Self::commit), but the backing-store I/O
    /// runs on a blocking worker so the caller's thread is never blocked.
    /// `&mut self` plus the `Committing` state give at-most-one in-flight
    /// commit per session.
    pub async fn commit_async(&mut self) -> Result<(), Error> {
        self.ensure_active("commit_async")?;
        self.state = SessionState::Committing;

        let batch = self.queue.drain_all();
        debug!(commands = batch.len(), isolation = %self.isolation, "commit_async");

        let backend = Arc::clone(&self.store.inner().backend);
        let isolation = self.isolation;
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = apply_batch(backend.as_ref(), isolation, &batch);
            (outcome, batch)
        })
        .await;

        match joined {
            Ok((Ok(()), _)) => {
                self.state = SessionState::Committed;
                self.committed_once = true;
                Ok(())
            }
            Ok((Err(err), batch)) => {
                self.queue.requeue(batch);
                self.state = SessionState::Active;
                Err(err.into())
            }
            Err(join_err) => {
                self.state = SessionState::Active;
                Err(StorageError::backend(format!("commit task failed: {join_err}")).into())
            }
        }
    }

    /// Discard every pending command without touching the backing store.
    pub fn cancel(&mut self) -> Result<(), Error> {
        self.ensure_active("cancel")?;

        debug!(discarded = self.queue.len(), "cancel");
        self.queue.clear();
        self.state = SessionState::Cancelled;

        Ok(())
    }

    // ======================================================================
    // Internals
    // ======================================================================

    pub(crate) fn ensure_active(&self, op: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    fn project_obj<T: Record>(
        &self,
        object: &T,
        id: DocumentId,
    ) -> Result<BTreeSet<IndexRow>, Error> {
        let mut rows = BTreeSet::new();
        for descriptor in self.store.inner().registry.descriptors_for(T::TYPE) {
            rows.extend(descriptor.project(object, id)?);
        }

        Ok(rows)
    }

    /// Persisted rows of a document this session never projected, read back
    /// through every descriptor registered for its type.
    fn persisted_rows(&self, id: DocumentId) -> Result<Vec<IndexRow>, Error> {
        let inner = self.store.inner();
        let Some(document) = inner.backend.fetch(id)? else {
            return Err(SessionError::NotFound { id }.into());
        };

        let mut rows = Vec::new();
        for descriptor in inner.registry.descriptors_for(&document.doc_type) {
            rows.extend(
                inner
                    .backend
                    .fetch_index(descriptor.name(), &|row| row.doc == id)?,
            );
        }

        Ok(rows)
    }

    pub(crate) fn backend(&self) -> &dyn TransactionalStore {
        self.store.inner().backend.as_ref()
    }

    /// Query-side materialization: unlike [`get`](Self::get), absent or
    /// differently-typed documents are skipped, not errors.
    pub(crate) fn materialize_for_query<T: Record>(
        &mut self,
        id: DocumentId,
    ) -> Result<Option<DocRef<T>>, Error> {
        if self.deleted.contains(&id) {
            return Ok(None);
        }
        match self.identity.resolve::<T>(id) {
            Ok(Some(doc_ref)) => return Ok(Some(doc_ref)),
            Ok(None) => {}
            // Tracked under another type: not a member of this result set.
            Err(IdentityError::TypeMismatch { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let Some(document) = self.store.inner().backend.fetch(id)? else {
            return Ok(None);
        };
        if document.doc_type != T::TYPE {
            return Ok(None);
        }

        self.hydrate(&document).map(Some)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            if self.commit_on_drop {
                if let Err(err) = self.commit() {
                    error!(%err, "implicit commit on drop failed; pending work discarded");
                }
            } else {
                self.queue.clear();
            }
        }
        self.state = SessionState::Disposed;
    }
}

/// Apply one drained batch inside a single backend transaction. Any failure
/// rolls back; partial application is never observable.
fn apply_batch(
    backend: &dyn TransactionalStore,
    isolation: IsolationLevel,
    batch: &[Command],
) -> Result<(), StorageError> {
    let mut tx = backend.begin(isolation)?;

    for command in batch {
        if let Err(err) = tx.execute(command) {
            tx.rollback();
            return Err(err);
        }
    }

    tx.commit()
}
