//! The process-wide document store: descriptor registry, shared config, and
//! session factory.
//!
//! Invariants:
//! - The registry is built once, before the store exists, and is read-only
//!   and safe for concurrent reads afterwards.
//! - Creating a session never mutates the backing store.

use crate::{
    backend::{IsolationLevel, TransactionalStore},
    document::DocumentId,
    error::Error,
    index::{IndexSpec, Registry, RegistryError},
    session::Session,
};
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

///
/// StoreConfig
///
/// Store-wide defaults; sessions may override per [`SessionOptions`].
///

#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Isolation level used by commits unless the session overrides it.
    pub isolation: IsolationLevel,
    /// Whether dropping an `Active` session commits implicitly. Explicit so
    /// the default behavior is assertable.
    pub commit_on_drop: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            commit_on_drop: true,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    #[must_use]
    pub const fn with_commit_on_drop(mut self, commit_on_drop: bool) -> Self {
        self.commit_on_drop = commit_on_drop;
        self
    }
}

///
/// SessionOptions
///
/// Per-session overrides of the store defaults.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SessionOptions {
    pub isolation: Option<IsolationLevel>,
    pub commit_on_drop: Option<bool>,
}

impl SessionOptions {
    #[must_use]
    pub const fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    #[must_use]
    pub const fn commit_on_drop(mut self, commit_on_drop: bool) -> Self {
        self.commit_on_drop = Some(commit_on_drop);
        self
    }
}

///
/// StoreBuilder
///

#[derive(Default)]
pub struct StoreBuilder {
    registry: Registry,
    config: StoreConfig,
}

impl StoreBuilder {
    /// Register an index descriptor. Fails if a descriptor with the same name
    /// is already registered for the same record type.
    pub fn register_index<I: IndexSpec>(mut self) -> Result<Self, RegistryError> {
        self.registry.register::<I>()?;

        Ok(self)
    }

    #[must_use]
    pub const fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the registry to a backend. Seeds the identity allocator from the
    /// highest persisted identity (a read, never a mutation).
    pub fn build(self, backend: impl TransactionalStore) -> Result<Store, Error> {
        let backend: Arc<dyn TransactionalStore> = Arc::new(backend);
        let highest = backend
            .scan()?
            .into_iter()
            .map(DocumentId::get)
            .max()
            .unwrap_or(0);

        Ok(Store {
            inner: Arc::new(StoreInner {
                registry: self.registry,
                config: self.config,
                backend,
                next_id: AtomicI64::new(highest + 1),
            }),
        })
    }
}

pub(crate) struct StoreInner {
    pub(crate) registry: Registry,
    pub(crate) config: StoreConfig,
    pub(crate) backend: Arc<dyn TransactionalStore>,
    next_id: AtomicI64,
}

///
/// Store
///
/// Long-lived and cheap to clone; many sessions may run concurrently against
/// one store, each owning its own identity map and command queue.
///

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// A fresh unit of work with store defaults.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session_with(SessionOptions::default())
    }

    /// A fresh unit of work with per-session overrides.
    #[must_use]
    pub fn session_with(&self, options: SessionOptions) -> Session {
        Session::new(self.clone(), options)
    }

    /// Assign the next document identity. Identities are unique per store and
    /// handed out before commit so pending commands can key on them.
    pub(crate) fn allocate_id(&self) -> DocumentId {
        DocumentId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }
}
