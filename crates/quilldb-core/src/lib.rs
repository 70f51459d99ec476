//! Core runtime for quilldb: documents, sessions, index synchronization, and
//! the transactional-store seam.
//!
//! A [`store::Store`] is the process-wide registry of index descriptors and
//! the session factory. A [`session::Session`] is one unit of work: it tracks
//! object identity, diffs index projections on every save and delete, queues
//! the resulting mutations, and flushes them as a single atomic transaction.

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod serialize;
pub mod session;
pub mod store;
pub mod traits;
pub mod value;

pub use backend::{IsolationLevel, StorageError, StoreTransaction, TransactionalStore};
pub use document::{Document, DocumentId};
pub use error::Error;
pub use index::{IndexRow, IndexSpec, RegistryError};
pub use session::{Command, DocRef, IdentityError, Session, SessionError, SessionState};
pub use store::{SessionOptions, Store, StoreBuilder, StoreConfig};
pub use traits::Record;
pub use value::{RowValues, Value};

///
/// Prelude
///
/// Domain vocabulary only; backends, queues, and error internals stay out.
///

pub mod prelude {
    pub use crate::{
        document::{Document, DocumentId},
        error::Error,
        index::{IndexRow, IndexSpec},
        session::{DocRef, Session},
        store::{Store, StoreConfig},
        traits::Record,
        value::{RowValues, Value},
    };
}
