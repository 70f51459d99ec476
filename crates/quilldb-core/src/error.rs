use crate::{
    backend::StorageError,
    index::RegistryError,
    serialize::SerializeError,
    session::{IdentityError, SessionError},
};
use thiserror::Error as ThisError;

///
/// Error
///
/// Crate-level error aggregating the per-module failure surfaces.
///
/// Every failure is surfaced synchronously to the caller (or through the
/// `commit_async` future); nothing is swallowed. A storage failure during
/// commit is always preceded by a full rollback, so partial application is
/// never observable.
///

#[derive(Debug, ThisError)]
pub enum Error {
    /// Bad descriptor registration. Surfaced at configuration time only.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Identity-map violation. Programmer error, surfaced immediately.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A payload could not be encoded or decoded; the mutation is not applied.
    #[error(transparent)]
    Serialize(#[from] SerializeError),

    /// Backing-store failure. The session returns to `Active` with its queue
    /// intact so the caller may retry the commit or cancel.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Lifecycle and lookup failures local to one session.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl Error {
    /// True if this is the typed-get miss for an absent document.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Session(SessionError::NotFound { .. }))
    }
}
