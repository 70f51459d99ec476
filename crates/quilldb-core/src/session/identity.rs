use crate::{
    document::{Document, DocumentId},
    traits::Record,
};
use std::{any::Any, collections::HashMap, fmt, hash::Hash, hash::Hasher, marker::PhantomData};
use thiserror::Error as ThisError;

///
/// IdentityError
///
/// Identity-map violations. These are programmer errors and surface
/// immediately, never at commit time.
///

#[derive(Debug, ThisError)]
pub enum IdentityError {
    #[error("document {id} is already tracked by a different object")]
    Conflict { id: DocumentId },

    #[error("document handle does not refer to a live tracked object")]
    StaleHandle,

    #[error("tracked object for document {id} is not of type '{expected}'")]
    TypeMismatch {
        id: DocumentId,
        expected: &'static str,
    },
}

///
/// DocRef
///
/// Typed handle to a tracked object, stable for the lifetime of one session.
/// This is the reference identity of the unit of work: the same logical
/// object always resolves to the same handle, and the same handle to the
/// same document identity. Handles are meaningless across sessions.
///

pub struct DocRef<T> {
    slot: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DocRef<T> {
    const fn new(slot: u32) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }
}

// Manual impls: `T` itself need not be Clone/Eq for the handle to be.
impl<T> Clone for DocRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for DocRef<T> {}
impl<T> PartialEq for DocRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}
impl<T> Eq for DocRef<T> {}
impl<T> Hash for DocRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}
impl<T> fmt::Debug for DocRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocRef").field(&self.slot).finish()
    }
}

struct Slot {
    object: Box<dyn Any>,
    doc_type: &'static str,
    id: DocumentId,
}

///
/// IdentityMap
///
/// Per-session bidirectional map between tracked objects and document
/// identities, plus a cache of raw documents fetched untyped.
///
/// Invariants (enforced at track time):
/// - at most one identity per tracked object;
/// - at most one tracked object per identity.
///

#[derive(Default)]
pub struct IdentityMap {
    slots: Vec<Option<Slot>>,
    by_id: HashMap<DocumentId, u32>,
    documents: HashMap<DocumentId, Document>,
}

impl IdentityMap {
    /// Track an object under an identity, returning its handle. An object is
    /// bound to exactly one identity for its whole tracked life, so the
    /// conflict to detect is the identity already belonging to another slot.
    pub fn track<T: Record>(&mut self, object: T, id: DocumentId) -> Result<DocRef<T>, IdentityError> {
        if self.by_id.contains_key(&id) {
            return Err(IdentityError::Conflict { id });
        }

        let slot = u32::try_from(self.slots.len()).map_err(|_| IdentityError::Conflict { id })?;
        self.slots.push(Some(Slot {
            object: Box::new(object),
            doc_type: T::TYPE,
            id,
        }));
        self.by_id.insert(id, slot);

        Ok(DocRef::new(slot))
    }

    /// The identity a handle is tracked under.
    pub fn lookup<T>(&self, doc_ref: DocRef<T>) -> Result<DocumentId, IdentityError> {
        self.slot(doc_ref.slot).map(|slot| slot.id)
    }

    /// The handle previously tracked for an identity, if any. Returns the
    /// exact handle handed out before; the caller supplies the expected type.
    pub fn resolve<T: Record>(&self, id: DocumentId) -> Result<Option<DocRef<T>>, IdentityError> {
        let Some(&index) = self.by_id.get(&id) else {
            return Ok(None);
        };
        let slot = self.slot(index)?;

        if slot.doc_type != T::TYPE {
            return Err(IdentityError::TypeMismatch {
                id,
                expected: T::TYPE,
            });
        }

        Ok(Some(DocRef::new(index)))
    }

    pub fn object<T: Record>(&self, doc_ref: DocRef<T>) -> Result<&T, IdentityError> {
        let slot = self.slot(doc_ref.slot)?;

        slot.object
            .downcast_ref::<T>()
            .ok_or(IdentityError::TypeMismatch {
                id: slot.id,
                expected: T::TYPE,
            })
    }

    pub fn object_mut<T: Record>(&mut self, doc_ref: DocRef<T>) -> Result<&mut T, IdentityError> {
        let slot = self
            .slots
            .get_mut(doc_ref.slot as usize)
            .and_then(Option::as_mut)
            .ok_or(IdentityError::StaleHandle)?;
        let id = slot.id;

        slot.object
            .downcast_mut::<T>()
            .ok_or(IdentityError::TypeMismatch {
                id,
                expected: T::TYPE,
            })
    }

    /// Drop the association for an identity (delete path). The slot is
    /// tombstoned so existing handles surface `StaleHandle` instead of
    /// resolving to a new object.
    pub fn untrack(&mut self, id: DocumentId) {
        if let Some(index) = self.by_id.remove(&id) {
            self.slots[index as usize] = None;
        }
        self.documents.remove(&id);
    }

    pub fn cache_document(&mut self, document: Document) {
        self.documents.insert(document.id, document);
    }

    #[must_use]
    pub fn cached_document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    #[must_use]
    pub fn is_tracked(&self, id: DocumentId) -> bool {
        self.by_id.contains_key(&id)
    }

    fn slot(&self, index: u32) -> Result<&Slot, IdentityError> {
        self.slots
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(IdentityError::StaleHandle)
    }
}
