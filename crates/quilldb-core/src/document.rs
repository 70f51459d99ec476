//! The persisted record backing a mapped object.
//!
//! Invariants:
//! - A document's identity is assigned once, on first save, and never changes.
//! - The payload is opaque to the engine and may be replaced on update.

use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// DocumentId
///
/// Stable integer identity of a persisted document. `UNASSIGNED` (zero) marks
/// a document that has not been saved yet; the store's allocator hands out
/// positive identities.
///

#[derive(
    Clone, Copy, Debug, Default, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize,
    Serialize,
)]
pub struct DocumentId(i64);

impl DocumentId {
    pub const UNASSIGNED: Self = Self(0);

    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

///
/// Document
///
/// Identity, type tag, and opaque serialized payload.
///

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub doc_type: String,
    pub payload: Vec<u8>,
}

impl Document {
    /// A not-yet-saved document; the session assigns its identity on save.
    #[must_use]
    pub fn new(doc_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: DocumentId::UNASSIGNED,
            doc_type: doc_type.into(),
            payload,
        }
    }
}
