//! Secondary indexes: registered projections, the descriptor registry, and
//! the per-session synchronizer that turns projection diffs into row
//! mutations.
//!
//! Invariants:
//! - Descriptors are registered once, at store configuration time, and are
//!   immutable and read-only shared afterwards.
//! - The persisted row set of a document always equals the most recent
//!   projection of its content after commit; the synchronizer emits exactly
//!   the delta that restores this.

pub(crate) mod registry;
pub(crate) mod sync;

pub use registry::{Descriptor, IndexSpec, Registry, RegistryError};
pub use sync::IndexSynchronizer;

use crate::{document::DocumentId, value::RowValues};

///
/// IndexRow
///
/// One materialized projection value plus the owning document identity. Two
/// rows are the same row iff the index name, the owning identity, and every
/// projected field match.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IndexRow {
    pub index: &'static str,
    pub doc: DocumentId,
    pub values: RowValues,
}

impl IndexRow {
    #[must_use]
    pub const fn new(index: &'static str, doc: DocumentId, values: RowValues) -> Self {
        Self { index, doc, values }
    }
}
