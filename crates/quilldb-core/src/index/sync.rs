use crate::{document::DocumentId, index::IndexRow, session::Command};
use std::collections::{BTreeSet, HashMap};

///
/// IndexSynchronizer
///
/// Per-session diff engine. It remembers, per document, the last projection
/// this session has seen — seeded from the persisted content on load, and
/// replaced on every planned save — and emits only the row mutations that
/// move the persisted set to the new projection.
///
/// Re-entrancy: planning the same object twice without an intervening commit
/// diffs the second projection against the first one, not against the stale
/// persisted set, so no duplicate mutations are produced.
///

#[derive(Default)]
pub struct IndexSynchronizer {
    known: HashMap<DocumentId, BTreeSet<IndexRow>>,
}

impl IndexSynchronizer {
    /// Install the projection of a freshly-materialized document so the first
    /// in-session save diffs against what is actually persisted.
    pub fn seed(&mut self, doc: DocumentId, rows: BTreeSet<IndexRow>) {
        self.known.insert(doc, rows);
    }

    #[must_use]
    pub fn contains(&self, doc: DocumentId) -> bool {
        self.known.contains_key(&doc)
    }

    /// Rows currently known for a document, if any.
    #[must_use]
    pub fn known_rows(&self, doc: DocumentId) -> Option<&BTreeSet<IndexRow>> {
        self.known.get(&doc)
    }

    /// Diff the new projection against the last known one.
    ///
    /// Rows only in the old set become deletes, rows only in the new set
    /// become inserts, the intersection is a no-op. Deletes are emitted first
    /// so a value move never transiently duplicates under the backing store.
    pub fn plan_save(&mut self, doc: DocumentId, new_rows: BTreeSet<IndexRow>) -> Vec<Command> {
        let old_rows = self.known.remove(&doc).unwrap_or_default();

        let mut commands: Vec<Command> = old_rows
            .difference(&new_rows)
            .cloned()
            .map(Command::DeleteIndexRow)
            .collect();
        commands.extend(
            new_rows
                .difference(&old_rows)
                .cloned()
                .map(Command::InsertIndexRow),
        );

        self.known.insert(doc, new_rows);

        commands
    }

    /// All currently known rows for the document become deletes,
    /// unconditionally; the cache entry is dropped.
    pub fn plan_delete(&mut self, doc: DocumentId) -> Vec<Command> {
        self.known
            .remove(&doc)
            .unwrap_or_default()
            .into_iter()
            .map(Command::DeleteIndexRow)
            .collect()
    }

    /// Forget a document without emitting mutations (cancel/untrack path).
    pub fn forget(&mut self, doc: DocumentId) {
        self.known.remove(&doc);
    }
}
