use crate::{
    document::{Document, DocumentId},
    index::IndexRow,
};
use std::collections::HashMap;

///
/// Command
///
/// One pending mutation. Created by save/delete, held in the queue, consumed
/// exactly once by commit, discarded by cancel. Each command carries enough
/// data to apply itself against the backing store.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    InsertDocument(Document),
    UpdateDocument(Document),
    DeleteDocument(DocumentId),
    InsertIndexRow(IndexRow),
    DeleteIndexRow(IndexRow),
}

impl Command {
    /// The collapse key: a document target or one structural row target.
    fn key(&self) -> CommandKey {
        match self {
            Self::InsertDocument(doc) | Self::UpdateDocument(doc) => CommandKey::Document(doc.id),
            Self::DeleteDocument(id) => CommandKey::Document(*id),
            Self::InsertIndexRow(row) | Self::DeleteIndexRow(row) => CommandKey::Row(row.clone()),
        }
    }
}

#[derive(Clone, Eq, Hash, PartialEq)]
enum CommandKey {
    Document(DocumentId),
    Row(IndexRow),
}

enum Collapse {
    Replace(Command),
    Remove,
}

// Net effect of `incoming` landing on top of `existing` for the same key.
fn collapse(existing: &Command, incoming: Command) -> Collapse {
    use Command::{DeleteDocument, DeleteIndexRow, InsertDocument, InsertIndexRow, UpdateDocument};

    match (existing, incoming) {
        // Never persisted, so an update keeps it an insert and a delete
        // cancels it entirely.
        (InsertDocument(_), UpdateDocument(doc) | InsertDocument(doc)) => {
            Collapse::Replace(InsertDocument(doc))
        }
        (InsertDocument(_), DeleteDocument(_)) => Collapse::Remove,

        (UpdateDocument(_), UpdateDocument(doc)) => Collapse::Replace(UpdateDocument(doc)),
        (UpdateDocument(_), DeleteDocument(id)) => Collapse::Replace(DeleteDocument(id)),

        // Delete followed by a re-save of the same persisted identity nets to
        // an update.
        (DeleteDocument(_), InsertDocument(doc) | UpdateDocument(doc)) => {
            Collapse::Replace(UpdateDocument(doc))
        }

        // A row insert and delete for the identical row cancel out either
        // way: the persisted state already matches the net effect.
        (InsertIndexRow(_), DeleteIndexRow(_)) | (DeleteIndexRow(_), InsertIndexRow(_)) => {
            Collapse::Remove
        }

        // Same-direction repeats are idempotent; keep the latest.
        (_, incoming) => Collapse::Replace(incoming),
    }
}

///
/// CommandQueue
///
/// Pending commands in first-enqueue order, with last-write-wins collapsing
/// per (document, target) key. A collapsed command keeps the position of the
/// earliest command it supersedes.
///

#[derive(Default)]
pub struct CommandQueue {
    entries: Vec<Option<Command>>,
    by_key: HashMap<CommandKey, usize>,
    live: usize,
}

impl CommandQueue {
    pub fn enqueue(&mut self, command: Command) {
        let key = command.key();

        if let Some(&slot) = self.by_key.get(&key) {
            if let Some(existing) = self.entries[slot].take() {
                match collapse(&existing, command) {
                    Collapse::Replace(net) => self.entries[slot] = Some(net),
                    Collapse::Remove => {
                        self.by_key.remove(&key);
                        self.live -= 1;
                    }
                }
                return;
            }
            // Keyed slot already tombstoned; drop the stale key and append.
            self.by_key.remove(&key);
        }

        self.by_key.insert(key, self.entries.len());
        self.entries.push(Some(command));
        self.live += 1;
    }

    /// Consume the queue, yielding surviving commands in order.
    pub fn drain_all(&mut self) -> Vec<Command> {
        self.by_key.clear();
        self.live = 0;

        self.entries.drain(..).flatten().collect()
    }

    /// Restore a drained batch unchanged (failed-commit path). The queue must
    /// be empty; the batch keeps its order and keys.
    pub fn requeue(&mut self, batch: Vec<Command>) {
        debug_assert!(self.entries.is_empty());
        for command in batch {
            self.by_key.insert(command.key(), self.entries.len());
            self.entries.push(Some(command));
            self.live += 1;
        }
    }

    /// Discard everything without returning it (cancel path).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_key.clear();
        self.live = 0;
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RowValues;

    fn doc(id: i64, payload: &[u8]) -> Document {
        Document {
            id: DocumentId::new(id),
            doc_type: "article".into(),
            payload: payload.to_vec(),
        }
    }

    fn row(id: i64, title: &str) -> IndexRow {
        IndexRow::new(
            "by_title",
            DocumentId::new(id),
            RowValues::new().field("title", title),
        )
    }

    #[test]
    fn preserves_enqueue_order_across_keys() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertDocument(doc(1, b"a")));
        queue.enqueue(Command::InsertIndexRow(row(1, "A")));
        queue.enqueue(Command::InsertDocument(doc(2, b"b")));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 3);
        assert!(matches!(&drained[0], Command::InsertDocument(d) if d.id == DocumentId::new(1)));
        assert!(matches!(&drained[1], Command::InsertIndexRow(_)));
        assert!(matches!(&drained[2], Command::InsertDocument(d) if d.id == DocumentId::new(2)));
        assert!(queue.is_empty());
    }

    #[test]
    fn insert_then_update_stays_an_insert_with_the_new_payload() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertDocument(doc(1, b"old")));
        queue.enqueue(Command::UpdateDocument(doc(1, b"new")));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);
        assert!(matches!(&drained[0], Command::InsertDocument(d) if d.payload == b"new"));
    }

    #[test]
    fn insert_then_delete_collapses_to_nothing() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertDocument(doc(1, b"a")));
        queue.enqueue(Command::DeleteDocument(DocumentId::new(1)));

        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn update_then_delete_keeps_the_delete() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::UpdateDocument(doc(1, b"a")));
        queue.enqueue(Command::DeleteDocument(DocumentId::new(1)));

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);
        assert!(matches!(&drained[0], Command::DeleteDocument(id) if *id == DocumentId::new(1)));
    }

    #[test]
    fn opposite_row_mutations_cancel_out() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertIndexRow(row(1, "A")));
        queue.enqueue(Command::DeleteIndexRow(row(1, "A")));
        assert!(queue.is_empty());

        queue.enqueue(Command::DeleteIndexRow(row(1, "B")));
        queue.enqueue(Command::InsertIndexRow(row(1, "B")));
        assert!(queue.is_empty());
    }

    #[test]
    fn distinct_rows_do_not_collapse() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertIndexRow(row(1, "A")));
        queue.enqueue(Command::DeleteIndexRow(row(1, "B")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn requeue_restores_a_drained_batch_in_order() {
        let mut queue = CommandQueue::default();
        queue.enqueue(Command::InsertDocument(doc(1, b"a")));
        queue.enqueue(Command::InsertIndexRow(row(1, "A")));

        let batch = queue.drain_all();
        queue.requeue(batch.clone());

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_all(), batch);
    }
}
