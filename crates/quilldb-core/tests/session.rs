//! Unit-of-work lifecycle tests against the in-memory backend.

use quilldb_core::{
    Document, DocumentId, Error, IndexSpec, IsolationLevel, Record, RowValues, SessionOptions,
    Store, StoreConfig, Value,
    backend::MemoryStore,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Article {
    title: String,
    rank: i64,
}

impl Record for Article {
    const TYPE: &'static str = "article";
}

struct ByTitle;

impl IndexSpec for ByTitle {
    type Entity = Article;
    const NAME: &'static str = "by_title";

    fn project(entity: &Article) -> Vec<RowValues> {
        vec![RowValues::new().field("title", entity.title.clone())]
    }
}

fn article(title: &str) -> Article {
    Article {
        title: title.into(),
        rank: 1,
    }
}

fn store() -> (MemoryStore, Store) {
    let backend = MemoryStore::new();
    let built = Store::builder()
        .register_index::<ByTitle>()
        .unwrap()
        .build(backend.clone())
        .unwrap();

    (backend, built)
}

fn titles(backend: &MemoryStore) -> Vec<Value> {
    use quilldb_core::TransactionalStore;

    backend
        .fetch_index("by_title", &|_| true)
        .unwrap()
        .into_iter()
        .filter_map(|row| row.values.get("title").cloned())
        .collect()
}

#[test]
fn save_commit_update_commit_leaves_exactly_the_new_row() {
    let (backend, store) = store();

    // Save {title:"A"} and commit: exactly one row {title:"A"}.
    let mut session = store.session();
    session.save(article("A")).unwrap();
    session.commit().unwrap();

    let rows = store.session().query_index::<ByTitle>().rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].values.get("title"), Some(&Value::Text("A".into())));
    let id = rows[0].doc;

    // Update the title to "B", save, commit: {title:"B"} only, {title:"A"} gone.
    let mut session = store.session();
    let doc_ref = session.get::<Article>(id).unwrap();
    session.entity_mut(doc_ref).unwrap().title = "B".into();
    session.save_tracked(doc_ref).unwrap();
    session.commit().unwrap();

    assert_eq!(titles(&backend), vec![Value::Text("B".into())]);
}

#[test]
fn get_twice_returns_the_identical_handle() {
    let (_, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.commit().unwrap();

    let id = store.session().query_index::<ByTitle>().ids().unwrap()[0];

    let mut session = store.session();
    let first = session.get::<Article>(id).unwrap();
    let second = session.get::<Article>(id).unwrap();
    assert_eq!(first, second);

    // Mutating through the handle and saving updates the same identity.
    session.entity_mut(first).unwrap().rank = 9;
    session.save_tracked(first).unwrap();
    session.commit().unwrap();

    let mut check = store.session();
    let doc_ref = check.get::<Article>(id).unwrap();
    assert_eq!(check.entity(doc_ref).unwrap().rank, 9);
}

#[test]
fn save_then_delete_before_commit_touches_nothing() {
    let (backend, store) = store();
    let before = backend.snapshot();

    let mut session = store.session();
    let doc_ref = session.save(article("A")).unwrap();
    session.delete(doc_ref).unwrap();
    assert_eq!(session.pending_commands(), 0);
    session.commit().unwrap();

    assert_eq!(backend.snapshot(), before);
    assert_eq!(backend.mutation_count(), 0);
}

#[test]
fn cancel_leaves_the_store_bit_identical() {
    let (backend, store) = store();
    let before = backend.snapshot();

    let mut session = store.session();
    session.save(article("A")).unwrap();
    session.save(article("B")).unwrap();
    session.cancel().unwrap();

    // Cancelled sessions refuse further work but dispose cleanly.
    let err = session.save(article("C")).unwrap_err();
    assert!(matches!(err, Error::Session(_)));
    drop(session);

    assert_eq!(backend.snapshot(), before);
    assert_eq!(backend.mutation_count(), 0);
}

#[test]
fn failed_commit_rolls_back_fully_and_allows_retry() {
    let (backend, store) = store();

    let mut seed = store.session();
    seed.save(article("existing")).unwrap();
    seed.commit().unwrap();

    let before = backend.snapshot();
    let mut session = store.session();
    session.save(article("new")).unwrap();
    let pending = session.pending_commands();

    backend.fail_next_commit();
    let err = session.commit().unwrap_err();
    assert!(matches!(err, Error::Storage(_)));

    // Pre-state == post-failure-state, queue preserved, session usable.
    assert_eq!(backend.snapshot(), before);
    assert_eq!(session.pending_commands(), pending);

    session.commit().unwrap();
    assert_eq!(titles(&backend).len(), 2);
}

#[test]
fn empty_commit_still_reaches_committed() {
    let (backend, store) = store();

    let mut session = store.session();
    session.commit().unwrap();
    assert_eq!(backend.mutation_count(), 0);

    // One-shot: a committed session accepts no further saves.
    let err = session.save(article("A")).unwrap_err();
    assert!(matches!(err, Error::Session(_)));
}

#[test]
fn repeated_saves_before_commit_persist_the_final_projection_once() {
    let (backend, store) = store();

    let mut session = store.session();
    let doc_ref = session.save(article("A")).unwrap();
    session.entity_mut(doc_ref).unwrap().title = "B".into();
    session.save_tracked(doc_ref).unwrap();
    session.save_tracked(doc_ref).unwrap();
    session.commit().unwrap();

    // One document insert and one row insert survive the collapse.
    assert_eq!(backend.mutation_count(), 2);
    assert_eq!(titles(&backend), vec![Value::Text("B".into())]);
}

#[test]
fn dropping_an_active_session_commits_by_default() {
    let (backend, store) = store();

    {
        let mut session = store.session();
        session.save(article("A")).unwrap();
    }
    assert_eq!(titles(&backend), vec![Value::Text("A".into())]);

    // Opt-out leaves the store untouched.
    let before = backend.snapshot();
    {
        let mut session = store.session_with(SessionOptions::default().commit_on_drop(false));
        session.save(article("B")).unwrap();
    }
    assert_eq!(backend.snapshot(), before);
}

#[test]
fn store_config_can_disable_commit_on_drop_globally() {
    let backend = MemoryStore::new();
    let store = Store::builder()
        .register_index::<ByTitle>()
        .unwrap()
        .config(StoreConfig::default().with_commit_on_drop(false))
        .build(backend.clone())
        .unwrap();

    {
        let mut session = store.session();
        session.save(article("A")).unwrap();
    }
    assert_eq!(backend.mutation_count(), 0);
}

#[test]
fn deleting_a_never_seen_document_removes_its_persisted_rows() {
    let (backend, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.commit().unwrap();
    let id = store.session().query_index::<ByTitle>().ids().unwrap()[0];

    let mut session = store.session();
    session.delete_document(id).unwrap();
    session.commit().unwrap();

    assert!(titles(&backend).is_empty());
    assert_eq!(backend.snapshot().document_count(), 0);
}

#[test]
fn deleted_documents_are_invisible_within_the_session() {
    let (_, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.commit().unwrap();
    let id = store.session().query_index::<ByTitle>().ids().unwrap()[0];

    let mut session = store.session();
    session.delete_document(id).unwrap();

    let err = session.get::<Article>(id).unwrap_err();
    assert!(err.is_not_found());
    assert!(session.get_document(id).unwrap().is_none());
}

#[test]
fn typed_get_of_a_missing_identity_is_not_found() {
    let (_, store) = store();

    let mut session = store.session();
    let err = session.get::<Article>(DocumentId::new(404)).unwrap_err();
    assert!(err.is_not_found());

    // The untyped variant reports absence, not an error.
    assert!(session.get_document(DocumentId::new(404)).unwrap().is_none());
}

#[test]
fn load_composes_index_and_object_filters() {
    let (_, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.save(article("B")).unwrap();
    seed.save(Article {
        title: "B".into(),
        rank: 7,
    })
    .unwrap();
    seed.commit().unwrap();

    let mut session = store.session();
    let matches = session
        .load::<Article>()
        .index_where::<ByTitle>(|row| row.get("title") == Some(&Value::Text("B".into())))
        .filter(|a| a.rank > 1)
        .all()
        .unwrap();

    assert_eq!(matches.len(), 1);
    assert_eq!(session.entity(matches[0]).unwrap().rank, 7);
}

#[test]
fn load_tracks_materialized_objects_like_get() {
    let (_, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.commit().unwrap();

    let mut session = store.session();
    let loaded = session.load::<Article>().all().unwrap();
    assert_eq!(loaded.len(), 1);

    let id = session.query_index::<ByTitle>().ids().unwrap()[0];
    let got = session.get::<Article>(id).unwrap();
    assert_eq!(got, loaded[0]);
}

#[test]
fn doc_query_filters_raw_documents() {
    let (_, store) = store();

    let mut seed = store.session();
    seed.save(article("A")).unwrap();
    seed.save_document(Document::new("note", b"plain".to_vec()))
        .unwrap();
    seed.commit().unwrap();

    let mut session = store.session();
    let notes = session
        .query()
        .filter_doc(|doc| doc.doc_type == "note")
        .all()
        .unwrap();

    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].payload, b"plain");
}

#[test]
fn raw_document_save_skips_index_projection() {
    let (backend, store) = store();

    let mut session = store.session();
    session
        .save_document(Document::new("article", b"opaque".to_vec()))
        .unwrap();
    session.commit().unwrap();

    assert_eq!(backend.snapshot().document_count(), 1);
    assert!(titles(&backend).is_empty());
}

#[test]
fn isolation_level_is_chainable_and_locked_after_use() {
    let (_, store) = store();

    let mut session = store.session();
    session
        .isolation_level(IsolationLevel::Serializable)
        .unwrap()
        .save(article("A"))
        .unwrap();
    session.commit().unwrap();

    let mut cancelled = store.session();
    cancelled.cancel().unwrap();
    assert!(
        cancelled
            .isolation_level(IsolationLevel::Serializable)
            .is_err()
    );
}

#[tokio::test]
async fn commit_async_applies_the_batch_in_order() {
    let (backend, store) = store();

    let mut session = store.session();
    let doc_ref = session.save(article("A")).unwrap();
    session.entity_mut(doc_ref).unwrap().title = "B".into();
    session.save_tracked(doc_ref).unwrap();
    session.commit_async().await.unwrap();

    assert_eq!(titles(&backend), vec![Value::Text("B".into())]);
}

#[tokio::test]
async fn failed_async_commit_preserves_the_queue_for_retry() {
    let (backend, store) = store();

    let mut session = store.session();
    session.save(article("A")).unwrap();

    backend.fail_next_commit();
    assert!(session.commit_async().await.is_err());
    assert!(session.pending_commands() > 0);

    session.commit_async().await.unwrap();
    assert_eq!(titles(&backend), vec![Value::Text("A".into())]);
}
