// tests/conflict_test.rs
use lectern::models::{AnnotationThread, EntityKind, Note, ParagraphBinding};
use lectern::{
    AnnotationStore, BindingStore, ConflictMerger, ConflictScope, ConflictSet, DocumentRevision,
    Error, MergeRegistry, ReplicatedDocuments, Result, Store, Transactional,
};
use serde_json::{json, Value};

/// Base revision of `doc_id` plus one concurrent child per body.
fn conflicting(store: &Store, doc_id: &str, base: Value, edits: &[Value]) -> DocumentRevision {
    let root = DocumentRevision::child(doc_id, None, base, false);
    store.put_replicated_revision(&root).unwrap();
    for edit in edits {
        let sibling = DocumentRevision::child(doc_id, Some(&root), edit.clone(), false);
        store.put_replicated_revision(&sibling).unwrap();
    }
    root
}

fn binding_body(creator: &str) -> Value {
    let mut body = serde_json::to_value(ParagraphBinding::new("x", "y", creator)).unwrap();
    body["type"] = json!("paragraph_binding");
    body
}

#[test]
fn test_three_way_conflict_merges_to_fixed_value() {
    let store = Store::open_in_memory().unwrap();
    conflicting(
        &store,
        "D",
        json!({"type": "paragraph", "v": 0}),
        &[
            json!({"type": "paragraph", "v": 1}),
            json!({"type": "paragraph", "v": 2}),
            json!({"type": "paragraph", "v": 3}),
        ],
    );

    let fixed = json!({"type": "paragraph", "v": "merged"});
    let mut registry = MergeRegistry::new();
    let value = fixed.clone();
    registry.register(EntityKind::Paragraph, move |reps: &[Value]| {
        assert_eq!(reps.len(), 3);
        Ok(value.clone())
    });
    let merger = ConflictMerger::new(&store, &registry);

    assert_eq!(merger.run().unwrap(), 1);

    let live: Vec<DocumentRevision> = store
        .leaves("D")
        .unwrap()
        .into_iter()
        .filter(|r| !r.deleted)
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].properties, fixed);
    assert_eq!(store.current_revision("D").unwrap().unwrap().properties, fixed);

    // the losing siblings are tombstoned, not removed
    assert_eq!(store.revisions("D").unwrap().len(), 1 + 3 + 1 + 2);

    assert_eq!(merger.run().unwrap(), 0);
}

#[test]
fn test_default_policies_cover_bindings_and_threads() {
    let store = Store::open_in_memory().unwrap();
    let registry = MergeRegistry::with_defaults();
    let merger = ConflictMerger::new(&store, &registry);

    let binding = ParagraphBinding::new("GEN-en", "GEN-fr", "alice");
    store.push_binding(&binding).unwrap();
    let base = store.current_revision(&binding.id).unwrap().unwrap();
    let mut newer = base.properties.clone();
    newer["created"] = json!(binding.created.timestamp_millis() + 10_000);
    newer["creator_id"] = json!("bob");
    let mut older = base.properties.clone();
    older["creator_id"] = json!("carol");
    for body in [older, newer] {
        store
            .put_replicated_revision(&DocumentRevision::child(&binding.id, Some(&base), body, false))
            .unwrap();
    }

    let thread = AnnotationThread::placeholder("notes", "GEN-en", 1, "path", "alice");
    store.push_thread(&thread).unwrap();
    let base = store.current_revision(&thread.id).unwrap().unwrap();
    for author in ["alice", "bob"] {
        let mut body = base.properties.clone();
        body["notes"] = serde_json::to_value(vec![Note::new(author, "remark")]).unwrap();
        store
            .put_replicated_revision(&DocumentRevision::child(&thread.id, Some(&base), body, false))
            .unwrap();
    }

    let report = merger.pass(&ConflictScope::All).unwrap();
    assert_eq!(report.resolved.len(), 2);
    assert!(report.skipped.is_empty());

    let bindings = store.bindings_for_book("GEN-fr").unwrap();
    assert_eq!(bindings[0].creator_id, "bob");

    let threads = store.threads_for_paragraph("notes", 1, "path").unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].notes.len(), 2);
}

#[test]
fn test_skipped_conflicts_do_not_block_others() {
    let store = Store::open_in_memory().unwrap();
    let registry = MergeRegistry::with_defaults();
    let merger = ConflictMerger::new(&store, &registry);

    conflicting(
        &store,
        "A-widget",
        json!({"type": "widget"}),
        &[json!({"type": "widget", "n": 1}), json!({"type": "widget", "n": 2})],
    );
    // a paragraph document whose bodies cannot be read as paragraphs
    conflicting(
        &store,
        "B-broken",
        json!({"type": "paragraph"}),
        &[json!({"type": "paragraph", "n": 1}), json!({"type": "paragraph", "n": 2})],
    );
    conflicting(
        &store,
        "C-binding",
        json!({"type": "paragraph_binding"}),
        &[binding_body("alice"), binding_body("bob")],
    );

    let report = merger.pass(&ConflictScope::All).unwrap();
    assert_eq!(report.resolved, vec!["C-binding".to_string()]);
    let skipped: Vec<&str> = report.skipped.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(skipped, vec!["A-widget", "B-broken"]);

    // still unresolved, and still reported on the next pass
    assert_eq!(merger.run().unwrap(), 0);
    assert_eq!(store.all_conflicting_documents(&ConflictScope::All).unwrap().len(), 2);
}

/// Delegates to a store but refuses to write deletions.
struct NoDeletions<'a>(&'a Store);

impl Transactional for NoDeletions<'_> {
    fn run_transaction(&self, body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.0.run_transaction(body)
    }
}

impl ReplicatedDocuments for NoDeletions<'_> {
    fn all_conflicting_documents(&self, scope: &ConflictScope) -> Result<Vec<ConflictSet>> {
        self.0.all_conflicting_documents(scope)
    }

    fn write_merged_revision(
        &self,
        set: &ConflictSet,
        keeper: &DocumentRevision,
        merged: &Value,
    ) -> Result<DocumentRevision> {
        self.0.write_merged_revision(set, keeper, merged)
    }

    fn mark_as_deletion(&self, revision: &DocumentRevision) -> Result<DocumentRevision> {
        Err(Error::NotFound(revision.rev_id.clone()))
    }
}

#[test]
fn test_store_error_rolls_back_the_whole_pass() {
    let store = Store::open_in_memory().unwrap();
    for doc in ["P1", "P2"] {
        conflicting(
            &store,
            doc,
            json!({"type": "paragraph_binding"}),
            &[binding_body("alice"), binding_body("bob")],
        );
    }
    let before = store.revisions("P1").unwrap().len() + store.revisions("P2").unwrap().len();

    let registry = MergeRegistry::with_defaults();
    let failing = NoDeletions(&store);
    let result = ConflictMerger::new(&failing, &registry).run();
    assert!(matches!(result, Err(Error::NotFound(_))));

    let after = store.revisions("P1").unwrap().len() + store.revisions("P2").unwrap().len();
    assert_eq!(before, after);
    assert_eq!(store.all_conflicting_documents(&ConflictScope::All).unwrap().len(), 2);

    assert_eq!(ConflictMerger::new(&store, &registry).run().unwrap(), 2);
}

#[test]
fn test_scoped_run_only_touches_one_book() {
    let store = Store::open_in_memory().unwrap();
    let registry = MergeRegistry::with_defaults();
    let merger = ConflictMerger::new(&store, &registry);

    for (doc, book) in [("gen-doc", "GEN"), ("exo-doc", "EXO")] {
        let thread = |author: &str| {
            let mut t = AnnotationThread::placeholder("notes", book, 2, "path", "alice");
            t.id = doc.to_string();
            t.notes = vec![Note::new(author, "hm")];
            let mut body = serde_json::to_value(t).unwrap();
            body["type"] = json!("annotation_thread");
            body
        };
        conflicting(&store, doc, thread("alice"), &[thread("bob"), thread("carol")]);
    }

    assert_eq!(merger.run_scoped(&ConflictScope::chapters("GEN", 3..=9)).unwrap(), 0);
    assert_eq!(merger.run_scoped(&ConflictScope::chapters("GEN", 1..=2)).unwrap(), 1);

    let left = store.all_conflicting_documents(&ConflictScope::All).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].doc_id, "exo-doc");
}
