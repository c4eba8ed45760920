// src/conflict_merger.rs
use std::fmt;

use log::{debug, info, warn};

use crate::error::Result;
use crate::merge_policies::MergeRegistry;
use crate::models::EntityKind;
use crate::revision_store::{ConflictScope, ConflictSet, ReplicatedDocuments};

/// Why a conflict set was left unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingType,
    UnknownType(String),
    NoPolicy(EntityKind),
    PolicyFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingType => write!(f, "document has no type"),
            SkipReason::UnknownType(t) => write!(f, "unknown document type '{}'", t),
            SkipReason::NoPolicy(kind) => write!(f, "no merge policy for {}", kind),
            SkipReason::PolicyFailed(e) => write!(f, "merge policy failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Documents collapsed to a single live revision.
    pub resolved: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Collapses replication conflicts to one live revision per document.
pub struct ConflictMerger<'a> {
    documents: &'a dyn ReplicatedDocuments,
    registry: &'a MergeRegistry,
}

impl<'a> ConflictMerger<'a> {
    pub fn new(documents: &'a dyn ReplicatedDocuments, registry: &'a MergeRegistry) -> Self {
        Self { documents, registry }
    }

    /// Resolve every conflict in the store. Returns the number of resolved sets.
    pub fn run(&self) -> Result<usize> {
        self.run_scoped(&ConflictScope::All)
    }

    /// Resolve the conflicts of one book and chapter range.
    pub fn run_scoped(&self, scope: &ConflictScope) -> Result<usize> {
        Ok(self.pass(scope)?.resolved.len())
    }

    /// One merge pass in a single transaction. A store error rolls back every
    /// set resolved so far.
    pub fn pass(&self, scope: &ConflictScope) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        self.documents.run_transaction(&mut || {
            report = MergeReport::default();
            for set in self.documents.all_conflicting_documents(scope)? {
                match self.merged_value(&set) {
                    Ok(merged) => {
                        self.apply(&set, &merged)?;
                        report.resolved.push(set.doc_id.clone());
                    }
                    Err(reason) => {
                        warn!("leaving conflict on {} unresolved: {}", set.doc_id, reason);
                        report.skipped.push((set.doc_id.clone(), reason));
                    }
                }
            }
            Ok(())
        })?;

        info!(
            "conflict pass resolved {} and skipped {}",
            report.resolved.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn merged_value(&self, set: &ConflictSet) -> std::result::Result<serde_json::Value, SkipReason> {
        let doc_type = set.doc_type().ok_or(SkipReason::MissingType)?;
        let kind = EntityKind::parse(doc_type)
            .ok_or_else(|| SkipReason::UnknownType(doc_type.to_string()))?;
        let policy = self.registry.get(kind).ok_or(SkipReason::NoPolicy(kind))?;

        policy(&set.representations()).map_err(|e| SkipReason::PolicyFailed(e.to_string()))
    }

    fn apply(&self, set: &ConflictSet, merged: &serde_json::Value) -> Result<()> {
        let Some(keeper) = set.keeper() else {
            return Ok(());
        };
        let written = self.documents.write_merged_revision(set, keeper, merged)?;
        for loser in set.losers() {
            self.documents.mark_as_deletion(loser)?;
        }
        debug!(
            "merged {} siblings of {} into {}",
            set.siblings.len(),
            set.doc_id,
            written.rev_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::{Paragraph, ParagraphContent};
    use crate::paragraph_store::ParagraphStore;
    use crate::revision_store::DocumentRevision;
    use crate::store::Store;
    use serde_json::{json, Value};

    /// Store `count` concurrent edits of one document on top of `body`.
    fn conflict(store: &Store, doc_id: &str, body: Value, count: usize) {
        let base = DocumentRevision::child(doc_id, None, body.clone(), false);
        store.put_replicated_revision(&base).unwrap();
        for n in 0..count {
            let mut edit = body.clone();
            edit["edit"] = json!(n);
            let sibling = DocumentRevision::child(doc_id, Some(&base), edit, false);
            store.put_replicated_revision(&sibling).unwrap();
        }
    }

    fn paragraph_conflict(store: &Store) -> Paragraph {
        let paragraph =
            Paragraph::new_lineage("GEN", 1, 0, 0, ParagraphContent::plain("text"), "alice");
        let mut body = serde_json::to_value(&paragraph).unwrap();
        body["type"] = json!("paragraph");
        conflict(store, &paragraph.id, body, 3);
        paragraph
    }

    #[test]
    fn test_run_resolves_then_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let registry = MergeRegistry::with_defaults();
        let merger = ConflictMerger::new(&store, &registry);
        let paragraph = paragraph_conflict(&store);

        assert_eq!(merger.run().unwrap(), 1);
        assert_eq!(merger.run().unwrap(), 0);

        let leaves = store.leaves(&paragraph.id).unwrap();
        assert_eq!(leaves.iter().filter(|r| !r.deleted).count(), 1);
        assert_eq!(leaves.iter().filter(|r| r.deleted).count(), 2);
        assert!(store.get(&paragraph.id).unwrap().is_some());
    }

    #[test]
    fn test_unknown_and_untyped_documents_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        let registry = MergeRegistry::with_defaults();
        let merger = ConflictMerger::new(&store, &registry);
        conflict(&store, "widget", json!({"type": "widget"}), 2);
        conflict(&store, "blob", json!({"size": 3}), 2);

        let report = merger.pass(&ConflictScope::All).unwrap();
        assert!(report.resolved.is_empty());
        assert_eq!(
            report.skipped,
            vec![
                ("blob".to_string(), SkipReason::MissingType),
                ("widget".to_string(), SkipReason::UnknownType("widget".to_string())),
            ]
        );
        assert_eq!(store.all_conflicting_documents(&ConflictScope::All).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_policy_and_failing_policy_are_skipped() {
        let store = Store::open_in_memory().unwrap();
        paragraph_conflict(&store);
        conflict(&store, "binding", json!({"type": "paragraph_binding"}), 2);

        let mut registry = MergeRegistry::new();
        registry.register(EntityKind::ParagraphBinding, |_: &[Value]| {
            Err(Error::Merge("refused".to_string()))
        });
        let report = ConflictMerger::new(&store, &registry)
            .pass(&ConflictScope::All)
            .unwrap();

        assert!(report.resolved.is_empty());
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .any(|(_, reason)| *reason == SkipReason::NoPolicy(EntityKind::Paragraph)));
        assert!(report
            .skipped
            .iter()
            .any(|(_, reason)| matches!(reason, SkipReason::PolicyFailed(_))));
    }

    #[test]
    fn test_scoped_run_leaves_other_books_alone() {
        let store = Store::open_in_memory().unwrap();
        let registry = MergeRegistry::with_defaults();
        let merger = ConflictMerger::new(&store, &registry);
        paragraph_conflict(&store);

        assert_eq!(merger.run_scoped(&ConflictScope::book("EXO")).unwrap(), 0);
        assert_eq!(merger.run_scoped(&ConflictScope::chapters("GEN", 2..=3)).unwrap(), 0);
        assert_eq!(merger.run_scoped(&ConflictScope::chapters("GEN", 1..=1)).unwrap(), 1);
    }
}
