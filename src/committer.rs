// src/committer.rs
//! Turns an alignment between the stored version of a book and an incoming
//! version into history mutations.
//!
//! Every incoming paragraph is classified against the old paragraphs it was
//! matched with. Old paragraphs are consumed in incoming order, so when one
//! old paragraph is split across several new ones, the first new paragraph
//! carries its lineage forward and the rest start lineages of their own.

use std::collections::HashSet;

use log::{debug, info, warn};

use crate::annotations::AnnotationStore;
use crate::bindings::BindingStore;
use crate::conflict_merger::ConflictMerger;
use crate::error::{Error, Result};
use crate::history::HistoryService;
use crate::matcher::Matcher;
use crate::models::{
    now, AnnotationThread, Paragraph, ParagraphBinding, ParagraphPair, PathPair, ALL_CHAPTERS,
};
use crate::paragraph_store::ParagraphStore;
use crate::revision_store::ConflictScope;
use crate::store::Store;

/// What happens to one incoming paragraph.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification<'p> {
    /// Nothing left to carry forward: start a new lineage.
    Insert { new: &'p Paragraph },
    /// Exactly one old lineage continues with the new content.
    Commit { old: &'p Paragraph, new: &'p Paragraph },
    /// Several old lineages end and the new paragraph starts a lineage of its own.
    Merge { olds: Vec<&'p Paragraph>, new: &'p Paragraph },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan<'p> {
    /// One step per incoming paragraph, in incoming order.
    pub steps: Vec<Classification<'p>>,
    /// Old paragraphs no incoming paragraph took over.
    pub orphans: Vec<&'p Paragraph>,
}

impl Plan<'_> {
    /// Whether bindings and annotations need a follow-up pass.
    pub fn creates_lineages(&self) -> bool {
        self.steps
            .iter()
            .any(|step| !matches!(step, Classification::Commit { .. }))
    }
}

/// Classify every paragraph of `new` against the old paragraphs `matches`
/// pairs it with. Pairs hold old paragraphs as `source`, new ones as `target`.
pub fn classify<'p>(
    old: &'p [Paragraph],
    new: &'p [Paragraph],
    matches: &'p [ParagraphPair],
) -> Plan<'p> {
    let mut consumed: HashSet<&str> = HashSet::new();
    let mut steps = Vec::with_capacity(new.len());

    for paragraph in new {
        let mut unconsumed: Vec<&Paragraph> = Vec::new();
        for pair in matches.iter().filter(|pair| pair.target.id == paragraph.id) {
            let candidate = &pair.source;
            if !consumed.contains(candidate.id.as_str())
                && !unconsumed.iter().any(|p| p.id == candidate.id)
            {
                unconsumed.push(candidate);
            }
        }
        consumed.extend(unconsumed.iter().map(|p| p.id.as_str()));

        let step = match unconsumed.len() {
            0 => Classification::Insert { new: paragraph },
            1 => Classification::Commit {
                old: unconsumed[0],
                new: paragraph,
            },
            _ => Classification::Merge {
                olds: unconsumed,
                new: paragraph,
            },
        };
        steps.push(step);
    }

    let orphans = old
        .iter()
        .filter(|p| !consumed.contains(p.id.as_str()))
        .collect();

    Plan { steps, orphans }
}

/// Lineages retired by one merge and the lineage that replaced them.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// `(path_id, chapter)` of every retired lineage.
    pub from: Vec<(String, u32)>,
    pub into: Paragraph,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverwriteReport {
    /// First revisions of newly started lineages.
    pub inserted: Vec<Paragraph>,
    /// New revisions on existing lineages.
    pub committed: Vec<Paragraph>,
    pub merged: Vec<MergeOutcome>,
    /// Path ids deprecated because nothing took them over.
    pub orphaned: Vec<String>,
    /// Ids of bindings recomputed after the overwrite.
    pub refreshed_bindings: Vec<String>,
    /// Ids of bindings left as they were because the other book has conflicts
    /// or is missing from the catalog.
    pub stale_bindings: Vec<String>,
    pub created_threads: Vec<String>,
    pub repointed_threads: Vec<String>,
}

/// Applies classified alignments to the stores.
pub struct Committer<'a> {
    paragraphs: &'a dyn ParagraphStore,
    history: &'a dyn HistoryService,
    bindings: &'a dyn BindingStore,
    annotations: &'a dyn AnnotationStore,
    merger: &'a ConflictMerger<'a>,
    matcher: Matcher,
    creator_id: String,
}

impl<'a> Committer<'a> {
    pub fn new(
        paragraphs: &'a dyn ParagraphStore,
        history: &'a dyn HistoryService,
        bindings: &'a dyn BindingStore,
        annotations: &'a dyn AnnotationStore,
        merger: &'a ConflictMerger<'a>,
        creator_id: &str,
    ) -> Self {
        Self {
            paragraphs,
            history,
            bindings,
            annotations,
            merger,
            matcher: Matcher::default(),
            creator_id: creator_id.to_string(),
        }
    }

    /// Committer whose collaborators are all `store`, rebuilding bindings
    /// under the store's missing-chapter policy.
    pub fn for_store(store: &'a Store, merger: &'a ConflictMerger<'a>) -> Self {
        Self::new(store, store, store, store, merger, store.creator_id())
            .with_matcher(Matcher::default().with_missing_chapters(store.missing_chapters()))
    }

    /// Matcher used to rebuild bindings.
    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Replace `old` (the stored paragraphs of `book_id`) with `new`, given the
    /// alignment `matches` between them, and optionally rename the book.
    ///
    /// Paragraph mutations and the rename happen in one transaction. When
    /// lineages were started, bindings and annotations are updated afterwards
    /// in nested transactions of their own, still inside the outer one, so a
    /// call that returns an error has changed nothing.
    pub fn overwrite(
        &self,
        book_id: &str,
        old: &[Paragraph],
        new: &[Paragraph],
        matches: &[ParagraphPair],
        rename: Option<&str>,
    ) -> Result<OverwriteReport> {
        let plan = classify(old, new, matches);
        let starts_lineages = plan.creates_lineages();
        let mut report = OverwriteReport::default();

        self.paragraphs.run_transaction(&mut || {
            self.paragraphs.run_transaction(&mut || {
                report = self.apply(book_id, &plan)?;
                if let Some(name) = rename {
                    self.paragraphs.rename_book(book_id, name)?;
                }
                Ok(())
            })?;

            if starts_lineages {
                self.refresh_bindings(book_id, &mut report)?;
                self.propagate_annotations(book_id, &mut report)?;
            }
            Ok(())
        })?;

        info!(
            "overwrote {}: {} inserted, {} committed, {} merged, {} orphaned",
            book_id,
            report.inserted.len(),
            report.committed.len(),
            report.merged.len(),
            report.orphaned.len()
        );
        Ok(report)
    }

    fn apply(&self, book_id: &str, plan: &Plan<'_>) -> Result<OverwriteReport> {
        let mut report = OverwriteReport::default();

        for step in &plan.steps {
            match step {
                Classification::Insert { new } => {
                    let lineage = self.start_lineage(book_id, new)?;
                    debug!("inserted {} as {}", new.id, lineage.path_id);
                    report.inserted.push(lineage);
                }
                Classification::Commit { old, new } => {
                    let revision = self.paragraphs.commit(
                        old,
                        new.chapter,
                        new.section,
                        new.index,
                        new.content.clone(),
                    )?;
                    debug!("committed {} onto {}", new.id, revision.path_id);
                    report.committed.push(revision);
                }
                Classification::Merge { olds, new } => {
                    let mut from = Vec::with_capacity(olds.len());
                    for old in olds {
                        self.history.deprecate_path(&old.path_id)?;
                        from.push((old.path_id.clone(), old.chapter));
                    }
                    let into = self.start_lineage(book_id, new)?;
                    debug!("merged {} lineages into {}", from.len(), into.path_id);
                    report.merged.push(MergeOutcome { from, into });
                }
            }
        }

        for orphan in &plan.orphans {
            self.history.deprecate_path(&orphan.path_id)?;
            report.orphaned.push(orphan.path_id.clone());
        }
        Ok(report)
    }

    fn start_lineage(&self, book_id: &str, new: &Paragraph) -> Result<Paragraph> {
        let lineage = Paragraph::new_lineage(
            book_id,
            new.chapter,
            new.section,
            new.index,
            new.content.clone(),
            &self.creator_id,
        );
        self.paragraphs.push_paragraph(&lineage)?;
        Ok(lineage)
    }

    fn refresh_bindings(&self, book_id: &str, report: &mut OverwriteReport) -> Result<()> {
        let mut project = None;

        for binding in self.bindings.bindings_for_book(book_id)? {
            let other = binding.other_side(book_id).to_string();
            if project.is_none() {
                project = Some(self.bindings.project_of(book_id)?);
            }

            let other_project = match self.bindings.project_of(&other) {
                Ok(other_project) => other_project,
                Err(Error::UnknownBook(_)) => {
                    warn!("binding {} left stale: {} is not in the catalog", binding.id, other);
                    report.stale_bindings.push(binding.id.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };

            if project.as_deref() == Some(other_project.as_str()) {
                self.merger.run_scoped(&ConflictScope::book(&other))?;
            } else if self.history.range_contains_conflicts(&other, &ALL_CHAPTERS)? {
                warn!(
                    "binding {} left stale: {} has unresolved conflicts",
                    binding.id, other
                );
                report.stale_bindings.push(binding.id.clone());
                continue;
            }

            let rebuilt = self.rebuild_binding(&binding)?;
            self.bindings
                .run_transaction(&mut || self.bindings.push_binding(&rebuilt))?;
            report.refreshed_bindings.push(binding.id.clone());
        }
        Ok(())
    }

    fn rebuild_binding(&self, binding: &ParagraphBinding) -> Result<ParagraphBinding> {
        let sources = self
            .paragraphs
            .get_latest(&binding.source_book_id, &ALL_CHAPTERS)?;
        let targets = self
            .paragraphs
            .get_latest(&binding.target_book_id, &ALL_CHAPTERS)?;

        let mut seen = HashSet::new();
        let pairs: Vec<PathPair> = self
            .matcher
            .align_checked(&sources, &targets)?
            .iter()
            .map(PathPair::from)
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        debug!("binding {} rebuilt with {} pairs", binding.id, pairs.len());
        Ok(ParagraphBinding {
            bindings: pairs,
            created: now(),
            creator_id: self.creator_id.clone(),
            ..binding.clone()
        })
    }

    fn propagate_annotations(&self, book_id: &str, report: &mut OverwriteReport) -> Result<()> {
        for collection_id in self.annotations.collections_for_book(book_id)? {
            let mut created = Vec::new();
            let mut repointed = Vec::new();

            self.annotations.run_transaction(&mut || {
                created.clear();
                repointed.clear();

                for lineage in &report.inserted {
                    let thread = AnnotationThread::placeholder(
                        &collection_id,
                        book_id,
                        lineage.chapter,
                        &lineage.path_id,
                        &self.creator_id,
                    );
                    self.annotations.push_thread(&thread)?;
                    created.push(thread.id);
                }

                for merge in &report.merged {
                    for (path_id, chapter) in &merge.from {
                        for mut thread in
                            self.annotations
                                .threads_for_paragraph(&collection_id, *chapter, path_id)?
                        {
                            thread.path_id = merge.into.path_id.clone();
                            thread.chapter = merge.into.chapter;
                            self.annotations.push_thread(&thread)?;
                            repointed.push(thread.id);
                        }
                    }
                }
                Ok(())
            })?;

            debug!(
                "collection {}: {} threads created, {} re-pointed",
                collection_id,
                created.len(),
                repointed.len()
            );
            report.created_threads.append(&mut created);
            report.repointed_threads.append(&mut repointed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParagraphContent, VerseRange};

    fn paragraph(index: u32, first: u32, last: u32) -> Paragraph {
        Paragraph::new_lineage(
            "GEN",
            1,
            0,
            index,
            ParagraphContent::plain(format!("{}-{}", first, last))
                .with_verses(VerseRange::verses(first, last)),
            "alice",
        )
    }

    fn pair(old: &Paragraph, new: &Paragraph) -> ParagraphPair {
        ParagraphPair::new(old.clone(), new.clone())
    }

    #[test]
    fn test_split_commits_first_and_inserts_rest() {
        let whole = paragraph(0, 1, 6);
        let first = paragraph(0, 1, 3);
        let second = paragraph(1, 4, 6);
        let old = vec![whole.clone()];
        let new = vec![first.clone(), second.clone()];
        let matches = vec![pair(&whole, &first), pair(&whole, &second)];

        let plan = classify(&old, &new, &matches);
        assert_eq!(
            plan.steps,
            vec![
                Classification::Commit { old: &matches[0].source, new: &new[0] },
                Classification::Insert { new: &new[1] },
            ]
        );
        assert!(plan.orphans.is_empty());
        assert!(plan.creates_lineages());
    }

    #[test]
    fn test_two_olds_into_one_new_is_a_merge() {
        let a = paragraph(0, 1, 3);
        let b = paragraph(1, 4, 6);
        let joined = paragraph(0, 1, 6);
        let old = vec![a.clone(), b.clone()];
        let new = vec![joined.clone()];
        let matches = vec![pair(&a, &joined), pair(&b, &joined)];

        let plan = classify(&old, &new, &matches);
        match &plan.steps[0] {
            Classification::Merge { olds, new } => {
                assert_eq!(olds.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec![a.id.as_str(), b.id.as_str()]);
                assert_eq!(new.id, joined.id);
            }
            other => panic!("expected a merge, got {:?}", other),
        }
        assert!(plan.orphans.is_empty());
    }

    #[test]
    fn test_unmatched_olds_are_orphans() {
        let kept = paragraph(0, 1, 3);
        let dropped = paragraph(1, 4, 6);
        let edited = paragraph(0, 1, 3);
        let old = vec![kept.clone(), dropped.clone()];
        let new = vec![edited.clone()];
        let matches = vec![pair(&kept, &edited)];

        let plan = classify(&old, &new, &matches);
        assert!(matches!(plan.steps[0], Classification::Commit { .. }));
        assert_eq!(plan.orphans.len(), 1);
        assert_eq!(plan.orphans[0].id, dropped.id);
        assert!(!plan.creates_lineages());
    }

    #[test]
    fn test_repeated_pairs_count_once() {
        let old_p = paragraph(0, 1, 3);
        let new_p = paragraph(0, 1, 3);
        let matches = vec![pair(&old_p, &new_p), pair(&old_p, &new_p)];
        let old = vec![old_p];
        let new = vec![new_p];

        let plan = classify(&old, &new, &matches);
        assert!(matches!(plan.steps[0], Classification::Commit { .. }));
    }

    #[test]
    fn test_empty_inputs() {
        let plan = classify(&[], &[], &[]);
        assert!(plan.steps.is_empty());
        assert!(plan.orphans.is_empty());
    }
}
