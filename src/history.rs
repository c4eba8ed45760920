// src/history.rs
//! Version history of paragraph lineages.
//!
//! Revisions of a lineage are linked through `previous_id`. Two revisions with
//! the same `previous_id` are competing branches; the history walks below
//! follow those links rather than timestamps wherever they can.

use std::collections::{HashMap, HashSet};

use log::{debug, info};

use crate::error::Result;
use crate::models::{ChapterRange, EntityKind, Paragraph};
use crate::paragraph_store::ParagraphStore;
use crate::revision_store::{ConflictScope, ReplicatedDocuments};
use crate::store::{Store, Transactional};

pub trait HistoryService: Transactional {
    /// Id of the current tip of `path_id` in the given book and chapter.
    fn most_recent_id(&self, book_id: &str, chapter: u32, path_id: &str) -> Result<Option<String>>;

    /// The revision `revision_id` was committed on top of.
    fn previous_version(&self, revision_id: &str) -> Result<Option<Paragraph>>;

    /// Every revision of `path_id`, oldest first when `go_forward`, newest first otherwise.
    fn history_of_path(&self, path_id: &str, go_forward: bool) -> Result<Vec<Paragraph>>;

    /// The newest revision every one of `revision_ids` descends from
    /// (a revision counts as its own ancestor).
    fn common_ancestor_of(&self, revision_ids: &[String]) -> Result<Option<Paragraph>>;

    /// Retire every revision of `path_id`. Returns how many revisions changed.
    fn deprecate_path(&self, path_id: &str) -> Result<usize>;

    /// Retire `from` and its ancestors, stopping before `until`.
    /// Returns how many revisions changed.
    fn deprecate_with_history(&self, from: &Paragraph, until: Option<&Paragraph>) -> Result<usize>;

    /// Whether the range holds document conflicts or lineages with competing tips.
    fn range_contains_conflicts(&self, book_id: &str, chapters: &ChapterRange) -> Result<bool>;

    /// Competing tips, grouped per lineage, for lineages with more than one.
    fn path_conflicts(&self, book_id: &str, chapters: &ChapterRange) -> Result<Vec<Vec<Paragraph>>>;
}

impl Store {
    /// `revision_id` followed by its ancestors, newest first.
    fn ancestry(&self, revision_id: &str) -> Result<Vec<Paragraph>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(revision_id.to_string());

        while let Some(id) = next.take() {
            if !seen.insert(id.clone()) {
                break;
            }
            if let Some(paragraph) = self.load_entity::<Paragraph>(&id)? {
                next = paragraph.previous_id.clone();
                chain.push(paragraph);
            }
        }
        Ok(chain)
    }

    fn retire(&self, paragraph: &Paragraph) -> Result<bool> {
        if paragraph.is_deprecated && !paragraph.is_most_recent {
            return Ok(false);
        }
        let mut retired = paragraph.clone();
        retired.is_deprecated = true;
        retired.is_most_recent = false;
        self.push_paragraph(&retired)?;
        Ok(true)
    }

    fn paragraphs_in(&self, book_id: &str, chapters: &ChapterRange) -> Result<Vec<Paragraph>> {
        self.load_current(
            EntityKind::Paragraph,
            "d.book_id = ?1 AND d.chapter BETWEEN ?2 AND ?3",
            &[&book_id, chapters.start(), chapters.end()],
        )
    }
}

/// Number of `previous_id` hops from `id` back to the start of its lineage.
fn depth(id: &str, by_id: &HashMap<&str, &Paragraph>) -> usize {
    let mut hops = 0;
    let mut current = by_id.get(id).and_then(|p| p.previous_id.as_deref());
    while let Some(previous) = current {
        if hops > by_id.len() {
            break;
        }
        hops += 1;
        current = by_id.get(previous).and_then(|p| p.previous_id.as_deref());
    }
    hops
}

impl HistoryService for Store {
    fn most_recent_id(&self, book_id: &str, chapter: u32, path_id: &str) -> Result<Option<String>> {
        let tip = self
            .revisions_of_path(path_id)?
            .into_iter()
            .filter(|p| p.book_id == book_id && p.chapter == chapter)
            .filter(|p| p.is_most_recent && !p.is_deprecated)
            .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(tip.map(|p| p.id))
    }

    fn previous_version(&self, revision_id: &str) -> Result<Option<Paragraph>> {
        let Some(paragraph) = self.load_entity::<Paragraph>(revision_id)? else {
            return Ok(None);
        };
        match paragraph.previous_id {
            Some(previous) => self.load_entity(&previous),
            None => Ok(None),
        }
    }

    fn history_of_path(&self, path_id: &str, go_forward: bool) -> Result<Vec<Paragraph>> {
        let revisions = self.revisions_of_path(path_id)?;
        let depths: HashMap<String, usize> = {
            let by_id: HashMap<&str, &Paragraph> =
                revisions.iter().map(|p| (p.id.as_str(), p)).collect();
            revisions
                .iter()
                .map(|p| (p.id.clone(), depth(&p.id, &by_id)))
                .collect()
        };

        let mut history = revisions;
        history.sort_by(|a, b| {
            depths[&a.id]
                .cmp(&depths[&b.id])
                .then_with(|| a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        if !go_forward {
            history.reverse();
        }
        Ok(history)
    }

    fn common_ancestor_of(&self, revision_ids: &[String]) -> Result<Option<Paragraph>> {
        let Some((first, rest)) = revision_ids.split_first() else {
            return Ok(None);
        };

        let mut others = Vec::with_capacity(rest.len());
        for id in rest {
            let ids: HashSet<String> = self.ancestry(id)?.into_iter().map(|p| p.id).collect();
            others.push(ids);
        }

        let ancestor = self
            .ancestry(first)?
            .into_iter()
            .find(|candidate| others.iter().all(|chain| chain.contains(&candidate.id)));
        Ok(ancestor)
    }

    fn deprecate_path(&self, path_id: &str) -> Result<usize> {
        let mut changed = 0;
        for revision in self.revisions_of_path(path_id)? {
            if self.retire(&revision)? {
                changed += 1;
            }
        }
        debug!("deprecated {} revisions of {}", changed, path_id);
        Ok(changed)
    }

    fn deprecate_with_history(&self, from: &Paragraph, until: Option<&Paragraph>) -> Result<usize> {
        let stop = until.map(|p| p.id.as_str());
        let mut changed = 0;
        for revision in self.ancestry(&from.id)? {
            if Some(revision.id.as_str()) == stop {
                break;
            }
            if self.retire(&revision)? {
                changed += 1;
            }
        }
        info!("deprecated {} revisions from {}", changed, from.id);
        Ok(changed)
    }

    fn range_contains_conflicts(&self, book_id: &str, chapters: &ChapterRange) -> Result<bool> {
        let scope = ConflictScope::chapters(book_id, chapters.clone());
        if !self.all_conflicting_documents(&scope)?.is_empty() {
            return Ok(true);
        }
        Ok(!self.path_conflicts(book_id, chapters)?.is_empty())
    }

    fn path_conflicts(&self, book_id: &str, chapters: &ChapterRange) -> Result<Vec<Vec<Paragraph>>> {
        let mut tips: HashMap<String, Vec<Paragraph>> = HashMap::new();
        for paragraph in self.paragraphs_in(book_id, chapters)? {
            if paragraph.is_most_recent && !paragraph.is_deprecated {
                tips.entry(paragraph.path_id.clone()).or_default().push(paragraph);
            }
        }

        let mut conflicts: Vec<Vec<Paragraph>> = tips
            .into_values()
            .filter(|competing| competing.len() > 1)
            .map(|mut competing| {
                competing.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
                competing
            })
            .collect();
        conflicts.sort_by(|a, b| a[0].path_id.cmp(&b[0].path_id));
        Ok(conflicts)
    }
}
