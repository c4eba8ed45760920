// src/paragraph_store.rs
use log::{debug, info};
use rusqlite::params;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{now, ChapterRange, EntityKind, Paragraph, ParagraphContent};
use crate::store::{Store, Transactional};

/// Paragraph revisions of every book.
pub trait ParagraphStore: Transactional {
    /// Current tips of every live lineage of `book_id` within `chapters`,
    /// ordered by chapter, section and index.
    fn get_latest(&self, book_id: &str, chapters: &ChapterRange) -> Result<Vec<Paragraph>>;

    /// A paragraph by revision id, or the current tip of a lineage by path id.
    fn get(&self, id: &str) -> Result<Option<Paragraph>>;

    /// Store `paragraph` as is: a new lineage, or a new state of an existing revision.
    fn push_paragraph(&self, paragraph: &Paragraph) -> Result<()>;

    /// Add a revision on top of `existing`, keeping its lineage.
    fn commit(
        &self,
        existing: &Paragraph,
        chapter: u32,
        section: u32,
        index: u32,
        content: ParagraphContent,
    ) -> Result<Paragraph>;

    fn rename_book(&self, book_id: &str, name: &str) -> Result<()>;
}

impl Store {
    /// Every stored revision of `path_id`, whatever its flags.
    pub(crate) fn revisions_of_path(&self, path_id: &str) -> Result<Vec<Paragraph>> {
        self.load_current(EntityKind::Paragraph, "d.path_id = ?1", &[&path_id])
    }
}

impl ParagraphStore for Store {
    fn get_latest(&self, book_id: &str, chapters: &ChapterRange) -> Result<Vec<Paragraph>> {
        let mut paragraphs: Vec<Paragraph> = self
            .load_current(
                EntityKind::Paragraph,
                "d.book_id = ?1 AND d.chapter BETWEEN ?2 AND ?3",
                &[&book_id, chapters.start(), chapters.end()],
            )?
            .into_iter()
            .filter(|p: &Paragraph| p.is_most_recent && !p.is_deprecated)
            .collect();

        paragraphs.sort_by(|a, b| {
            a.position()
                .cmp(&b.position())
                .then_with(|| a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(paragraphs)
    }

    fn get(&self, id: &str) -> Result<Option<Paragraph>> {
        if let Some(paragraph) = self.load_entity::<Paragraph>(id)? {
            return Ok(Some(paragraph));
        }

        let mut revisions = self.revisions_of_path(id)?;
        revisions.sort_by(|a, b| {
            (a.is_most_recent && !a.is_deprecated, a.created, &a.id)
                .cmp(&(b.is_most_recent && !b.is_deprecated, b.created, &b.id))
        });
        Ok(revisions.pop())
    }

    fn push_paragraph(&self, paragraph: &Paragraph) -> Result<()> {
        self.save_entity(&paragraph.id, EntityKind::Paragraph, paragraph)?;
        Ok(())
    }

    fn commit(
        &self,
        existing: &Paragraph,
        chapter: u32,
        section: u32,
        index: u32,
        content: ParagraphContent,
    ) -> Result<Paragraph> {
        let mut previous = self
            .load_entity::<Paragraph>(&existing.id)?
            .ok_or_else(|| Error::NotFound(existing.id.clone()))?;

        let next = Paragraph {
            id: Uuid::new_v4().to_string(),
            path_id: previous.path_id.clone(),
            book_id: previous.book_id.clone(),
            chapter,
            section,
            index,
            content,
            creator_id: self.creator_id().to_string(),
            created: now(),
            previous_id: Some(previous.id.clone()),
            is_most_recent: true,
            is_deprecated: false,
        };

        previous.is_most_recent = false;
        self.push_paragraph(&previous)?;
        self.push_paragraph(&next)?;
        debug!("committed {} on {} after {}", next.id, next.path_id, previous.id);
        Ok(next)
    }

    fn rename_book(&self, book_id: &str, name: &str) -> Result<()> {
        let updated = self.connection().execute(
            "UPDATE books SET name = ?1 WHERE book_id = ?2",
            params![name, book_id],
        )?;
        if updated == 0 {
            return Err(Error::UnknownBook(book_id.to_string()));
        }
        info!("renamed book {} to '{}'", book_id, name);
        Ok(())
    }
}
