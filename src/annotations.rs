// src/annotations.rs
//! Annotation threads.
//!
//! A thread hangs off a paragraph lineage (not a single revision), so it keeps
//! its place while the paragraph is edited. Threads are grouped in collections,
//! each attached to one book.

use log::debug;
use rusqlite::params;

use crate::error::{Error, Result};
use crate::models::{AnnotationThread, EntityKind, Note};
use crate::store::{Store, Transactional};

pub trait AnnotationStore: Transactional {
    /// Ids of the annotation collections attached to `book_id`.
    fn collections_for_book(&self, book_id: &str) -> Result<Vec<String>>;

    fn threads_for_paragraph(
        &self,
        collection_id: &str,
        chapter: u32,
        path_id: &str,
    ) -> Result<Vec<AnnotationThread>>;

    fn push_thread(&self, thread: &AnnotationThread) -> Result<()>;

    /// Append `note` to a thread and return the updated thread.
    fn add_note(&self, thread_id: &str, note: Note) -> Result<AnnotationThread>;
}

impl Store {
    /// Mark a thread resolved or reopen it.
    pub fn set_thread_resolved(&self, thread_id: &str, resolved: bool) -> Result<AnnotationThread> {
        let mut thread = self.thread(thread_id)?;
        thread.resolved = resolved;
        self.push_thread(&thread)?;
        Ok(thread)
    }

    fn thread(&self, thread_id: &str) -> Result<AnnotationThread> {
        self.load_entity(thread_id)?
            .ok_or_else(|| Error::NotFound(format!("annotation thread {}", thread_id)))
    }
}

impl AnnotationStore for Store {
    fn collections_for_book(&self, book_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT collection_id FROM annotation_collections WHERE book_id = ?1 ORDER BY collection_id",
        )?;
        let collections = stmt
            .query_map(params![book_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(collections)
    }

    fn threads_for_paragraph(
        &self,
        collection_id: &str,
        chapter: u32,
        path_id: &str,
    ) -> Result<Vec<AnnotationThread>> {
        let mut threads: Vec<AnnotationThread> = self.load_current(
            EntityKind::AnnotationThread,
            "d.collection_id = ?1 AND d.chapter = ?2 AND d.path_id = ?3",
            &[&collection_id, &chapter, &path_id],
        )?;
        threads.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(threads)
    }

    fn push_thread(&self, thread: &AnnotationThread) -> Result<()> {
        self.save_entity(&thread.id, EntityKind::AnnotationThread, thread)?;
        debug!("stored thread {} on {}", thread.id, thread.path_id);
        Ok(())
    }

    fn add_note(&self, thread_id: &str, note: Note) -> Result<AnnotationThread> {
        let mut thread = self.thread(thread_id)?;
        thread.notes.push(note);
        self.push_thread(&thread)?;
        Ok(thread)
    }
}
