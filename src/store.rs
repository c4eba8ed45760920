// src/store.rs
//! SQLite-backed store implementing every collaborator trait of the crate.
//!
//! Paragraphs, bindings and annotation threads are all kept as replicated
//! documents (see [`crate::revision_store`]); books and annotation collections
//! live in plain catalog tables.

use std::fs;
use std::path::Path;

use log::{debug, error, warn};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::{MissingChapterPolicy, Settings};
use crate::db_utils::ensure_schema;
use crate::error::Result;
use crate::models::EntityKind;
use crate::revision_store::{DocumentRevision, IS_LEAF};

const DEFAULT_CREATOR: &str = "local";

/// Atomic execution of a group of writes.
pub trait Transactional {
    /// Run `body` so that either every write it makes is kept or none is.
    /// Transactions nest.
    fn run_transaction(&self, body: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

pub struct Store {
    conn: Connection,
    creator_id: String,
    missing_chapters: MissingChapterPolicy,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Open the configured database, writing revisions as the configured
    /// creator and aligning under the configured missing-chapter policy.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::open(settings.database_path()?)?
            .with_creator(&settings.creator_id)
            .with_missing_chapters(settings.missing_chapters))
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        ensure_schema(&conn)?;
        Ok(Self {
            conn,
            creator_id: DEFAULT_CREATOR.to_string(),
            missing_chapters: MissingChapterPolicy::default(),
        })
    }

    pub fn with_creator(mut self, creator_id: &str) -> Self {
        self.creator_id = creator_id.to_string();
        self
    }

    pub fn with_missing_chapters(mut self, policy: MissingChapterPolicy) -> Self {
        self.missing_chapters = policy;
        self
    }

    pub fn creator_id(&self) -> &str {
        &self.creator_id
    }

    pub fn missing_chapters(&self) -> MissingChapterPolicy {
        self.missing_chapters
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Add or replace a book in the catalog.
    pub fn register_book(&self, book_id: &str, project_id: &str, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO books (book_id, project_id, name) VALUES (?1, ?2, ?3)",
            params![book_id, project_id, name],
        )?;
        Ok(())
    }

    pub fn book_name(&self, book_id: &str) -> Result<Option<String>> {
        let name = self
            .conn
            .query_row(
                "SELECT name FROM books WHERE book_id = ?1",
                params![book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    pub(crate) fn book_project(&self, book_id: &str) -> Result<Option<String>> {
        let project = self
            .conn
            .query_row(
                "SELECT project_id FROM books WHERE book_id = ?1",
                params![book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(project)
    }

    /// Attach an annotation collection to a book.
    pub fn register_collection(&self, collection_id: &str, book_id: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO annotation_collections (collection_id, book_id) VALUES (?1, ?2)",
            params![collection_id, book_id],
        )?;
        Ok(())
    }

    /// Write `entity` as a new revision of `doc_id`, on top of its current revision.
    pub(crate) fn save_entity<T: Serialize>(
        &self,
        doc_id: &str,
        kind: EntityKind,
        entity: &T,
    ) -> Result<DocumentRevision> {
        let mut properties = serde_json::to_value(entity)?;
        if let Value::Object(map) = &mut properties {
            map.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        }

        let parent = self.current_revision(doc_id)?;
        let revision = DocumentRevision::child(doc_id, parent.as_ref(), properties, false);
        self.insert_revision(&revision)?;
        debug!("saved {} {} at {}", kind, doc_id, revision.rev_id);
        Ok(revision)
    }

    /// Current body of `doc_id`, or `None` when it does not exist or is deleted.
    pub(crate) fn load_entity<T: DeserializeOwned>(&self, doc_id: &str) -> Result<Option<T>> {
        match self.current_revision(doc_id)? {
            Some(revision) if !revision.deleted => Ok(Some(serde_json::from_value(revision.properties)?)),
            _ => Ok(None),
        }
    }

    /// Current bodies of every `kind` document with a live revision matching
    /// `filter` (an SQL condition over alias `d`). Undecodable bodies are skipped.
    pub(crate) fn load_current<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        filter: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<T>> {
        let sql = format!(
            "SELECT DISTINCT d.doc_id FROM documents d
             WHERE d.doc_type = '{}' AND d.deleted = 0 AND {} AND ({})
             ORDER BY d.doc_id",
            kind.as_str(),
            IS_LEAF,
            filter
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let doc_ids = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut entities = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            let Some(revision) = self.current_revision(&doc_id)? else {
                continue;
            };
            if revision.deleted {
                continue;
            }
            match serde_json::from_value(revision.properties) {
                Ok(entity) => entities.push(entity),
                Err(e) => warn!("skipping unreadable {} {}: {}", kind, doc_id, e),
            }
        }
        Ok(entities)
    }
}

impl Transactional for Store {
    fn run_transaction(&self, body: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.conn.execute_batch("SAVEPOINT lectern_tx")?;
        match body() {
            Ok(()) => {
                self.conn.execute_batch("RELEASE lectern_tx")?;
                Ok(())
            }
            Err(err) => {
                warn!("rolling back transaction: {}", err);
                if let Err(rollback) = self
                    .conn
                    .execute_batch("ROLLBACK TO lectern_tx; RELEASE lectern_tx")
                {
                    error!("rollback failed after '{}': {}", err, rollback);
                }
                Err(err)
            }
        }
    }
}
