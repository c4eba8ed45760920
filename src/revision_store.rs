// src/revision_store.rs
//! Replicated document layer.
//!
//! Each document owns a tree of revisions. A revision id is
//! `<generation>-<digest>` where the digest covers the parent revision, the
//! deletion flag and the body, so replicas making the same edit agree on the id.
//! Leaves are revisions without children. The winning leaf (live before deleted,
//! then higher generation, then higher revision id) is the document's current
//! state; a document with more than one live leaf is in conflict.

use chrono::Utc;
use log::debug;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{ChapterRange, EntityKind, ALL_CHAPTERS};
use crate::store::{Store, Transactional};

/// SQL condition selecting leaf revisions of table alias `d`.
pub(crate) const IS_LEAF: &str =
    "NOT EXISTS (SELECT 1 FROM documents c WHERE c.doc_id = d.doc_id AND c.parent_rev = d.rev_id)";

const REVISION_COLUMNS: &str =
    "d.doc_id, d.rev_id, d.generation, d.parent_rev, d.doc_type, d.deleted, d.body";

/// One node of a document's revision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    pub doc_id: String,
    pub rev_id: String,
    pub generation: u32,
    pub parent_rev: Option<String>,
    /// The `type` property of the body.
    pub doc_type: Option<String>,
    pub deleted: bool,
    /// Raw body. `Null` when the stored body could not be parsed.
    pub properties: Value,
}

impl DocumentRevision {
    /// A new revision of `doc_id` on top of `parent` (or the first one).
    pub fn child(
        doc_id: &str,
        parent: Option<&DocumentRevision>,
        properties: Value,
        deleted: bool,
    ) -> Self {
        let generation = parent.map_or(1, |p| p.generation + 1);
        let parent_rev = parent.map(|p| p.rev_id.clone());

        let mut hasher = Sha256::new();
        hasher.update(parent_rev.as_deref().unwrap_or("").as_bytes());
        hasher.update([deleted as u8]);
        hasher.update(properties.to_string().as_bytes());
        let digest: String = hasher
            .finalize()
            .iter()
            .take(16)
            .map(|b| format!("{:02x}", b))
            .collect();

        let doc_type = properties
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned);

        Self {
            doc_id: doc_id.to_string(),
            rev_id: format!("{}-{}", generation, digest),
            generation,
            parent_rev,
            doc_type,
            deleted,
            properties,
        }
    }

    pub fn kind(&self) -> Option<EntityKind> {
        self.doc_type.as_deref().and_then(EntityKind::parse)
    }
}

/// Sibling leaves of one document that are all live at once. The first
/// sibling is the one the store currently selects.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSet {
    pub doc_id: String,
    pub siblings: Vec<DocumentRevision>,
}

impl ConflictSet {
    /// Type discriminator of the document.
    pub fn doc_type(&self) -> Option<&str> {
        self.siblings.iter().find_map(|r| r.doc_type.as_deref())
    }

    pub fn keeper(&self) -> Option<&DocumentRevision> {
        self.siblings.first()
    }

    /// Every sibling except the keeper.
    pub fn losers(&self) -> impl Iterator<Item = &DocumentRevision> {
        self.siblings.iter().skip(1)
    }

    pub fn representations(&self) -> Vec<Value> {
        self.siblings.iter().map(|r| r.properties.clone()).collect()
    }
}

/// Which documents a conflict scan looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictScope {
    All,
    /// Documents of one book whose chapter (if they have one) is in range.
    /// Bindings match on either of their books.
    Book { book_id: String, chapters: ChapterRange },
}

impl ConflictScope {
    pub fn book(book_id: &str) -> Self {
        Self::chapters(book_id, ALL_CHAPTERS)
    }

    pub fn chapters(book_id: &str, chapters: ChapterRange) -> Self {
        ConflictScope::Book {
            book_id: book_id.to_string(),
            chapters,
        }
    }
}

/// Conflict access to the replicated document store.
pub trait ReplicatedDocuments: Transactional {
    /// Every document in `scope` holding more than one live leaf.
    fn all_conflicting_documents(&self, scope: &ConflictScope) -> Result<Vec<ConflictSet>>;

    /// Store `merged` as a new revision on top of `keeper`.
    fn write_merged_revision(
        &self,
        set: &ConflictSet,
        keeper: &DocumentRevision,
        merged: &Value,
    ) -> Result<DocumentRevision>;

    /// Close `revision` with a deletion revision; its history stays.
    fn mark_as_deletion(&self, revision: &DocumentRevision) -> Result<DocumentRevision>;
}

/// Columns copied out of a body so documents can be found by book, chapter,
/// path or collection.
#[derive(Debug, Default)]
struct IndexColumns {
    book_id: Option<String>,
    peer_book_id: Option<String>,
    chapter: Option<u32>,
    path_id: Option<String>,
    collection_id: Option<String>,
}

impl IndexColumns {
    fn extract(revision: &DocumentRevision) -> Self {
        let properties = &revision.properties;
        let text = |key: &str| properties.get(key).and_then(Value::as_str).map(str::to_owned);
        let chapter = properties
            .get("chapter")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        match revision.kind() {
            Some(EntityKind::Paragraph) => Self {
                book_id: text("book_id"),
                chapter,
                path_id: text("path_id"),
                ..Self::default()
            },
            Some(EntityKind::ParagraphBinding) => Self {
                book_id: text("source_book_id"),
                peer_book_id: text("target_book_id"),
                ..Self::default()
            },
            Some(EntityKind::AnnotationThread) => Self {
                book_id: text("book_id"),
                chapter,
                path_id: text("path_id"),
                collection_id: text("collection_id"),
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

fn map_revision(row: &Row) -> rusqlite::Result<DocumentRevision> {
    let body: String = row.get(6)?;
    let properties = serde_json::from_str(&body).unwrap_or(Value::Null);

    Ok(DocumentRevision {
        doc_id: row.get(0)?,
        rev_id: row.get(1)?,
        generation: row.get(2)?,
        parent_rev: row.get(3)?,
        doc_type: row.get(4)?,
        deleted: row.get(5)?,
        properties,
    })
}

impl Store {
    /// Insert a revision as-is. Revisions already present are ignored; returns
    /// whether the row was new.
    pub(crate) fn insert_revision(&self, revision: &DocumentRevision) -> Result<bool> {
        let columns = IndexColumns::extract(revision);
        let body = serde_json::to_string(&revision.properties)?;

        let inserted = self.connection().execute(
            r#"
            INSERT OR IGNORE INTO documents
            (doc_id, rev_id, generation, parent_rev, doc_type, deleted, body,
             book_id, peer_book_id, chapter, path_id, collection_id, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                revision.doc_id,
                revision.rev_id,
                revision.generation,
                revision.parent_rev,
                revision.doc_type,
                revision.deleted,
                body,
                columns.book_id,
                columns.peer_book_id,
                columns.chapter,
                columns.path_id,
                columns.collection_id,
                Utc::now().timestamp_millis(),
            ],
        )?;

        Ok(inserted > 0)
    }

    /// Accept a revision produced by another replica, keeping its id and parent.
    pub fn put_replicated_revision(&self, revision: &DocumentRevision) -> Result<bool> {
        let inserted = self.insert_revision(revision)?;
        if inserted {
            debug!("replicated {} {}", revision.doc_id, revision.rev_id);
        }
        Ok(inserted)
    }

    /// Leaves of `doc_id`, winner first.
    pub fn leaves(&self, doc_id: &str) -> Result<Vec<DocumentRevision>> {
        let sql = format!(
            "SELECT {} FROM documents d WHERE d.doc_id = ?1 AND {}
             ORDER BY d.deleted ASC, d.generation DESC, d.rev_id DESC",
            REVISION_COLUMNS, IS_LEAF
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let leaves = stmt
            .query_map(params![doc_id], map_revision)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(leaves)
    }

    /// The winning leaf of `doc_id`; it may be a deletion.
    pub fn current_revision(&self, doc_id: &str) -> Result<Option<DocumentRevision>> {
        Ok(self.leaves(doc_id)?.into_iter().next())
    }

    /// Every revision of `doc_id`, oldest generation first.
    pub fn revisions(&self, doc_id: &str) -> Result<Vec<DocumentRevision>> {
        let sql = format!(
            "SELECT {} FROM documents d WHERE d.doc_id = ?1 ORDER BY d.generation ASC, d.rev_id ASC",
            REVISION_COLUMNS
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let revisions = stmt
            .query_map(params![doc_id], map_revision)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(revisions)
    }

    fn conflicting_doc_ids(&self, scope: &ConflictScope) -> Result<Vec<String>> {
        let (book_id, first, last) = match scope {
            ConflictScope::All => (None, 0, 0),
            ConflictScope::Book { book_id, chapters } => {
                (Some(book_id.as_str()), *chapters.start(), *chapters.end())
            }
        };

        let sql = format!(
            r#"
            SELECT d.doc_id FROM documents d
            WHERE d.deleted = 0 AND {}
            GROUP BY d.doc_id
            HAVING COUNT(*) > 1
               AND (?1 IS NULL OR SUM(CASE
                        WHEN (d.book_id = ?1 OR d.peer_book_id = ?1)
                         AND (d.chapter IS NULL OR d.chapter BETWEEN ?2 AND ?3)
                        THEN 1 ELSE 0 END) > 0)
            ORDER BY d.doc_id
            "#,
            IS_LEAF
        );
        let mut stmt = self.connection().prepare(&sql)?;
        let doc_ids = stmt
            .query_map(params![book_id, first, last], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(doc_ids)
    }
}

impl ReplicatedDocuments for Store {
    fn all_conflicting_documents(&self, scope: &ConflictScope) -> Result<Vec<ConflictSet>> {
        let mut sets = Vec::new();
        for doc_id in self.conflicting_doc_ids(scope)? {
            let siblings: Vec<DocumentRevision> = self
                .leaves(&doc_id)?
                .into_iter()
                .filter(|r| !r.deleted)
                .collect();
            sets.push(ConflictSet { doc_id, siblings });
        }
        Ok(sets)
    }

    fn write_merged_revision(
        &self,
        set: &ConflictSet,
        keeper: &DocumentRevision,
        merged: &Value,
    ) -> Result<DocumentRevision> {
        if keeper.doc_id != set.doc_id || !set.siblings.iter().any(|r| r.rev_id == keeper.rev_id) {
            return Err(Error::Merge(format!(
                "revision {} is not part of the conflict on {}",
                keeper.rev_id, set.doc_id
            )));
        }

        let mut properties = merged.clone();
        if let (Value::Object(map), Some(doc_type)) = (&mut properties, set.doc_type()) {
            map.insert("type".to_string(), Value::String(doc_type.to_string()));
        }

        let revision = DocumentRevision::child(&set.doc_id, Some(keeper), properties, false);
        self.insert_revision(&revision)?;
        Ok(revision)
    }

    fn mark_as_deletion(&self, revision: &DocumentRevision) -> Result<DocumentRevision> {
        let properties = match &revision.doc_type {
            Some(doc_type) => json!({ "type": doc_type }),
            None => json!({}),
        };
        let deletion = DocumentRevision::child(&revision.doc_id, Some(revision), properties, true);
        self.insert_revision(&deletion)?;
        Ok(deletion)
    }
}
