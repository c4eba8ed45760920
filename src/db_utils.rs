// src/db_utils.rs
use rusqlite::Connection;

use crate::error::Result;

/// Create the tables and indices used by the store. Safe to run on every open.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    // Every entity is a document with a revision tree. The columns after `body`
    // are copied out of the body when a revision is written so the store can
    // find candidates without parsing JSON.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_id        TEXT    NOT NULL,
            rev_id        TEXT    NOT NULL,
            generation    INTEGER NOT NULL,
            parent_rev    TEXT,
            doc_type      TEXT,
            deleted       INTEGER NOT NULL DEFAULT 0,
            body          TEXT    NOT NULL,
            book_id       TEXT,
            peer_book_id  TEXT,
            chapter       INTEGER,
            path_id       TEXT,
            collection_id TEXT,
            stored_at     INTEGER NOT NULL,
            PRIMARY KEY (doc_id, rev_id)
        );

        CREATE TABLE IF NOT EXISTS books (
            book_id     TEXT PRIMARY KEY,
            project_id  TEXT NOT NULL,
            name        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS annotation_collections (
            collection_id TEXT PRIMARY KEY,
            book_id       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(doc_id, parent_rev);
        CREATE INDEX IF NOT EXISTS idx_documents_book ON documents(book_id, chapter);
        CREATE INDEX IF NOT EXISTS idx_documents_peer_book ON documents(peer_book_id);
        CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path_id);
        CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type);
        CREATE INDEX IF NOT EXISTS idx_collections_book ON annotation_collections(book_id);
        "#,
    )?;

    Ok(())
}
