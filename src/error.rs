// src/error.rs
use thiserror::Error;

/// Errors raised by the store collaborators and the reconciliation passes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    SettingsWrite(#[from] toml::ser::Error),

    #[error("could not determine the {0} directory")]
    NoDirectory(&'static str),

    #[error("document not found: {0}")]
    NotFound(String),

    #[error("unknown book: {0}")]
    UnknownBook(String),

    /// Chapters present on only one side of an alignment.
    #[error("chapters present on only one side: {0:?}")]
    MissingChapters(Vec<u32>),

    #[error("revisions share no common ancestor: {0:?}")]
    NoCommonAncestor(Vec<String>),

    #[error("merge policy failed: {0}")]
    Merge(String),
}

pub type Result<T> = std::result::Result<T, Error>;
