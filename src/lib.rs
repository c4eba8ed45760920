//! Reconciliation core of a replicated, offline-first translation editor:
//! paragraph alignment, classification of incoming paragraphs into history
//! mutations, and automatic and manual resolution of replication conflicts.

pub mod annotations;
pub mod bindings;
pub mod committer;
pub mod config;
pub mod conflict_merger;
pub mod db_utils;
pub mod error;
pub mod history;
pub mod manual_resolution;
pub mod matcher;
pub mod merge_policies;
pub mod models;
pub mod paragraph_store;
pub mod revision_store;
pub mod store;

pub use annotations::AnnotationStore;
pub use bindings::BindingStore;
pub use committer::{classify, Classification, Committer, OverwriteReport};
pub use config::{MissingChapterPolicy, Settings};
pub use conflict_merger::{ConflictMerger, MergeReport, SkipReason};
pub use error::{Error, Result};
pub use history::HistoryService;
pub use manual_resolution::{resolve_path_conflict, ManualResolution};
pub use matcher::{align, Alignment, Matcher};
pub use merge_policies::MergeRegistry;
pub use paragraph_store::ParagraphStore;
pub use revision_store::{ConflictScope, ConflictSet, DocumentRevision, ReplicatedDocuments};
pub use store::{Store, Transactional};
