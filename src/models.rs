// src/models.rs
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive range of chapter indices.
pub type ChapterRange = RangeInclusive<u32>;

/// Every chapter of a book.
pub const ALL_CHAPTERS: ChapterRange = 0..=u32::MAX;

/// Current time at the millisecond precision documents are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// A verse position. `part` distinguishes mid-verse boundaries (3a, 3b, ...);
/// part 0 is the start of the verse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VerseRef {
    pub verse: u32,
    #[serde(default)]
    pub part: u8,
}

impl VerseRef {
    pub fn new(verse: u32) -> Self {
        Self { verse, part: 0 }
    }

    pub fn mid(verse: u32, part: u8) -> Self {
        Self { verse, part }
    }
}

/// Verses covered by a paragraph: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerseRange {
    pub start: VerseRef,
    pub end: VerseRef,
}

impl VerseRange {
    pub fn new(start: VerseRef, end: VerseRef) -> Self {
        Self { start, end }
    }

    /// Whole verses `first..=last`.
    pub fn verses(first: u32, last: u32) -> Self {
        Self {
            start: VerseRef::new(first),
            end: VerseRef::new(last.saturating_add(1)),
        }
    }

    pub fn overlaps(&self, other: &VerseRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A run of text sharing one style (e.g. "p", "q1", "wj").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphContent {
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verses: Option<VerseRange>,
}

impl ParagraphContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment {
                text: text.into(),
                style: None,
            }],
            verses: None,
        }
    }

    pub fn with_verses(mut self, verses: VerseRange) -> Self {
        self.verses = Some(verses);
        self
    }

    /// Concatenated text of all segments, styles dropped.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

/// One revision of a translatable paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    /// Revision id; also the id of the backing document.
    pub id: String,
    /// Lineage key shared by every revision of this paragraph.
    pub path_id: String,
    pub book_id: String,
    pub chapter: u32,
    pub section: u32,
    pub index: u32,
    pub content: ParagraphContent,
    pub creator_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    /// Revision this one was committed on top of.
    #[serde(default)]
    pub previous_id: Option<String>,
    pub is_most_recent: bool,
    #[serde(default)]
    pub is_deprecated: bool,
}

impl Paragraph {
    /// First revision of a brand-new lineage.
    pub fn new_lineage(
        book_id: &str,
        chapter: u32,
        section: u32,
        index: u32,
        content: ParagraphContent,
        creator_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path_id: derive_path_id(book_id, chapter, section, index),
            book_id: book_id.to_string(),
            chapter,
            section,
            index,
            content,
            creator_id: creator_id.to_string(),
            created: now(),
            previous_id: None,
            is_most_recent: true,
            is_deprecated: false,
        }
    }

    pub fn verses(&self) -> Option<VerseRange> {
        self.content.verses
    }

    /// Chapter, section and index, for ordering within a book.
    pub fn position(&self) -> (u32, u32, u32) {
        (self.chapter, self.section, self.index)
    }
}

/// Path ids start with the position the lineage was created at; the suffix keeps
/// lineages created at the same position apart.
pub fn derive_path_id(book_id: &str, chapter: u32, section: u32, index: u32) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}.{}.{}.{}-{}", book_id, chapter, section, index, &suffix[..12])
}

/// A source paragraph aligned with a target paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphPair {
    pub source: Paragraph,
    pub target: Paragraph,
}

impl ParagraphPair {
    pub fn new(source: Paragraph, target: Paragraph) -> Self {
        Self { source, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathPair {
    pub source_path_id: String,
    pub target_path_id: String,
}

impl From<&ParagraphPair> for PathPair {
    fn from(pair: &ParagraphPair) -> Self {
        Self {
            source_path_id: pair.source.path_id.clone(),
            target_path_id: pair.target.path_id.clone(),
        }
    }
}

/// Persisted alignment between a source book and a target book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphBinding {
    pub id: String,
    pub source_book_id: String,
    pub target_book_id: String,
    pub bindings: Vec<PathPair>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    pub creator_id: String,
}

impl ParagraphBinding {
    pub fn new(source_book_id: &str, target_book_id: &str, creator_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_book_id: source_book_id.to_string(),
            target_book_id: target_book_id.to_string(),
            bindings: Vec::new(),
            created: now(),
            creator_id: creator_id.to_string(),
        }
    }

    /// The book on the other end of the binding, seen from `book_id`.
    pub fn other_side(&self, book_id: &str) -> &str {
        if self.source_book_id == book_id {
            &self.target_book_id
        } else {
            &self.source_book_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub author_id: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
}

impl Note {
    pub fn new(author_id: &str, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: author_id.to_string(),
            text: text.into(),
            created: now(),
        }
    }
}

/// A note thread anchored to a paragraph lineage within one annotation collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationThread {
    pub id: String,
    pub collection_id: String,
    pub book_id: String,
    pub chapter: u32,
    pub path_id: String,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    pub creator_id: String,
}

impl AnnotationThread {
    /// Empty thread created alongside a newly inserted paragraph.
    pub fn placeholder(
        collection_id: &str,
        book_id: &str,
        chapter: u32,
        path_id: &str,
        creator_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            collection_id: collection_id.to_string(),
            book_id: book_id.to_string(),
            chapter,
            path_id: path_id.to_string(),
            notes: Vec::new(),
            resolved: false,
            created: now(),
            creator_id: creator_id.to_string(),
        }
    }
}

/// Entity kinds stored in the replicated document layer. The string form is the
/// `type` property carried by every document body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Paragraph,
    ParagraphBinding,
    AnnotationThread,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Paragraph,
        EntityKind::ParagraphBinding,
        EntityKind::AnnotationThread,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Paragraph => "paragraph",
            EntityKind::ParagraphBinding => "paragraph_binding",
            EntityKind::AnnotationThread => "annotation_thread",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
