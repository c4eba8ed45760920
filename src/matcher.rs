// src/matcher.rs
//! Paragraph alignment between two versions of a book.
//!
//! Alignment is done per chapter. Paragraphs carrying a verse range are paired
//! by range overlap, the first and last paragraphs of each side are anchored to
//! each other, and whatever is left between two matches is resolved by a
//! [`GapPolicy`]. The result is a heuristic, not a minimal edit script: a
//! paragraph may appear in several pairs.

use std::collections::BTreeMap;
use std::ops::Range;

use log::{debug, warn};

use crate::config::MissingChapterPolicy;
use crate::error::{Error, Result};
use crate::models::{Paragraph, ParagraphPair};

/// A run of unmatched indices on one side, lying between two consecutive matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Unmatched indices on the side being filled.
    pub own: Range<usize>,
    /// Unmatched indices on the opposite side between the same two matches.
    pub opposite: Range<usize>,
    /// Opposite-side index of the match right before the gap.
    pub preceding: usize,
}

/// Turns a gap into `(own, opposite)` index pairs.
pub type GapPolicy = fn(&Gap) -> Vec<(usize, usize)>;

/// Pairs a gap one-to-one with an equally sized opposite gap; otherwise every
/// index in the gap repeats the preceding match.
pub fn left_fallback(gap: &Gap) -> Vec<(usize, usize)> {
    if gap.own.len() == gap.opposite.len() {
        gap.own.clone().zip(gap.opposite.clone()).collect()
    } else {
        gap.own.clone().map(|i| (i, gap.preceding)).collect()
    }
}

/// Outcome of aligning two sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alignment {
    pub pairs: Vec<ParagraphPair>,
    /// Chapters found on only one side; none of their paragraphs are paired.
    pub skipped_chapters: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    gap_policy: GapPolicy,
    missing_chapters: MissingChapterPolicy,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            gap_policy: left_fallback,
            missing_chapters: MissingChapterPolicy::Skip,
        }
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    pub fn with_missing_chapters(mut self, policy: MissingChapterPolicy) -> Self {
        self.missing_chapters = policy;
        self
    }

    pub fn missing_chapters(&self) -> MissingChapterPolicy {
        self.missing_chapters
    }

    /// Align `sources` with `targets`. Never fails; chapters present on one side
    /// only are reported in [`Alignment::skipped_chapters`].
    pub fn align(&self, sources: &[Paragraph], targets: &[Paragraph]) -> Alignment {
        let mut alignment = Alignment::default();
        if sources.is_empty() || targets.is_empty() {
            return alignment;
        }

        let source_chapters = by_chapter(sources);
        let target_chapters = by_chapter(targets);

        for (chapter, source_run) in &source_chapters {
            let Some(target_run) = target_chapters.get(chapter) else {
                warn!("chapter {} is missing from the target side, skipping it", chapter);
                alignment.skipped_chapters.push(*chapter);
                continue;
            };

            let matches = self.align_chapter(source_run, target_run);
            debug!(
                "chapter {}: {} sources, {} targets, {} pairs",
                chapter,
                source_run.len(),
                target_run.len(),
                matches.len()
            );
            alignment.pairs.extend(matches.into_iter().map(|(s, t)| {
                ParagraphPair::new(source_run[s].clone(), target_run[t].clone())
            }));
        }

        for chapter in target_chapters.keys() {
            if !source_chapters.contains_key(chapter) {
                warn!("chapter {} is missing from the source side, skipping it", chapter);
                alignment.skipped_chapters.push(*chapter);
            }
        }
        alignment.skipped_chapters.sort_unstable();

        alignment
    }

    /// Like [`Matcher::align`], but fails when chapters were skipped and the
    /// matcher is configured with [`MissingChapterPolicy::Error`].
    pub fn align_checked(
        &self,
        sources: &[Paragraph],
        targets: &[Paragraph],
    ) -> Result<Vec<ParagraphPair>> {
        let alignment = self.align(sources, targets);
        if self.missing_chapters == MissingChapterPolicy::Error
            && !alignment.skipped_chapters.is_empty()
        {
            return Err(Error::MissingChapters(alignment.skipped_chapters));
        }
        Ok(alignment.pairs)
    }

    /// Index pairs `(source, target)` for one chapter, sorted.
    fn align_chapter(&self, sources: &[&Paragraph], targets: &[&Paragraph]) -> Vec<(usize, usize)> {
        let mut matches = overlapping_ranges(sources, targets);
        enforce_anchors(&mut matches, sources.len(), targets.len());

        let matches = fill_gaps(matches, self.gap_policy);
        let swapped = matches.into_iter().map(|(s, t)| (t, s)).collect();
        let mut matches: Vec<(usize, usize)> = fill_gaps(swapped, self.gap_policy)
            .into_iter()
            .map(|(t, s)| (s, t))
            .collect();

        matches.sort_unstable();
        matches
    }
}

/// Align with the default matcher.
pub fn align(sources: &[Paragraph], targets: &[Paragraph]) -> Vec<ParagraphPair> {
    Matcher::default().align(sources, targets).pairs
}

fn by_chapter(paragraphs: &[Paragraph]) -> BTreeMap<u32, Vec<&Paragraph>> {
    let mut chapters: BTreeMap<u32, Vec<&Paragraph>> = BTreeMap::new();
    for paragraph in paragraphs {
        chapters.entry(paragraph.chapter).or_default().push(paragraph);
    }
    chapters
}

/// Every `(source, target)` whose verse ranges overlap. Targets are walked in
/// order; sources that end before the current target starts are never revisited.
fn overlapping_ranges(sources: &[&Paragraph], targets: &[&Paragraph]) -> Vec<(usize, usize)> {
    let mut matches = Vec::new();
    let mut first_open = 0;

    for (t, target) in targets.iter().enumerate() {
        let Some(target_range) = target.verses() else {
            continue;
        };

        while first_open < sources.len()
            && sources[first_open]
                .verses()
                .map_or(true, |range| range.end <= target_range.start)
        {
            first_open += 1;
        }

        for (s, source) in sources.iter().enumerate().skip(first_open) {
            let Some(source_range) = source.verses() else {
                continue;
            };
            if source_range.start >= target_range.end {
                break;
            }
            if source_range.overlaps(&target_range) {
                matches.push((s, t));
            }
        }
    }

    matches.sort_unstable();
    matches.dedup();
    matches
}

/// Guarantee both sequences are matched at their first and last index.
fn enforce_anchors(matches: &mut Vec<(usize, usize)>, sources: usize, targets: usize) {
    let (last_source, last_target) = (sources - 1, targets - 1);

    if matches.is_empty() {
        matches.push((0, 0));
        if sources > 1 || targets > 1 {
            matches.push((last_source, last_target));
        }
        return;
    }

    let starts_covered =
        matches.iter().any(|&(s, _)| s == 0) && matches.iter().any(|&(_, t)| t == 0);
    if !starts_covered {
        matches.push((0, 0));
    }

    let ends_covered = matches.iter().any(|&(s, _)| s == last_source)
        && matches.iter().any(|&(_, t)| t == last_target);
    if !ends_covered {
        matches.push((last_source, last_target));
    }

    matches.sort_unstable();
    matches.dedup();
}

/// Close every gap on the first coordinate of `matches`.
fn fill_gaps(mut matches: Vec<(usize, usize)>, policy: GapPolicy) -> Vec<(usize, usize)> {
    matches.sort_unstable();
    matches.dedup();

    let mut filled = Vec::with_capacity(matches.len());
    for window in matches.windows(2) {
        let (prev, next) = (window[0], window[1]);
        filled.push(prev);

        if next.0 > prev.0 + 1 {
            let gap = Gap {
                own: prev.0 + 1..next.0,
                opposite: prev.1 + 1..next.1.max(prev.1 + 1),
                preceding: prev.1,
            };
            filled.extend(policy(&gap));
        }
    }
    if let Some(&last) = matches.last() {
        filled.push(last);
    }

    filled.sort_unstable();
    filled.dedup();
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParagraphContent, VerseRange};

    fn para(id: &str, chapter: u32, verses: Option<(u32, u32)>) -> Paragraph {
        let mut content = ParagraphContent::plain(id);
        content.verses = verses.map(|(first, last)| VerseRange::verses(first, last));
        let mut paragraph = Paragraph::new_lineage("BK", chapter, 0, 0, content, "tester");
        paragraph.id = id.to_string();
        paragraph
    }

    fn ids(pairs: &[ParagraphPair]) -> Vec<(&str, &str)> {
        pairs
            .iter()
            .map(|p| (p.source.id.as_str(), p.target.id.as_str()))
            .collect()
    }

    #[test]
    fn test_left_fallback_equal_gaps_pair_one_to_one() {
        let gap = Gap { own: 2..4, opposite: 5..7, preceding: 4 };
        assert_eq!(left_fallback(&gap), vec![(2, 5), (3, 6)]);
    }

    #[test]
    fn test_left_fallback_uneven_gaps_repeat_preceding() {
        let gap = Gap { own: 2..4, opposite: 5..6, preceding: 4 };
        assert_eq!(left_fallback(&gap), vec![(2, 4), (3, 4)]);
    }

    #[test]
    fn test_no_ranges_forces_both_anchors() {
        let sources = vec![para("a", 1, None), para("b", 1, None), para("c", 1, None)];
        let targets = vec![para("x", 1, None), para("y", 1, None)];

        let pairs = align(&sources, &targets);

        // anchors 0-0 and 2-1; b falls back onto x
        assert_eq!(ids(&pairs), vec![("a", "x"), ("b", "x"), ("c", "y")]);
    }

    #[test]
    fn test_single_paragraphs_match_once() {
        let sources = vec![para("a", 1, None)];
        let targets = vec![para("x", 1, None)];
        assert_eq!(ids(&align(&sources, &targets)), vec![("a", "x")]);
    }

    #[test]
    fn test_unranged_heading_between_equal_gaps() {
        let sources = vec![para("a", 1, Some((1, 3))), para("h", 1, None), para("c", 1, Some((4, 6)))];
        let targets = vec![para("x", 1, Some((1, 3))), para("g", 1, None), para("z", 1, Some((4, 6)))];

        let pairs = align(&sources, &targets);
        assert_eq!(ids(&pairs), vec![("a", "x"), ("h", "g"), ("c", "z")]);
    }

    #[test]
    fn test_uneven_unranged_runs_use_left_fallback() {
        let sources = vec![
            para("a", 1, Some((1, 3))),
            para("b", 1, None),
            para("c", 1, None),
            para("d", 1, Some((7, 9))),
        ];
        let targets = vec![para("x", 1, Some((1, 3))), para("y", 1, None), para("z", 1, Some((7, 9)))];

        let pairs = align(&sources, &targets);
        assert_eq!(
            ids(&pairs),
            vec![("a", "x"), ("b", "x"), ("c", "x"), ("c", "y"), ("d", "z")]
        );
    }

    #[test]
    fn test_merge_scenario_many_to_one() {
        let sources = vec![para("a", 1, Some((1, 3))), para("b", 1, Some((4, 6)))];
        let targets = vec![para("x", 1, Some((1, 6)))];

        let pairs = align(&sources, &targets);
        assert_eq!(ids(&pairs), vec![("a", "x"), ("b", "x")]);
    }

    #[test]
    fn test_custom_gap_policy_is_used() {
        fn first_only(gap: &Gap) -> Vec<(usize, usize)> {
            gap.own.clone().map(|i| (i, gap.opposite.start.saturating_sub(1))).collect()
        }

        let sources = vec![para("a", 1, Some((1, 3))), para("h", 1, None), para("c", 1, Some((4, 6)))];
        let targets = vec![para("x", 1, Some((1, 3))), para("g", 1, None), para("z", 1, Some((4, 6)))];

        let pairs = Matcher::new().with_gap_policy(first_only).align(&sources, &targets).pairs;
        // h is forced onto x; the target-side pass then pairs g with h
        assert_eq!(ids(&pairs), vec![("a", "x"), ("h", "x"), ("h", "g"), ("c", "z")]);
    }

    #[test]
    fn test_missing_chapter_policy_error() {
        let sources = vec![para("a", 1, None), para("b", 2, None)];
        let targets = vec![para("x", 1, None)];

        let skip = Matcher::new().align_checked(&sources, &targets).unwrap();
        assert_eq!(ids(&skip), vec![("a", "x")]);

        let strict = Matcher::new()
            .with_missing_chapters(MissingChapterPolicy::Error)
            .align_checked(&sources, &targets);
        assert!(matches!(strict, Err(Error::MissingChapters(ref chapters)) if chapters == &vec![2]));
    }
}
