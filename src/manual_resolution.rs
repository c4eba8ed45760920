// src/manual_resolution.rs
use log::info;

use crate::error::{Error, Result};
use crate::history::HistoryService;
use crate::models::Paragraph;
use crate::paragraph_store::ParagraphStore;

#[derive(Debug, Clone, PartialEq)]
pub struct ManualResolution {
    /// The kept revision, again the tip of its lineage.
    pub kept: Paragraph,
    /// Newest revision shared by every branch; left untouched.
    pub ancestor: Paragraph,
    /// Number of revisions deprecated on the losing branches.
    pub deprecated: usize,
}

/// Keep `keep_id` among competing revisions of one lineage and retire the
/// other branches back to their common ancestor.
///
/// Fails with [`Error::NoCommonAncestor`] when the revisions share no history;
/// choosing a fallback is up to the caller.
pub fn resolve_path_conflict(
    paragraphs: &dyn ParagraphStore,
    history: &dyn HistoryService,
    keep_id: &str,
    conflicting_ids: &[String],
) -> Result<ManualResolution> {
    let mut ids = vec![keep_id.to_string()];
    for id in conflicting_ids {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }

    let ancestor = history
        .common_ancestor_of(&ids)?
        .ok_or_else(|| Error::NoCommonAncestor(ids.clone()))?;

    let mut deprecated = 0;
    let mut kept = None;
    paragraphs.run_transaction(&mut || {
        deprecated = 0;
        for id in ids.iter().filter(|id| id.as_str() != keep_id) {
            let losing = paragraphs
                .get(id)?
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            deprecated += history.deprecate_with_history(&losing, Some(&ancestor))?;
        }

        let mut tip = paragraphs
            .get(keep_id)?
            .ok_or_else(|| Error::NotFound(keep_id.to_string()))?;
        tip.is_most_recent = true;
        tip.is_deprecated = false;
        paragraphs.push_paragraph(&tip)?;
        kept = Some(tip);
        Ok(())
    })?;

    let kept = kept.ok_or_else(|| Error::NotFound(keep_id.to_string()))?;
    info!(
        "kept {} on {}, deprecated {} revisions back to {}",
        kept.id, kept.path_id, deprecated, ancestor.id
    );
    Ok(ManualResolution {
        kept,
        ancestor,
        deprecated,
    })
}
