// src/merge_policies.rs
//! Merge functions applied to conflicting representations of one document.
//!
//! A policy receives every live sibling body (winner first) and returns the
//! body to keep. Policies are pure; the merger owns all writes.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{AnnotationThread, EntityKind, Note, Paragraph, ParagraphBinding};

pub type MergePolicy = Box<dyn Fn(&[Value]) -> Result<Value>>;

#[derive(Default)]
pub struct MergeRegistry {
    policies: HashMap<EntityKind, MergePolicy>,
}

impl MergeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a policy for every entity kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EntityKind::Paragraph, paragraph_policy);
        registry.register(EntityKind::ParagraphBinding, binding_policy);
        registry.register(EntityKind::AnnotationThread, thread_policy);
        registry
    }

    /// Set the policy for `kind`, replacing any earlier one.
    pub fn register<F>(&mut self, kind: EntityKind, policy: F)
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        self.policies.insert(kind, Box::new(policy));
    }

    pub fn get(&self, kind: EntityKind) -> Option<&MergePolicy> {
        self.policies.get(&kind)
    }

    pub fn contains(&self, kind: EntityKind) -> bool {
        self.policies.contains_key(&kind)
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(representations: &[Value]) -> Result<Vec<T>> {
    if representations.is_empty() {
        return Err(Error::Merge("no representations to merge".to_string()));
    }
    representations
        .iter()
        .map(|value| serde_json::from_value(value.clone()).map_err(Error::from))
        .collect()
}

/// Keep the first representation flagged most recent (else the first one);
/// the result is deprecated only if every input is.
pub fn paragraph_policy(representations: &[Value]) -> Result<Value> {
    let paragraphs: Vec<Paragraph> = decode_all(representations)?;
    let all_deprecated = paragraphs.iter().all(|p| p.is_deprecated);

    let mut merged = paragraphs
        .iter()
        .find(|p| p.is_most_recent)
        .unwrap_or(&paragraphs[0])
        .clone();
    merged.is_deprecated = all_deprecated;
    Ok(serde_json::to_value(merged)?)
}

/// Keep the most recently created binding; earlier one wins a tie.
pub fn binding_policy(representations: &[Value]) -> Result<Value> {
    let bindings: Vec<ParagraphBinding> = decode_all(representations)?;
    let mut newest = &bindings[0];
    for binding in &bindings[1..] {
        if binding.created > newest.created {
            newest = binding;
        }
    }
    Ok(serde_json::to_value(newest)?)
}

/// First thread with the notes of every thread, ordered by creation time.
/// Resolved only if every input is.
pub fn thread_policy(representations: &[Value]) -> Result<Value> {
    let threads: Vec<AnnotationThread> = decode_all(representations)?;

    let mut notes: Vec<Note> = Vec::new();
    for note in threads.iter().flat_map(|t| t.notes.iter()) {
        if !notes.iter().any(|n| n.id == note.id) {
            notes.push(note.clone());
        }
    }
    notes.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

    let mut merged = threads[0].clone();
    merged.notes = notes;
    merged.resolved = threads.iter().all(|t| t.resolved);
    Ok(serde_json::to_value(merged)?)
}
