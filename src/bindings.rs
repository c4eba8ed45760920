// src/bindings.rs
use log::debug;

use crate::error::{Error, Result};
use crate::models::{EntityKind, ParagraphBinding};
use crate::store::{Store, Transactional};

/// Persisted alignments between books.
pub trait BindingStore: Transactional {
    /// Every binding with `book_id` on either side.
    fn bindings_for_book(&self, book_id: &str) -> Result<Vec<ParagraphBinding>>;

    /// Store `binding`, replacing any previous state of the same binding.
    fn push_binding(&self, binding: &ParagraphBinding) -> Result<()>;

    /// Project the book belongs to.
    fn project_of(&self, book_id: &str) -> Result<String>;
}

impl BindingStore for Store {
    fn bindings_for_book(&self, book_id: &str) -> Result<Vec<ParagraphBinding>> {
        let mut bindings: Vec<ParagraphBinding> = self.load_current(
            EntityKind::ParagraphBinding,
            "d.book_id = ?1 OR d.peer_book_id = ?1",
            &[&book_id],
        )?;
        bindings.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(bindings)
    }

    fn push_binding(&self, binding: &ParagraphBinding) -> Result<()> {
        self.save_entity(&binding.id, EntityKind::ParagraphBinding, binding)?;
        debug!(
            "stored binding {} ({} -> {}, {} pairs)",
            binding.id,
            binding.source_book_id,
            binding.target_book_id,
            binding.bindings.len()
        );
        Ok(())
    }

    fn project_of(&self, book_id: &str) -> Result<String> {
        self.book_project(book_id)?
            .ok_or_else(|| Error::UnknownBook(book_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PathPair;

    fn pair(source: &str, target: &str) -> PathPair {
        PathPair {
            source_path_id: source.to_string(),
            target_path_id: target.to_string(),
        }
    }

    #[test]
    fn test_bindings_found_from_either_side() {
        let store = Store::open_in_memory().unwrap();
        let binding = ParagraphBinding::new("GEN-en", "GEN-fr", "alice");
        store.push_binding(&binding).unwrap();

        assert_eq!(store.bindings_for_book("GEN-en").unwrap(), vec![binding.clone()]);
        assert_eq!(store.bindings_for_book("GEN-fr").unwrap(), vec![binding]);
        assert!(store.bindings_for_book("GEN-de").unwrap().is_empty());
    }

    #[test]
    fn test_push_binding_replaces_pairs_wholesale() {
        let store = Store::open_in_memory().unwrap();
        let mut binding = ParagraphBinding::new("GEN-en", "GEN-fr", "alice");
        binding.bindings = vec![pair("a", "x"), pair("b", "y")];
        store.push_binding(&binding).unwrap();

        binding.bindings = vec![pair("c", "z")];
        store.push_binding(&binding).unwrap();

        let stored = store.bindings_for_book("GEN-en").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bindings, vec![pair("c", "z")]);
    }

    #[test]
    fn test_project_of() {
        let store = Store::open_in_memory().unwrap();
        store.register_book("GEN-en", "english", "Genesis").unwrap();

        assert_eq!(store.project_of("GEN-en").unwrap(), "english");
        assert!(matches!(store.project_of("GEN-xx"), Err(Error::UnknownBook(_))));
    }
}
