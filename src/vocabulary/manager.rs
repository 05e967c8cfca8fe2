//! Resolution of term ids across several vocabularies.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Vocabulary;
use crate::model::types::Term;

/// Anything that can look up a term by its full id.
pub trait TermResolver: Send + Sync {
    fn resolve_term(&self, id: &str) -> Option<Arc<Term>>;

    /// Resolve many ids at once. Unknown ids are left out.
    fn resolve_terms(&self, ids: &[&str]) -> Vec<Arc<Term>> {
        ids.iter().filter_map(|id| self.resolve_term(id)).collect()
    }
}

/// Vocabularies keyed by name, with the id prefixes each one owns.
#[derive(Default)]
pub struct VocabularyManager {
    vocabularies: BTreeMap<String, Arc<Vocabulary>>,
    prefixes: BTreeMap<String, String>,
}

impl VocabularyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `vocabulary` as the owner of ids starting with any of `prefixes`
    /// (compared case-insensitively, without the trailing `:`).
    pub fn register<I, S>(&mut self, vocabulary: Arc<Vocabulary>, prefixes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = vocabulary.identifier().to_string();
        for prefix in prefixes {
            let prefix = prefix.as_ref().trim_end_matches(':').to_ascii_uppercase();
            if let Some(previous) = self.prefixes.insert(prefix.clone(), name.clone())
                && previous != name
            {
                tracing::warn!(prefix = %prefix, previous = %previous, now = %name, "id prefix reassigned");
            }
        }
        self.vocabularies.insert(name, vocabulary);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Vocabulary>> {
        self.vocabularies.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vocabularies.keys().map(String::as_str)
    }

    /// Vocabulary owning `id`, chosen by the part of the id before the first `:`.
    pub fn vocabulary_for(&self, id: &str) -> Option<&Arc<Vocabulary>> {
        let (prefix, _) = id.trim().split_once(':')?;
        let name = self.prefixes.get(&prefix.to_ascii_uppercase())?;
        self.vocabularies.get(name)
    }
}

impl TermResolver for VocabularyManager {
    fn resolve_term(&self, id: &str) -> Option<Arc<Term>> {
        match self.vocabulary_for(id) {
            Some(vocabulary) => vocabulary.get_term(id),
            None => {
                tracing::debug!(id = id, "no vocabulary for id prefix");
                None
            }
        }
    }

    /// One batched lookup per owning vocabulary.
    fn resolve_terms(&self, ids: &[&str]) -> Vec<Arc<Term>> {
        let mut by_vocabulary: BTreeMap<&str, (&Arc<Vocabulary>, Vec<&str>)> = BTreeMap::new();
        for id in ids {
            match self.vocabulary_for(id) {
                Some(vocabulary) => by_vocabulary
                    .entry(vocabulary.identifier())
                    .or_insert_with(|| (vocabulary, Vec::new()))
                    .1
                    .push(*id),
                None => tracing::debug!(id = *id, "no vocabulary for id prefix"),
            }
        }
        by_vocabulary
            .into_values()
            .flat_map(|(vocabulary, ids)| vocabulary.get_terms(ids))
            .collect()
    }
}

impl TermResolver for Vocabulary {
    fn resolve_term(&self, id: &str) -> Option<Arc<Term>> {
        self.get_term(id)
    }

    fn resolve_terms(&self, ids: &[&str]) -> Vec<Arc<Term>> {
        self.get_terms(ids)
    }
}

impl std::fmt::Debug for VocabularyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VocabularyManager")
            .field("vocabularies", &self.vocabularies.keys().collect::<Vec<_>>())
            .field("prefixes", &self.prefixes)
            .finish()
    }
}
