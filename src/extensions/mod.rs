//! Hooks that enrich a vocabulary while it is indexed and queried.
//!
//! Extensions are registered in an explicit, ordered list when the
//! vocabulary is built; every hook runs in registration order.

pub mod annotations;

use std::sync::Arc;

use crate::model::types::Term;
use crate::search::backend::SearchRequest;

pub use annotations::AnnotationExtension;

pub trait VocabularyExtension: Send + Sync {
    fn name(&self) -> &str;

    fn is_vocabulary_supported(&self, vocabulary: &str) -> bool;

    /// Called before any term of `vocabulary` is extended.
    fn indexing_started(&self, vocabulary: &str);

    fn extend_term(&self, term: &mut Term, vocabulary: &str);

    /// Called once indexing finishes, whether or not it succeeded.
    fn indexing_ended(&self, vocabulary: &str);

    fn extend_query(&self, _request: &mut SearchRequest, _vocabulary: &str) {}
}

/// Ordered extensions, filtered per vocabulary on use.
#[derive(Clone, Default)]
pub struct ExtensionList {
    extensions: Vec<Arc<dyn VocabularyExtension>>,
}

impl ExtensionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, extension: Arc<dyn VocabularyExtension>) {
        self.extensions.push(extension);
    }

    pub fn with(mut self, extension: Arc<dyn VocabularyExtension>) -> Self {
        self.push(extension);
        self
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn supported<'a>(
        &'a self,
        vocabulary: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn VocabularyExtension>> + 'a {
        self.extensions
            .iter()
            .filter(move |e| e.is_vocabulary_supported(vocabulary))
    }

    pub fn indexing_started(&self, vocabulary: &str) {
        for extension in self.supported(vocabulary) {
            tracing::debug!(extension = extension.name(), vocabulary, "indexing_started");
            extension.indexing_started(vocabulary);
        }
    }

    pub fn extend_term(&self, term: &mut Term, vocabulary: &str) {
        for extension in self.supported(vocabulary) {
            extension.extend_term(term, vocabulary);
        }
    }

    pub fn indexing_ended(&self, vocabulary: &str) {
        for extension in self.supported(vocabulary) {
            tracing::debug!(extension = extension.name(), vocabulary, "indexing_ended");
            extension.indexing_ended(vocabulary);
        }
    }

    pub fn extend_query(&self, request: &mut SearchRequest, vocabulary: &str) {
        for extension in self.supported(vocabulary) {
            extension.extend_query(request, vocabulary);
        }
    }
}

impl std::fmt::Debug for ExtensionList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.name()))
            .finish()
    }
}
