//! Boundary between the vocabulary service and the document store.

use thiserror::Error;

use crate::model::types::{Term, TermCollection};

/// Rows fetched when the caller does not ask for a specific page size.
pub const DEFAULT_ROWS: usize = 10;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("index update failed: {0}")]
    Index(String),
    #[error("backend call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<tantivy::TantivyError> for BackendError {
    fn from(e: tantivy::TantivyError) -> Self {
        Self::Index(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub q: String,
    pub start: usize,
    pub rows: usize,
    pub spellcheck: bool,
}

impl SearchRequest {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            start: 0,
            rows: DEFAULT_ROWS,
            spellcheck: false,
        }
    }

    pub fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn start(mut self, start: usize) -> Self {
        self.start = start;
        self
    }

    pub fn with_spellcheck(mut self, enabled: bool) -> Self {
        self.spellcheck = enabled;
        self
    }
}

/// Spelling verdict for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct SpellcheckResult {
    pub correctly_spelled: bool,
    /// Corrected query, when at least one correction was found.
    pub collation: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    pub documents: Vec<Term>,
    pub num_found: u64,
    pub max_score: f32,
    pub spellcheck: Option<SpellcheckResult>,
}

impl SearchResponse {
    /// Suggested replacement query, if the backend thinks the query is misspelled.
    pub fn collation(&self) -> Option<&str> {
        match &self.spellcheck {
            Some(SpellcheckResult {
                correctly_spelled: false,
                collation: Some(c),
            }) if !c.trim().is_empty() => Some(c.as_str()),
            _ => None,
        }
    }
}

/// An indexed document store queried with field-clause strings.
pub trait SearchBackend: Send + Sync {
    fn query(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError>;

    fn count(&self, q: &str) -> Result<u64, BackendError>;

    /// Replace the whole document set. Readers keep seeing the previous
    /// documents until the new set is committed.
    fn replace_all(&self, terms: &TermCollection) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collation_requires_misspelling_and_text() {
        let mut r = SearchResponse::default();
        assert_eq!(r.collation(), None);
        r.spellcheck = Some(SpellcheckResult {
            correctly_spelled: true,
            collation: Some("name:(eye)".into()),
        });
        assert_eq!(r.collation(), None);
        r.spellcheck = Some(SpellcheckResult {
            correctly_spelled: false,
            collation: Some("  ".into()),
        });
        assert_eq!(r.collation(), None);
        r.spellcheck = Some(SpellcheckResult {
            correctly_spelled: false,
            collation: Some("name:(eye)".into()),
        });
        assert_eq!(r.collation(), Some("name:(eye)"));
    }

    #[test]
    fn request_builder() {
        let req = SearchRequest::new("*:*").rows(3).start(6).with_spellcheck(true);
        assert_eq!(req.rows, 3);
        assert_eq!(req.start, 6);
        assert!(req.spellcheck);
    }
}
