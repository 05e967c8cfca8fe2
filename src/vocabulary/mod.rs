//! Read path over an indexed vocabulary.
//!
//! Lookups go through a term cache that also remembers confirmed absences.
//! Every backend call runs under a timeout; backend failures are logged and
//! surface as "no result", never as errors.

pub mod manager;
pub mod workers;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::ServiceConfig;
use crate::connectors::{DEFAULT_FETCH_TIMEOUT, SourceLocation};
use crate::extensions::ExtensionList;
use crate::indexer::fields::FieldSelection;
use crate::indexer::index_documents;
use crate::model::types::{HEADER_INFO_ID, Term, VERSION_FIELD};
use crate::search::backend::{BackendError, SearchBackend, SearchRequest, SearchResponse};
use crate::search::cache::{CacheEntry, TermCache};
use crate::search::query::{FieldValues, MATCH_ALL, alt_id_query, field_values_query, id_query, ids_query};

pub use manager::{TermResolver, VocabularyManager};
use workers::BackendWorkers;

/// Paging and spellcheck overrides for one search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub rows: Option<usize>,
    pub start: usize,
    pub spellcheck: Option<bool>,
}

pub struct Vocabulary {
    identifier: String,
    backend: Arc<dyn SearchBackend>,
    cache: TermCache,
    workers: BackendWorkers,
    extensions: ExtensionList,
    config: ServiceConfig,
    selection: FieldSelection,
    fetch_timeout: Duration,
}

impl Vocabulary {
    pub fn new(identifier: impl Into<String>, backend: Arc<dyn SearchBackend>) -> Self {
        let config = ServiceConfig::default();
        let identifier = identifier.into();
        Self {
            workers: BackendWorkers::new(&identifier, config.backend_workers),
            identifier,
            backend,
            cache: TermCache::new(config.cache_capacity),
            extensions: ExtensionList::new(),
            config,
            selection: FieldSelection::all(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.cache = TermCache::new(config.cache_capacity);
        if config.backend_workers != self.config.backend_workers {
            self.workers = BackendWorkers::new(&self.identifier, config.backend_workers);
        }
        self.config = config;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionList) -> Self {
        self.extensions = extensions;
        self
    }

    /// Fields recorded when this vocabulary is reindexed.
    pub fn with_selection(mut self, selection: FieldSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn cache(&self) -> &TermCache {
        &self.cache
    }

    /// Run `op` against the backend on one of the vocabulary's workers,
    /// giving up after the configured timeout.
    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SearchBackend) -> Result<T, BackendError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        self.workers
            .run(op, self.config.backend_timeout(), move || f(backend.as_ref()))
    }

    fn run(&self, request: SearchRequest) -> Result<SearchResponse, BackendError> {
        self.call("query", move |backend| backend.query(&request))
    }

    fn first_match(&self, q: String) -> Result<Option<Term>, BackendError> {
        let response = self.run(SearchRequest::new(q).rows(1))?;
        Ok(response.documents.into_iter().next())
    }

    /// Look up one term by id, falling back to `alt_id` when enabled.
    pub fn get_term(&self, id: &str) -> Option<Arc<Term>> {
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        let key = id_query(id);
        if let Some(entry) = self.cache.get(&key) {
            return entry.term();
        }

        let mut found = match self.first_match(key.clone()) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(vocabulary = %self.identifier, id = id, error = %e, "term lookup failed");
                return None;
            }
        };
        if found.is_none() && self.config.resolve_alt_ids {
            found = match self.first_match(alt_id_query(id)) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(vocabulary = %self.identifier, id = id, error = %e, "alt_id lookup failed");
                    return None;
                }
            };
        }

        match found {
            Some(term) => {
                let term = Arc::new(term);
                self.cache.put_found(key, Arc::clone(&term));
                Some(term)
            }
            None => {
                tracing::debug!(vocabulary = %self.identifier, id = id, "term not found");
                self.cache.put_not_found(key);
                None
            }
        }
    }

    /// Look up many ids with a single backend query for the uncached ones.
    /// Results follow the request order; unknown ids are skipped.
    pub fn get_terms<I, S>(&self, ids: I) -> Vec<Arc<Term>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let wanted: Vec<String> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();

        let mut found: HashMap<String, Arc<Term>> = HashMap::new();
        let mut missing = Vec::new();
        for id in &wanted {
            match self.cache.get(&id_query(id)) {
                Some(CacheEntry::Found(term)) => {
                    found.insert(id.clone(), term);
                }
                Some(CacheEntry::NotFound) => {}
                None => missing.push(id.as_str()),
            }
        }

        if let Some(q) = ids_query(missing.iter().copied()) {
            let request = SearchRequest::new(q).rows(missing.len());
            match self.run(request) {
                Ok(response) => {
                    for term in response.documents {
                        let term = Arc::new(term);
                        self.cache.put_found(id_query(term.id()), Arc::clone(&term));
                        found.insert(term.id().to_string(), term);
                    }
                }
                Err(e) => {
                    tracing::warn!(vocabulary = %self.identifier, ids = missing.len(), error = %e, "batch lookup failed");
                }
            }
        }

        wanted.iter().filter_map(|id| found.get(id).cloned()).collect()
    }

    pub fn search(&self, field_values: &FieldValues) -> Vec<Arc<Term>> {
        self.search_with(field_values, SearchOptions::default())
    }

    pub fn search_with(&self, field_values: &FieldValues, options: SearchOptions) -> Vec<Arc<Term>> {
        self.search_query(&field_values_query(field_values), options)
    }

    /// Run a raw query string.
    pub fn search_query(&self, q: &str, options: SearchOptions) -> Vec<Arc<Term>> {
        let mut request = SearchRequest::new(q)
            .rows(options.rows.unwrap_or(self.config.default_rows))
            .start(options.start)
            .with_spellcheck(options.spellcheck.unwrap_or(self.config.spellcheck));
        self.extensions.extend_query(&mut request, &self.identifier);

        match self.search_request(&request) {
            Ok(response) => response
                .documents
                .into_iter()
                .map(|term| {
                    let term = Arc::new(term);
                    self.cache.put_found(id_query(term.id()), Arc::clone(&term));
                    term
                })
                .collect(),
            Err(e) => {
                tracing::warn!(vocabulary = %self.identifier, q = %request.q, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    /// Execute `request`, retrying with the backend's spelling collation when
    /// it offers one and keeping whichever run scored higher.
    pub fn search_request(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError> {
        let primary = self.run(request.clone())?;
        if !request.spellcheck {
            return Ok(primary);
        }
        let Some(collation) = primary
            .collation()
            .filter(|c| *c != request.q)
            .map(str::to_string)
        else {
            return Ok(primary);
        };

        let corrected_request = SearchRequest {
            q: collation.clone(),
            spellcheck: false,
            ..request.clone()
        };
        match self.run(corrected_request) {
            Ok(corrected) if corrected.max_score > primary.max_score => {
                tracing::debug!(
                    original = %request.q,
                    corrected = %collation,
                    original_score = primary.max_score,
                    corrected_score = corrected.max_score,
                    "using spellchecked query"
                );
                Ok(corrected)
            }
            Ok(_) => Ok(primary),
            Err(e) => {
                tracing::warn!(q = %collation, error = %e, "spellchecked query failed");
                Ok(primary)
            }
        }
    }

    /// Number of terms matching `field_values`, `None` if the backend failed.
    pub fn count(&self, field_values: &FieldValues) -> Option<u64> {
        self.count_query(field_values_query(field_values))
    }

    /// Number of indexed documents.
    pub fn size(&self) -> Option<u64> {
        self.count_query(MATCH_ALL.to_string())
    }

    fn count_query(&self, q: String) -> Option<u64> {
        match self.call("count", move |backend| backend.count(&q)) {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(vocabulary = %self.identifier, error = %e, "count failed");
                None
            }
        }
    }

    /// Rebuild the index from `source`. Only the id and the selected fields
    /// are stored. The cache is cleared once the new documents are live.
    /// Returns the number of documents loaded.
    pub fn reindex(&self, source: &SourceLocation) -> anyhow::Result<usize> {
        let terms = crate::indexer::build_collection(
            source,
            &self.selection,
            &self.extensions,
            &self.identifier,
            self.fetch_timeout,
        )?;
        self.backend
            .replace_all(&index_documents(&terms, &self.selection))
            .with_context(|| format!("loading {} terms into {}", terms.len(), self.identifier))?;
        self.cache.clear();
        tracing::info!(vocabulary = %self.identifier, terms = terms.len(), "reindex_complete");
        Ok(terms.len())
    }

    /// Version recorded in the source's header.
    pub fn version(&self) -> Option<String> {
        self.get_term(HEADER_INFO_ID)?
            .first(VERSION_FIELD)
            .map(str::to_string)
    }

    /// Length of the shortest path between two terms through a common
    /// ancestor, following `is_a` links upwards from both ends.
    pub fn distance(&self, from: &str, to: &str) -> Option<u64> {
        let from = self.get_term(from)?;
        let to = self.get_term(to)?;
        if from.id() == to.id() {
            return Some(0);
        }

        let mut from_levels: HashMap<String, u64> = HashMap::from([(from.id().to_string(), 0)]);
        let mut to_levels: HashMap<String, u64> = HashMap::from([(to.id().to_string(), 0)]);
        let mut from_frontier = vec![from];
        let mut to_frontier = vec![to];

        let mut best = u64::MAX;
        let mut level = 1u64;
        while level <= best && (!from_frontier.is_empty() || !to_frontier.is_empty()) {
            best = best.min(self.climb(level, &mut from_frontier, &mut from_levels, &to_levels));
            best = best.min(self.climb(level, &mut to_frontier, &mut to_levels, &from_levels));
            level += 1;
        }
        (best != u64::MAX).then_some(best)
    }

    fn climb(
        &self,
        level: u64,
        frontier: &mut Vec<Arc<Term>>,
        own: &mut HashMap<String, u64>,
        other: &HashMap<String, u64>,
    ) -> u64 {
        let mut best = u64::MAX;
        let mut next = Vec::new();
        for term in frontier.drain(..) {
            for parent_id in term.parent_ids() {
                if own.contains_key(&parent_id) {
                    continue;
                }
                if let Some(d) = other.get(&parent_id) {
                    best = best.min(d + level);
                }
                own.insert(parent_id.clone(), level);
                if let Some(parent) = self.get_term(&parent_id) {
                    next.push(parent);
                }
            }
        }
        *frontier = next;
        best
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary")
            .field("identifier", &self.identifier)
            .field("cache", &self.cache)
            .field("workers", &self.workers)
            .field("extensions", &self.extensions)
            .field("config", &self.config)
            .finish()
    }
}
