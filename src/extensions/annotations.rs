//! Delimited annotation files merged into indexed terms.
//!
//! Each row links an entity (for example a disease) to a term of another,
//! already indexed vocabulary. While a vocabulary is indexed, every entity
//! with annotations gets two fields: the directly annotated term ids, and
//! those ids plus the `term_category` of each resolved term.
//!
//! Files are read as raw bytes and decoded lossily per cell, so a stray
//! non-UTF-8 byte only mangles the cell it sits in. Comma-separated files
//! follow RFC 4180 quoting; tab-separated files treat `"` as ordinary text.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::VocabularyExtension;
use crate::config::AnnotationSourceConfig;
use crate::connectors::SourceLocation;
use crate::model::MultiMap;
use crate::model::types::{TERM_CATEGORY_FIELD, Term};
use crate::vocabulary::TermResolver;

/// Associations collected during one indexing pass.
#[derive(Debug, Default)]
pub struct AnnotationData {
    pub direct: MultiMap<String, String>,
    pub expanded: MultiMap<String, String>,
    /// Reading stopped early; the associations hold the rows read before it.
    pub read_error: Option<String>,
}

/// Term ids resolved per resolver call.
const RESOLVE_BATCH: usize = 512;

#[derive(Default)]
struct State {
    active: usize,
    data: Option<Arc<AnnotationData>>,
}

pub struct AnnotationExtension {
    config: AnnotationSourceConfig,
    resolver: Arc<dyn TermResolver>,
    fetch_timeout: Duration,
    state: Mutex<State>,
}

/// Cell `col` of `row`, if the row has that many cells.
pub fn row_item<'a>(row: &[&'a str], col: usize) -> Option<&'a str> {
    row.get(col).copied()
}

impl AnnotationExtension {
    pub fn new(
        config: AnnotationSourceConfig,
        resolver: Arc<dyn TermResolver>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            config,
            resolver,
            fetch_timeout,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &AnnotationSourceConfig {
        &self.config
    }

    /// Entity id for one row: the entity column, prefixed with the id prefix
    /// mapped from the database column unless it already carries one.
    fn entity_id(&self, db: &str, entity: &str) -> String {
        if entity.contains(':') {
            return entity.to_string();
        }
        let prefix = self
            .config
            .db_prefixes
            .get(db)
            .or_else(|| self.config.db_prefixes.get(&db.to_ascii_uppercase()))
            .map_or(db, String::as_str);
        format!("{prefix}:{entity}")
    }

    /// Read annotation rows into direct associations, then expand them with
    /// each term's ancestors as known to the resolver. A read error ends the
    /// file early but keeps every row read before it.
    pub fn load_from_reader<R: Read>(&self, input: R) -> AnnotationData {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.delimiter.as_byte())
            .quoting(self.config.delimiter.is_quoted())
            .has_headers(self.config.skip_header)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(input);

        let mut direct: MultiMap<String, String> = MultiMap::new();
        let mut rows = 0usize;
        let mut skipped = 0usize;
        let mut read_error = None;
        let mut record = csv::ByteRecord::new();
        loop {
            match reader.read_byte_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(
                        extension = %self.config.name,
                        rows = rows,
                        line = ?e.position().map(|p| p.line()),
                        error = %e,
                        "annotation source ended early, keeping rows read so far"
                    );
                    read_error = Some(e.to_string());
                    break;
                }
            }
            let cells: Vec<String> = record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).trim().to_string())
                .collect();
            if cells.iter().all(String::is_empty) {
                continue;
            }
            let row: Vec<&str> = cells.iter().map(String::as_str).collect();
            let triple = (
                row_item(&row, self.config.db_column),
                row_item(&row, self.config.entity_column),
                row_item(&row, self.config.term_column),
            );
            match triple {
                (Some(db), Some(entity), Some(term))
                    if !db.is_empty() && !entity.is_empty() && !term.is_empty() =>
                {
                    direct.insert(self.entity_id(db, entity), term.to_string());
                    rows += 1;
                }
                _ => skipped += 1,
            }
        }

        let ancestors = self.resolve_ancestors(&direct);
        let mut expanded: MultiMap<String, String> = MultiMap::new();
        for (entity, terms) in direct.iter() {
            let all = expanded.entry_set(entity.clone());
            for term in terms {
                all.insert(term.clone());
                if let Some(closure) = ancestors.get(term) {
                    all.extend(closure.iter().cloned());
                }
            }
        }

        tracing::info!(
            extension = %self.config.name,
            rows = rows,
            skipped = skipped,
            entities = direct.len(),
            resolved = ancestors.len(),
            "annotations_loaded"
        );
        AnnotationData {
            direct,
            expanded,
            read_error,
        }
    }

    /// `term_category` of every annotated term the resolver knows, looked up
    /// in batches.
    fn resolve_ancestors(
        &self,
        direct: &MultiMap<String, String>,
    ) -> HashMap<String, BTreeSet<String>> {
        let distinct: BTreeSet<&str> = direct
            .iter()
            .flat_map(|(_, terms)| terms.iter().map(String::as_str))
            .collect();
        let distinct: Vec<&str> = distinct.into_iter().collect();
        let mut ancestors = HashMap::with_capacity(distinct.len());
        for batch in distinct.chunks(RESOLVE_BATCH) {
            for term in self.resolver.resolve_terms(batch) {
                let closure = term.values(TERM_CATEGORY_FIELD).map(str::to_string).collect();
                ancestors.insert(term.id().to_string(), closure);
            }
        }
        ancestors
    }

    fn load(&self) -> AnnotationData {
        let staged = SourceLocation::parse(&self.config.source)
            .and_then(|location| location.fetch(self.fetch_timeout));
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => {
                tracing::error!(extension = %self.config.name, error = %e, "failed to load annotation source");
                return AnnotationData::default();
            }
        };
        match File::open(staged.path()) {
            Ok(file) => self.load_from_reader(file),
            Err(e) => {
                tracing::error!(
                    extension = %self.config.name,
                    path = %staged.path().display(),
                    error = %e,
                    "failed to read annotation source"
                );
                AnnotationData::default()
            }
        }
    }

    /// Start a pass with already-loaded data instead of reading the source.
    pub fn begin_with(&self, data: AnnotationData) {
        let mut state = self.state.lock();
        state.active += 1;
        state.data = Some(Arc::new(data));
    }

    fn data(&self) -> Option<Arc<AnnotationData>> {
        self.state.lock().data.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.data().is_some()
    }
}

impl VocabularyExtension for AnnotationExtension {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_vocabulary_supported(&self, vocabulary: &str) -> bool {
        self.config.vocabularies.iter().any(|v| v == vocabulary)
    }

    fn indexing_started(&self, _vocabulary: &str) {
        let mut state = self.state.lock();
        state.active += 1;
        if state.active == 1 {
            state.data = Some(Arc::new(self.load()));
        }
    }

    fn extend_term(&self, term: &mut Term, _vocabulary: &str) {
        let Some(data) = self.data() else {
            return;
        };
        if let Some(direct) = data.direct.get(term.id())
            && !direct.is_empty()
        {
            term.set(self.config.direct_field.clone(), direct.clone());
        }
        if let Some(expanded) = data.expanded.get(term.id())
            && !expanded.is_empty()
        {
            term.set(self.config.expanded_field.clone(), expanded.clone());
        }
    }

    fn indexing_ended(&self, _vocabulary: &str) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            state.data = None;
        }
    }
}

impl std::fmt::Debug for AnnotationExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationExtension")
            .field("config", &self.config)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
