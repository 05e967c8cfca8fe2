//! Tantivy-backed term index.
//!
//! The schema is derived from the documents being loaded. Keyword fields
//! (identifiers and id lists) are indexed verbatim, `is_a` keeps only the
//! parent ids of its `ID ! label` values, and every other field is full text.
//! Each rebuild writes a fresh index generation and swaps it in once
//! committed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, BoostQuery, EmptyQuery, Occur as IndexOccur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TEXT, TextFieldIndexing, TextOptions, Value,
};
use tantivy::tokenizer::{RegexTokenizer, TextAnalyzer, TokenStream};
use tantivy::{Index, IndexReader, IndexWriter, Searcher, TantivyDocument};

use super::backend::{BackendError, SearchBackend, SearchRequest, SearchResponse, SpellcheckResult};
use super::query::{Clause, ClauseValue, Occur, ParsedQuery, parse_query};
use crate::indexer::fields::FieldSelection;
use crate::model::MultiMap;
use crate::model::types::{
    ALT_ID_FIELD, ID_FIELD, IS_A_FIELD, TERM_CATEGORY_FIELD, Term, TermCollection, VERSION_FIELD,
};

const PARENT_ID_TOKENIZER: &str = "parent_id";
const CURRENT_FILE: &str = "CURRENT";
const WRITER_HEAP_BYTES: usize = 50_000_000;
const MAX_EDIT_DISTANCE: usize = 2;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_\-]*$").expect("field name regex"));

static ID_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*:[A-Za-z0-9_.\-]+$").expect("id value regex")
});

const PARENT_ID_PATTERN: &str = r"[A-Za-z][A-Za-z0-9_]*:[A-Za-z0-9_.\-]+";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Keyword,
    ParentIds,
    FullText,
}

struct Generation {
    name: String,
    index: Index,
    reader: IndexReader,
    fields: BTreeMap<String, (Field, FieldKind)>,
}

impl Generation {
    fn attach(name: String, index: Index) -> Result<Self, BackendError> {
        register_tokenizers(&index)?;
        let reader = index.reader()?;
        let schema = index.schema();
        let mut fields = BTreeMap::new();
        for (field, entry) in schema.fields() {
            let kind = match entry.field_type().get_index_record_option() {
                Some(IndexRecordOption::Basic) => FieldKind::Keyword,
                _ if entry.name() == IS_A_FIELD => FieldKind::ParentIds,
                _ => FieldKind::FullText,
            };
            fields.insert(entry.name().to_string(), (field, kind));
        }
        Ok(Self {
            name,
            index,
            reader,
            fields,
        })
    }

    fn text_fields(&self) -> Vec<Field> {
        self.fields
            .values()
            .filter(|(_, kind)| *kind == FieldKind::FullText)
            .map(|(f, _)| *f)
            .collect()
    }

    fn analyze(&self, field: Field, text: &str) -> Result<Vec<String>, BackendError> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(field)
            .map_err(|e| BackendError::Query(e.to_string()))?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }
}

fn register_tokenizers(index: &Index) -> Result<(), BackendError> {
    let tokenizer = RegexTokenizer::new(PARENT_ID_PATTERN)?;
    index
        .tokenizers()
        .register(PARENT_ID_TOKENIZER, TextAnalyzer::builder(tokenizer).build());
    Ok(())
}

/// Search backend over a local tantivy index, on disk or in memory.
pub struct TantivyBackend {
    dir: Option<PathBuf>,
    boosts: FieldSelection,
    active: RwLock<Option<Arc<Generation>>>,
    rebuild: Mutex<()>,
}

impl TantivyBackend {
    /// Open the index stored under `dir`, attaching to its current generation
    /// if one has been written.
    pub fn open(dir: &Path) -> Result<Self, BackendError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| BackendError::Unavailable(format!("{}: {e}", dir.display())))?;
        let active = match read_current(dir) {
            Some(name) => {
                let index = Index::open_in_dir(dir.join(&name))?;
                let generation = Generation::attach(name, index)?;
                tracing::info!(dir = %dir.display(), generation = %generation.name, "index opened");
                Some(Arc::new(generation))
            }
            None => {
                tracing::debug!(dir = %dir.display(), "no index generation yet");
                None
            }
        };
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            boosts: FieldSelection::all(),
            active: RwLock::new(active),
            rebuild: Mutex::new(()),
        })
    }

    /// An index that lives only in memory.
    pub fn in_ram() -> Self {
        Self {
            dir: None,
            boosts: FieldSelection::all(),
            active: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    /// Apply per-field boosts when scoring queries.
    pub fn with_boosts(mut self, boosts: FieldSelection) -> Self {
        self.boosts = boosts;
        self
    }

    /// Name of the generation currently served, if any.
    pub fn generation(&self) -> Option<String> {
        self.active.read().as_ref().map(|g| g.name.clone())
    }

    fn current(&self) -> Result<Arc<Generation>, BackendError> {
        self.active
            .read()
            .clone()
            .ok_or_else(|| BackendError::Unavailable("no index has been loaded".to_string()))
    }

    fn build_query(
        &self,
        generation: &Generation,
        parsed: &ParsedQuery,
    ) -> Result<Box<dyn Query>, BackendError> {
        let clauses = match parsed {
            ParsedQuery::All => return Ok(Box::new(AllQuery)),
            ParsedQuery::Clauses(clauses) => clauses,
        };
        let mut subqueries: Vec<(IndexOccur, Box<dyn Query>)> = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let occur = match clause.occur {
                Occur::Must => IndexOccur::Must,
                Occur::Should => IndexOccur::Should,
            };
            subqueries.push((occur, self.clause_query(generation, clause)?));
        }
        Ok(Box::new(BooleanQuery::new(subqueries)))
    }

    fn clause_query(
        &self,
        generation: &Generation,
        clause: &Clause,
    ) -> Result<Box<dyn Query>, BackendError> {
        let targets: Vec<(Field, FieldKind, f32)> = match &clause.field {
            Some(name) => match generation.fields.get(name) {
                Some((field, kind)) => vec![(*field, *kind, self.boosts.boost(name) as f32)],
                None => {
                    tracing::debug!(field = %name, "query on unknown field");
                    return Ok(Box::new(EmptyQuery));
                }
            },
            None => generation
                .fields
                .iter()
                .filter(|(_, (_, kind))| *kind == FieldKind::FullText)
                .map(|(name, (field, kind))| (*field, *kind, self.boosts.boost(name) as f32))
                .collect(),
        };

        let mut alternatives: Vec<(IndexOccur, Box<dyn Query>)> = Vec::new();
        for value in &clause.values {
            let text = match value {
                ClauseValue::Any => return Ok(Box::new(AllQuery)),
                ClauseValue::Text(text) => text,
            };
            for (field, kind, boost) in &targets {
                let tokens = generation.analyze(*field, text)?;
                if tokens.is_empty() {
                    continue;
                }
                let record = match kind {
                    FieldKind::FullText => IndexRecordOption::WithFreqs,
                    _ => IndexRecordOption::Basic,
                };
                let mut term_queries: Vec<(IndexOccur, Box<dyn Query>)> = tokens
                    .iter()
                    .map(|tok| {
                        let term = tantivy::Term::from_field_text(*field, tok);
                        (
                            IndexOccur::Must,
                            Box::new(TermQuery::new(term, record)) as Box<dyn Query>,
                        )
                    })
                    .collect();
                let q: Box<dyn Query> = if term_queries.len() == 1 {
                    term_queries.remove(0).1
                } else {
                    Box::new(BooleanQuery::new(term_queries))
                };
                let q: Box<dyn Query> = if (*boost - 1.0).abs() > f32::EPSILON {
                    Box::new(BoostQuery::new(q, *boost))
                } else {
                    q
                };
                alternatives.push((IndexOccur::Should, q));
            }
        }
        Ok(Box::new(BooleanQuery::new(alternatives)))
    }

    fn spellcheck(
        &self,
        generation: &Generation,
        searcher: &Searcher,
        parsed: &ParsedQuery,
    ) -> Result<SpellcheckResult, BackendError> {
        let ParsedQuery::Clauses(clauses) = parsed else {
            return Ok(SpellcheckResult {
                correctly_spelled: true,
                collation: None,
            });
        };

        let mut correctly_spelled = true;
        let mut corrected_any = false;
        let mut corrected = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let fields: Vec<Field> = match &clause.field {
                Some(name) => match generation.fields.get(name) {
                    Some((field, FieldKind::FullText)) => vec![*field],
                    _ => {
                        corrected.push(clause.clone());
                        continue;
                    }
                },
                None => generation.text_fields(),
            };
            let Some(&analyzer_field) = fields.first() else {
                corrected.push(clause.clone());
                continue;
            };

            let mut values = Vec::with_capacity(clause.values.len());
            for value in &clause.values {
                let ClauseValue::Text(text) = value else {
                    values.push(value.clone());
                    continue;
                };
                let tokens = generation.analyze(analyzer_field, text)?;
                let mut words = Vec::with_capacity(tokens.len());
                for token in tokens {
                    if is_known(searcher, &fields, &token)? {
                        words.push(token);
                        continue;
                    }
                    correctly_spelled = false;
                    match closest_term(searcher, &fields, &token)? {
                        Some(suggestion) => {
                            corrected_any = true;
                            words.push(suggestion);
                        }
                        None => words.push(token),
                    }
                }
                values.push(ClauseValue::Text(words.join(" ")));
            }
            corrected.push(Clause {
                occur: clause.occur,
                field: clause.field.clone(),
                values,
            });
        }

        let collation = (!correctly_spelled && corrected_any)
            .then(|| ParsedQuery::Clauses(corrected).to_string());
        Ok(SpellcheckResult {
            correctly_spelled,
            collation,
        })
    }
}

fn io_query_error(e: std::io::Error) -> BackendError {
    BackendError::Query(e.to_string())
}

fn is_known(searcher: &Searcher, fields: &[Field], token: &str) -> Result<bool, BackendError> {
    for segment in searcher.segment_readers() {
        for field in fields {
            let inverted = segment
                .inverted_index(*field)
                .map_err(|e| BackendError::Query(e.to_string()))?;
            if inverted
                .terms()
                .get(token.as_bytes())
                .map_err(io_query_error)?
                .is_some()
            {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Closest dictionary term within the edit-distance limit; ties go to the
/// more frequent term.
fn closest_term(
    searcher: &Searcher,
    fields: &[Field],
    token: &str,
) -> Result<Option<String>, BackendError> {
    let mut best: Option<(usize, u32, String)> = None;
    for segment in searcher.segment_readers() {
        for field in fields {
            let inverted = segment
                .inverted_index(*field)
                .map_err(|e| BackendError::Query(e.to_string()))?;
            let mut stream = inverted.terms().stream().map_err(io_query_error)?;
            while stream.advance() {
                let Ok(candidate) = std::str::from_utf8(stream.key()) else {
                    continue;
                };
                if candidate.len().abs_diff(token.len()) > MAX_EDIT_DISTANCE {
                    continue;
                }
                let distance = strsim::levenshtein(token, candidate);
                if distance == 0 || distance > MAX_EDIT_DISTANCE {
                    continue;
                }
                let freq = stream.value().doc_freq;
                let better = match &best {
                    None => true,
                    Some((d, f, _)) => distance < *d || (distance == *d && freq > *f),
                };
                if better {
                    best = Some((distance, freq, candidate.to_string()));
                }
            }
        }
    }
    Ok(best.map(|(_, _, term)| term))
}

fn read_current(dir: &Path) -> Option<String> {
    let name = std::fs::read_to_string(dir.join(CURRENT_FILE)).ok()?;
    let name = name.trim();
    (!name.is_empty() && dir.join(name).join("meta.json").exists()).then(|| name.to_string())
}

fn next_generation_name(current: Option<&str>) -> String {
    let n = current
        .and_then(|c| c.strip_prefix("gen-"))
        .and_then(|n| n.parse::<u64>().ok())
        .map_or(1, |n| n + 1);
    format!("gen-{n:06}")
}

fn classify_fields(terms: &TermCollection) -> BTreeMap<String, FieldKind> {
    let mut kinds: BTreeMap<String, FieldKind> = BTreeMap::new();
    for field in [ID_FIELD, IS_A_FIELD, TERM_CATEGORY_FIELD, ALT_ID_FIELD, VERSION_FIELD] {
        kinds.insert(field.to_string(), FieldKind::Keyword);
    }
    kinds.insert(IS_A_FIELD.to_string(), FieldKind::ParentIds);

    let mut all_ids: BTreeMap<&str, bool> = BTreeMap::new();
    for term in terms {
        for (name, values) in term.fields().iter() {
            let looks_like_ids = values.iter().all(|v| ID_VALUE_RE.is_match(v));
            all_ids
                .entry(name.as_str())
                .and_modify(|ids| *ids &= looks_like_ids)
                .or_insert(looks_like_ids);
        }
    }
    for (name, ids) in all_ids {
        if kinds.contains_key(name) {
            continue;
        }
        if !FIELD_NAME_RE.is_match(name) {
            tracing::warn!(field = name, "skipping field with unsupported name");
            continue;
        }
        let kind = if ids {
            FieldKind::Keyword
        } else {
            FieldKind::FullText
        };
        kinds.insert(name.to_string(), kind);
    }
    kinds
}

fn build_schema(kinds: &BTreeMap<String, FieldKind>) -> Schema {
    let mut builder = Schema::builder();
    for (name, kind) in kinds {
        match kind {
            FieldKind::Keyword => {
                builder.add_text_field(name, STRING | STORED);
            }
            FieldKind::ParentIds => {
                let options = TextOptions::default()
                    .set_indexing_options(
                        TextFieldIndexing::default()
                            .set_tokenizer(PARENT_ID_TOKENIZER)
                            .set_index_option(IndexRecordOption::WithFreqs),
                    )
                    .set_stored();
                builder.add_text_field(name, options);
            }
            FieldKind::FullText => {
                builder.add_text_field(name, TEXT | STORED);
            }
        }
    }
    builder.build()
}

fn to_document(schema: &Schema, term: &Term) -> TantivyDocument {
    let mut doc = TantivyDocument::default();
    for (name, values) in term.fields().iter() {
        let Ok(field) = schema.get_field(name) else {
            continue;
        };
        for value in values {
            doc.add_text(field, value);
        }
    }
    doc
}

fn from_document(schema: &Schema, doc: &TantivyDocument) -> Option<Term> {
    let mut fields = MultiMap::new();
    for (field, entry) in schema.fields() {
        for value in doc.get_all(field) {
            if let Some(text) = value.as_str() {
                fields.insert(entry.name().to_string(), text.to_string());
            }
        }
    }
    Term::from_fields(fields)
}

impl SearchBackend for TantivyBackend {
    fn query(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError> {
        let generation = self.current()?;
        let parsed = parse_query(&request.q).map_err(|e| BackendError::Query(e.to_string()))?;
        let query = self.build_query(&generation, &parsed)?;
        let searcher = generation.reader.searcher();
        let query_err = |e: tantivy::TantivyError| BackendError::Query(e.to_string());

        let (hits, num_found) = if request.rows == 0 {
            (Vec::new(), searcher.search(query.as_ref(), &Count).map_err(query_err)?)
        } else {
            let collector = (
                TopDocs::with_limit(request.rows).and_offset(request.start),
                Count,
            );
            searcher.search(query.as_ref(), &collector).map_err(query_err)?
        };

        let max_score = if request.start == 0 {
            hits.first().map_or(0.0, |(score, _)| *score)
        } else if num_found > 0 {
            searcher
                .search(query.as_ref(), &TopDocs::with_limit(1))
                .map_err(query_err)?
                .first()
                .map_or(0.0, |(score, _)| *score)
        } else {
            0.0
        };

        let schema = generation.index.schema();
        let mut documents = Vec::with_capacity(hits.len());
        for (_, address) in hits {
            let doc: TantivyDocument = searcher.doc(address).map_err(query_err)?;
            match from_document(&schema, &doc) {
                Some(term) => documents.push(term),
                None => tracing::warn!(?address, "indexed document without id"),
            }
        }

        let spellcheck = if request.spellcheck {
            Some(self.spellcheck(&generation, &searcher, &parsed)?)
        } else {
            None
        };

        tracing::debug!(
            q = %request.q,
            num_found = num_found,
            returned = documents.len(),
            max_score = max_score,
            "search_complete"
        );
        Ok(SearchResponse {
            documents,
            num_found: num_found as u64,
            max_score,
            spellcheck,
        })
    }

    fn count(&self, q: &str) -> Result<u64, BackendError> {
        let generation = self.current()?;
        let parsed = parse_query(q).map_err(|e| BackendError::Query(e.to_string()))?;
        let query = self.build_query(&generation, &parsed)?;
        let count = generation
            .reader
            .searcher()
            .search(query.as_ref(), &Count)
            .map_err(|e| BackendError::Query(e.to_string()))?;
        Ok(count as u64)
    }

    fn replace_all(&self, terms: &TermCollection) -> Result<(), BackendError> {
        let _exclusive = self.rebuild.lock();
        let previous = self.generation();
        let name = next_generation_name(previous.as_deref());

        let kinds = classify_fields(terms);
        let schema = build_schema(&kinds);
        let index = match &self.dir {
            Some(dir) => {
                let path = dir.join(&name);
                if path.exists() {
                    std::fs::remove_dir_all(&path)
                        .map_err(|e| BackendError::Index(format!("{}: {e}", path.display())))?;
                }
                std::fs::create_dir_all(&path)
                    .map_err(|e| BackendError::Index(format!("{}: {e}", path.display())))?;
                Index::create_in_dir(&path, schema.clone())?
            }
            None => Index::create_in_ram(schema.clone()),
        };
        register_tokenizers(&index)?;

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for term in terms {
            writer.add_document(to_document(&schema, term))?;
        }
        writer.commit()?;
        writer.wait_merging_threads()?;

        let generation = Generation::attach(name.clone(), index)?;
        if let Some(dir) = &self.dir {
            write_current(dir, &name)?;
        }
        *self.active.write() = Some(Arc::new(generation));
        tracing::info!(generation = %name, terms = terms.len(), fields = kinds.len(), "index_swapped");

        if let (Some(dir), Some(old)) = (&self.dir, previous)
            && old != name
            && let Err(e) = std::fs::remove_dir_all(dir.join(&old))
        {
            tracing::warn!(generation = %old, error = %e, "failed to remove old index generation");
        }
        Ok(())
    }
}

fn write_current(dir: &Path, name: &str) -> Result<(), BackendError> {
    let tmp = dir.join(format!("{CURRENT_FILE}.tmp"));
    std::fs::write(&tmp, name)
        .and_then(|_| std::fs::rename(&tmp, dir.join(CURRENT_FILE)))
        .map_err(|e| BackendError::Index(format!("recording generation {name}: {e}")))
}

impl std::fmt::Debug for TantivyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyBackend")
            .field("dir", &self.dir)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Fields of `terms` that would be indexed verbatim rather than tokenized.
pub fn keyword_fields(terms: &TermCollection) -> BTreeSet<String> {
    classify_fields(terms)
        .into_iter()
        .filter(|(_, kind)| *kind == FieldKind::Keyword)
        .map(|(name, _)| name)
        .collect()
}
