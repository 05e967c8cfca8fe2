#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use obo_term_index::model::MultiMap;
use obo_term_index::model::types::{Term, TermCollection};
use obo_term_index::search::backend::{
    BackendError, SearchBackend, SearchRequest, SearchResponse,
};
use obo_term_index::search::query::{ClauseValue, Occur, ParsedQuery, parse_query};
use parking_lot::Mutex;

/// Small HPO-shaped ontology with a header, an alt_id, a Typedef and a
/// two-branch hierarchy under Phenotypic abnormality.
pub const HPO_SAMPLE: &str = "\
format-version: 1.2
data-version: hp/releases/2024-04-26
ontology: hp

[Term]
id: HP:0000001
name: All

[Term]
id: HP:0000118
name: Phenotypic abnormality
is_a: HP:0000001 ! All

[Term]
id: HP:0000478
name: Abnormality of the eye
alt_id: HP:0001105
is_a: HP:0000118 ! Phenotypic abnormality

[Term]
id: HP:0000518
name: Cataract
def: \"A cataract is an opacity or clouding of the lens.\" [HPO:probinson]
synonym: \"Clouding of the lens\" EXACT []
is_a: HP:0000478 ! Abnormality of the eye

[Term]
id: HP:0000152
name: Abnormality of head or neck
is_a: HP:0000118 ! Phenotypic abnormality

[Term]
id: HP:0000234
name: Abnormality of the head
is_a: HP:0000152 ! Abnormality of head or neck

[Typedef]
id: part_of
name: part of
is_transitive: true
";

pub fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

pub fn term(id: &str, fields: &[(&str, &str)]) -> Term {
    let mut map = MultiMap::new();
    map.insert("id".to_string(), id.to_string());
    for (k, v) in fields {
        map.insert(k.to_string(), v.to_string());
    }
    Term::from_fields(map).expect("term has id")
}

pub fn response(terms: Vec<Term>, max_score: f32) -> SearchResponse {
    SearchResponse {
        num_found: terms.len() as u64,
        documents: terms,
        max_score,
        spellcheck: None,
    }
}

/// In-memory backend with call counters, scripted responses and failure
/// injection. Unscripted queries are evaluated as exact-value matches.
#[derive(Default)]
pub struct MockBackend {
    terms: Mutex<TermCollection>,
    scripted: Mutex<HashMap<String, SearchResponse>>,
    pub queries: Mutex<Vec<String>>,
    pub query_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub replace_calls: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn with_terms(terms: impl IntoIterator<Item = Term>) -> Arc<Self> {
        let backend = Self::default();
        *backend.terms.lock() = terms.into_iter().collect();
        Arc::new(backend)
    }

    pub fn script(&self, q: &str, response: SearchResponse) {
        self.scripted.lock().insert(q.to_string(), response);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            std::thread::sleep(d);
        }
    }

    fn matching(&self, q: &str) -> Result<Vec<Term>, BackendError> {
        let parsed = parse_query(q).map_err(|e| BackendError::Query(e.to_string()))?;
        let terms = self.terms.lock();
        let clauses = match parsed {
            ParsedQuery::All => return Ok(terms.iter().cloned().collect()),
            ParsedQuery::Clauses(clauses) => clauses,
        };
        let has_must = clauses.iter().any(|c| c.occur == Occur::Must);
        Ok(terms
            .iter()
            .filter(|t| {
                let hits = |c: &obo_term_index::search::query::Clause| {
                    c.values.iter().any(|v| match v {
                        ClauseValue::Any => true,
                        ClauseValue::Text(text) => match &c.field {
                            Some(f) => t.values(f).any(|x| x == text.as_str()),
                            None => t.fields().iter().any(|(_, vals)| vals.contains(text)),
                        },
                    })
                };
                if has_must {
                    clauses.iter().filter(|c| c.occur == Occur::Must).all(hits)
                } else {
                    clauses.iter().any(hits)
                }
            })
            .cloned()
            .collect())
    }
}

impl SearchBackend for MockBackend {
    fn query(&self, request: &SearchRequest) -> Result<SearchResponse, BackendError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(request.q.clone());
        self.pause();
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock offline".into()));
        }
        if let Some(r) = self.scripted.lock().get(&request.q) {
            return Ok(r.clone());
        }
        let all = self.matching(&request.q)?;
        let num_found = all.len() as u64;
        let documents: Vec<Term> = all
            .into_iter()
            .skip(request.start)
            .take(request.rows)
            .collect();
        Ok(SearchResponse {
            max_score: if num_found > 0 { 1.0 } else { 0.0 },
            num_found,
            documents,
            spellcheck: None,
        })
    }

    fn count(&self, q: &str) -> Result<u64, BackendError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock offline".into()));
        }
        Ok(self.matching(q)?.len() as u64)
    }

    fn replace_all(&self, terms: &TermCollection) -> Result<(), BackendError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Index("mock offline".into()));
        }
        *self.terms.lock() = terms.clone();
        Ok(())
    }
}

/// Captures tracing output for tests.
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
