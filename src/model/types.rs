//! Term entities and the keyed term collection built by one ingestion run.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use super::multimap::MultiMap;

pub const ID_FIELD: &str = "id";
pub const IS_A_FIELD: &str = "is_a";
pub const TERM_CATEGORY_FIELD: &str = "term_category";
pub const ALT_ID_FIELD: &str = "alt_id";
pub const NAME_FIELD: &str = "name";
pub const DEF_FIELD: &str = "def";
pub const VERSION_FIELD: &str = "version";
pub const DATA_VERSION_FIELD: &str = "data-version";

/// Pseudo-identifier of the record built from the ontology header.
pub const HEADER_INFO_ID: &str = "HEADER_INFO";

static PARENT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_]*:[A-Za-z0-9_.\-]+)\s*!.*$").expect("parent id regex")
});

/// Reduce an `is_a` value such as `HP:0000001 ! All` to its identifier.
///
/// Values without a trailing `! label` are returned trimmed.
pub fn strip_parent_label(value: &str) -> &str {
    match PARENT_ID_RE.captures(value).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => value.trim(),
    }
}

/// A single ontology term.
///
/// Fields are multi-valued. The `id` field is mirrored in `fields` so a term
/// serializes as a complete index document. Two terms are equal when their
/// identifiers are equal.
#[derive(Debug, Clone, Serialize)]
pub struct Term {
    id: String,
    fields: MultiMap<String, String>,
}

impl Term {
    /// Wrap a field map. Returns `None` when the map has no `id` value.
    pub fn from_fields(fields: MultiMap<String, String>) -> Option<Self> {
        let id = fields.first(ID_FIELD)?.clone();
        Some(Self { id, fields })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.first(NAME_FIELD)
    }

    pub fn description(&self) -> Option<&str> {
        self.first(DEF_FIELD)
    }

    pub fn fields(&self) -> &MultiMap<String, String> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(field)
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.fields.first(field).map(String::as_str)
    }

    /// Iterate the values of `field`, yielding nothing if it is absent.
    pub fn values<'a>(&'a self, field: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .get(field)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Direct parent identifiers, with `is_a` labels stripped.
    pub fn parent_ids(&self) -> BTreeSet<String> {
        self.values(IS_A_FIELD)
            .map(|v| strip_parent_label(v).to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }

    /// Ancestor identifiers, excluding the term itself.
    pub fn ancestor_ids(&self) -> BTreeSet<String> {
        self.values(TERM_CATEGORY_FIELD)
            .filter(|v| *v != self.id)
            .map(str::to_string)
            .collect()
    }

    /// Ancestor identifiers including the term itself.
    pub fn ancestors_and_self(&self) -> BTreeSet<String> {
        let mut all = self.ancestor_ids();
        all.insert(self.id.clone());
        all
    }

    pub fn add(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Replace every value of `field`. The identifier cannot be changed this way.
    pub fn set(&mut self, field: impl Into<String>, values: BTreeSet<String>) {
        let field = field.into();
        if field == ID_FIELD {
            tracing::warn!(term = %self.id, "refusing to overwrite term id");
            return;
        }
        self.fields.replace(field, values);
    }

    /// Copy of this term holding the id and the fields accepted by `keep`.
    pub fn project(&self, keep: impl Fn(&str) -> bool) -> Term {
        let mut fields = MultiMap::new();
        for (name, values) in self.fields.iter() {
            if name == ID_FIELD || keep(name) {
                fields.extend(name.clone(), values.iter().cloned());
            }
        }
        Term {
            id: self.id.clone(),
            fields,
        }
    }

    /// JSON object with one array per field.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.fields).unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Term {}

impl Hash for Term {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "[{}] {}", self.id, name),
            None => write!(f, "[{}]", self.id),
        }
    }
}

/// Terms keyed by identifier, in first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct TermCollection {
    terms: Vec<Term>,
    positions: HashMap<String, usize>,
}

impl TermCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a term. A term with an existing id replaces the old one in place.
    pub fn insert(&mut self, term: Term) {
        match self.positions.get(term.id()) {
            Some(&pos) => self.terms[pos] = term,
            None => {
                self.positions.insert(term.id().to_string(), self.terms.len());
                self.terms.push(term);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Term> {
        self.positions.get(id).map(|&pos| &self.terms[pos])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Term> {
        self.positions.get(id).map(|&pos| &mut self.terms[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Term> {
        self.terms.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Term> {
        self.terms.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(Term::id)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn as_slice(&self) -> &[Term] {
        &self.terms
    }

    pub fn into_terms(self) -> Vec<Term> {
        self.terms
    }
}

impl FromIterator<Term> for TermCollection {
    fn from_iter<I: IntoIterator<Item = Term>>(iter: I) -> Self {
        let mut collection = Self::new();
        for term in iter {
            collection.insert(term);
        }
        collection
    }
}

impl<'a> IntoIterator for &'a TermCollection {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.iter()
    }
}
