//! Ingestion: source → parse → ancestor closure → extensions → export / index.

pub mod closure;
pub mod export;
pub mod fields;

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use crate::connectors::{DEFAULT_FETCH_TIMEOUT, SourceLocation, obo};
use crate::extensions::ExtensionList;
use crate::model::types::{HEADER_INFO_ID, TERM_CATEGORY_FIELD, TermCollection};
use crate::search::backend::SearchBackend;
use crate::search::tantivy::TantivyBackend;

use self::export::ExportFormat;
use self::fields::FieldSelection;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub source: SourceLocation,
    pub output: PathBuf,
    pub selection: FieldSelection,
    /// Also load the terms into a tantivy index under this directory.
    pub index_dir: Option<PathBuf>,
    pub vocabulary: String,
    pub fetch_timeout: Duration,
}

impl IndexOptions {
    pub fn new(source: SourceLocation, output: impl Into<PathBuf>) -> Self {
        Self {
            source,
            output: output.into(),
            selection: FieldSelection::all(),
            index_dir: None,
            vocabulary: "hpo".to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub terms: usize,
    pub stanzas: usize,
    pub skipped_lines: usize,
    /// Reading stopped early; the export holds what was read before the error.
    pub partial: bool,
    pub format: ExportFormat,
    pub output: PathBuf,
    pub generation: Option<String>,
    pub elapsed: Duration,
}

/// Parsed and enriched terms of one source.
#[derive(Debug)]
pub struct Ingested {
    pub terms: TermCollection,
    pub stanzas: usize,
    pub skipped_lines: usize,
    pub io_error: Option<String>,
}

/// Fetch and parse `source`, close `term_category` over the `is_a` graph
/// when that field is selected, then let the supported extensions enrich
/// every term. `indexing_ended` runs even when ingestion fails.
pub fn ingest(
    source: &SourceLocation,
    selection: &FieldSelection,
    extensions: &ExtensionList,
    vocabulary: &str,
    fetch_timeout: Duration,
) -> Result<Ingested> {
    extensions.indexing_started(vocabulary);
    let result = ingest_terms(source, selection, extensions, vocabulary, fetch_timeout);
    extensions.indexing_ended(vocabulary);
    result
}

fn ingest_terms(
    source: &SourceLocation,
    selection: &FieldSelection,
    extensions: &ExtensionList,
    vocabulary: &str,
    fetch_timeout: Duration,
) -> Result<Ingested> {
    let staged = source
        .fetch(fetch_timeout)
        .with_context(|| format!("fetching ontology from {source}"))?;
    let parsed = obo::parse_file(staged.path(), selection);
    if parsed.terms.is_empty()
        && let Some(err) = &parsed.io_error
    {
        bail!("could not read ontology from {source}: {err}");
    }
    if let Some(err) = &parsed.io_error {
        tracing::warn!(source = %source, terms = parsed.terms.len(), error = %err, "using partial ontology");
    }

    let mut terms = parsed.terms;
    if selection.is_selected(TERM_CATEGORY_FIELD) {
        closure::propagate_ancestors(&mut terms);
    }
    if !extensions.is_empty() {
        for term in terms.iter_mut() {
            extensions.extend_term(term, vocabulary);
        }
    }
    tracing::info!(
        source = %source,
        terms = terms.len(),
        stanzas = parsed.stanzas,
        skipped_lines = parsed.skipped_lines,
        "ingest_complete"
    );
    Ok(Ingested {
        terms,
        stanzas: parsed.stanzas,
        skipped_lines: parsed.skipped_lines,
        io_error: parsed.io_error,
    })
}

/// `ingest`, returning only the terms.
pub fn build_collection(
    source: &SourceLocation,
    selection: &FieldSelection,
    extensions: &ExtensionList,
    vocabulary: &str,
    fetch_timeout: Duration,
) -> Result<TermCollection> {
    Ok(ingest(source, selection, extensions, vocabulary, fetch_timeout)?.terms)
}

/// Documents to store in the search index: the id and the selected fields of
/// every term. The header document keeps all of its fields.
pub fn index_documents<'a>(
    terms: &'a TermCollection,
    selection: &FieldSelection,
) -> Cow<'a, TermCollection> {
    if selection.is_empty() {
        return Cow::Borrowed(terms);
    }
    Cow::Owned(
        terms
            .iter()
            .map(|term| match term.id() {
                HEADER_INFO_ID => term.clone(),
                _ => term.project(|field| selection.is_exported(field)),
            })
            .collect(),
    )
}

/// Full ingestion run: build the collection, write the bulk-load export and,
/// if requested, replace the documents of the tantivy index with the same
/// fields the export holds.
pub fn run_index(opts: &IndexOptions, extensions: &ExtensionList) -> Result<IndexReport> {
    let started = Instant::now();
    let ingested = ingest(
        &opts.source,
        &opts.selection,
        extensions,
        &opts.vocabulary,
        opts.fetch_timeout,
    )?;

    let format = export::export_to_file(&opts.output, &ingested.terms, &opts.selection)?;

    let generation = match &opts.index_dir {
        Some(dir) => {
            let backend = TantivyBackend::open(dir)
                .with_context(|| format!("opening index at {}", dir.display()))?
                .with_boosts(opts.selection.clone());
            backend
                .replace_all(&index_documents(&ingested.terms, &opts.selection))
                .with_context(|| format!("loading terms into {}", dir.display()))?;
            backend.generation()
        }
        None => None,
    };

    let report = IndexReport {
        terms: ingested.terms.len(),
        stanzas: ingested.stanzas,
        skipped_lines: ingested.skipped_lines,
        partial: ingested.io_error.is_some(),
        format,
        output: opts.output.clone(),
        generation,
        elapsed: started.elapsed(),
    };
    tracing::info!(
        terms = report.terms,
        output = %report.output.display(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "index_run_complete"
    );
    Ok(report)
}
