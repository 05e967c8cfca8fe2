//! OBO stanza parser.
//!
//! Reads `[Term]` stanzas of `name: value` lines into a [`TermCollection`].
//! Other stanzas (`[Typedef]`, `[Instance]`, ...) are skipped wholesale. Lines
//! before the first stanza form a header record, which is kept under the
//! pseudo-id `HEADER_INFO` when it declares a `data-version`.
//!
//! Parsing never fails: malformed lines are skipped, records without an `id`
//! are dropped, and an I/O error ends the read with whatever was collected.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::indexer::fields::FieldSelection;
use crate::model::MultiMap;
use crate::model::types::{
    DATA_VERSION_FIELD, HEADER_INFO_ID, ID_FIELD, IS_A_FIELD, TERM_CATEGORY_FIELD, Term,
    TermCollection, VERSION_FIELD, strip_parent_label,
};

const TERM_MARKER: &str = "[Term]";

static STANZA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[[A-Za-z]+\]$").expect("stanza regex"));
static FIELD_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*:\s+").expect("field separator regex"));
static QUOTED_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"(.+)"\s*?(?:[A-Z]+|\[).*"#).expect("quoted value regex"));

/// Result of one parse run.
#[derive(Debug, Default)]
pub struct ParsedOntology {
    pub terms: TermCollection,
    /// Number of `[Term]` stanzas seen (plus one for a versioned header).
    pub stanzas: usize,
    /// Lines that were neither stanza markers nor `name: value` pairs.
    pub skipped_lines: usize,
    /// Set when reading stopped early because of an I/O error.
    pub io_error: Option<String>,
}

impl ParsedOntology {
    pub fn is_partial(&self) -> bool {
        self.io_error.is_some()
    }
}

/// Accumulates the fields of the record currently being read.
#[derive(Debug, Default)]
struct TermBuilder {
    fields: MultiMap<String, String>,
    header: bool,
}

impl TermBuilder {
    fn header() -> Self {
        Self {
            fields: MultiMap::new(),
            header: true,
        }
    }

    fn add(&mut self, name: &str, value: String) {
        if name == IS_A_FIELD {
            let parent = strip_parent_label(&value).to_string();
            if !parent.is_empty() {
                self.fields.insert(TERM_CATEGORY_FIELD.to_string(), parent);
            }
        }
        self.fields.insert(name.to_string(), value);
    }

    fn finish(self) -> Option<Term> {
        Term::from_fields(self.fields)
    }
}

enum ParseState {
    Collecting(TermBuilder),
    Skipping,
}

struct OboParser<'a> {
    selection: &'a FieldSelection,
    state: ParseState,
    out: ParsedOntology,
}

impl<'a> OboParser<'a> {
    fn new(selection: &'a FieldSelection) -> Self {
        Self {
            selection,
            state: ParseState::Collecting(TermBuilder::header()),
            out: ParsedOntology::default(),
        }
    }

    fn line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case(TERM_MARKER) {
            self.finish_record();
            self.out.stanzas += 1;
            self.state = ParseState::Collecting(TermBuilder::default());
            return;
        }
        if STANZA_RE.is_match(trimmed) {
            self.finish_record();
            self.state = ParseState::Skipping;
            return;
        }

        let mut pieces = FIELD_SEPARATOR_RE.splitn(line, 2);
        let (Some(name), Some(value)) = (pieces.next(), pieces.next()) else {
            if !trimmed.is_empty() {
                self.out.skipped_lines += 1;
            }
            return;
        };
        let name = name.trim();

        let ParseState::Collecting(builder) = &mut self.state else {
            return;
        };

        if builder.header && name == DATA_VERSION_FIELD {
            builder.fields.insert(VERSION_FIELD.to_string(), value.trim().to_string());
            if builder.fields.insert(ID_FIELD.to_string(), HEADER_INFO_ID.to_string()) {
                self.out.stanzas += 1;
            }
        }

        if self.selection.is_recorded(name) {
            builder.add(name, clean_value(value));
        }
    }

    fn finish_record(&mut self) {
        let state = std::mem::replace(&mut self.state, ParseState::Skipping);
        if let ParseState::Collecting(builder) = state
            && let Some(term) = builder.finish()
        {
            self.out.terms.insert(term);
        }
    }

    fn finish(mut self) -> ParsedOntology {
        self.finish_record();
        self.out
    }
}

/// Strip OBO quoting and trailing qualifiers, then un-escape quotes.
///
/// `"Abnormality of the eye." [HPO:probinson]` becomes
/// `Abnormality of the eye.`; `"Eye defect" EXACT []` becomes `Eye defect`.
pub fn clean_value(value: &str) -> String {
    let value = value.trim_end();
    let unquoted = QUOTED_VALUE_RE.replace(value, "$1");
    unquoted.replace("\\\"", "\"")
}

/// Parse an OBO document from a buffered reader.
pub fn parse_reader<R: BufRead>(mut reader: R, selection: &FieldSelection) -> ParsedOntology {
    let mut parser = OboParser::new(selection);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                parser.line(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "ontology read failed, keeping partial results");
                parser.out.io_error = Some(e.to_string());
                break;
            }
        }
    }
    let parsed = parser.finish();
    tracing::debug!(
        terms = parsed.terms.len(),
        stanzas = parsed.stanzas,
        skipped_lines = parsed.skipped_lines,
        "obo_parse_complete"
    );
    parsed
}

/// Parse an OBO file. A missing or unreadable file yields an empty, partial result.
pub fn parse_file(path: &Path, selection: &FieldSelection) -> ParsedOntology {
    match File::open(path) {
        Ok(file) => parse_reader(BufReader::new(file), selection),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "could not open ontology source");
            ParsedOntology {
                io_error: Some(format!("{}: {e}", path.display())),
                ..ParsedOntology::default()
            }
        }
    }
}

/// Parse an in-memory OBO document.
pub fn parse_str(text: &str, selection: &FieldSelection) -> ParsedOntology {
    parse_reader(text.as_bytes(), selection)
}
