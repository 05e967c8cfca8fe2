//! Query strings for the term index.
//!
//! Queries use the Lucene/Solr field-clause syntax: `+field:(v1 v2)` requires
//! `field` to match one of the alternatives, `field:value` is an optional
//! clause, and `*:*` matches everything. Special characters inside names and
//! values are backslash-escaped.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::model::types::{ALT_ID_FIELD, ID_FIELD};

/// Value that matches any content of a field.
pub const WILDCARD: &str = "*";

/// Query matching every document.
pub const MATCH_ALL: &str = "*:*";

/// Escape every character that has a meaning in the query syntax.
///
/// Mirrors the escaping rules of Solr's `ClientUtils.escapeQueryChars`.
pub fn escape_query_chars(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        if matches!(
            c,
            '\\' | '+'
                | '-'
                | '!'
                | '('
                | ')'
                | ':'
                | '^'
                | '['
                | ']'
                | '"'
                | '{'
                | '}'
                | '~'
                | '*'
                | '?'
                | '|'
                | '&'
                | ';'
                | '/'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Value constraint for one field: a single value or a set of alternatives.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    One(String),
    AnyOf(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::One(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::One(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        Self::AnyOf(v)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(v: Vec<&str>) -> Self {
        Self::AnyOf(v.into_iter().map(str::to_string).collect())
    }
}

/// Field → value constraints, rendered as a conjunction of clauses.
pub type FieldValues = BTreeMap<String, FieldValue>;

/// Build `+field:(v1 v2 ...)` clauses for every constrained field.
///
/// Empty alternative lists are skipped. A single `*` value is passed through
/// unescaped so it keeps its "any value" meaning.
pub fn field_values_query(values: &FieldValues) -> String {
    let mut query = String::new();
    for (field, value) in values {
        let rendered: Vec<String> = match value {
            FieldValue::AnyOf(alternatives) if alternatives.is_empty() => continue,
            FieldValue::AnyOf(alternatives) => {
                alternatives.iter().map(|v| escape_query_chars(v)).collect()
            }
            FieldValue::One(v) if v == WILDCARD => vec![WILDCARD.to_string()],
            FieldValue::One(v) => vec![escape_query_chars(v)],
        };
        if !query.is_empty() {
            query.push(' ');
        }
        query.push('+');
        query.push_str(&escape_query_chars(field));
        query.push_str(":(");
        query.push_str(&rendered.join(" "));
        query.push(')');
    }
    if query.is_empty() {
        MATCH_ALL.to_string()
    } else {
        query
    }
}

/// Single-term lookup query, also used as the cache key for that id.
pub fn id_query(id: &str) -> String {
    format!("{ID_FIELD}:{}", escape_query_chars(id.trim()))
}

/// Lookup of a term through its alternative ids.
pub fn alt_id_query(id: &str) -> String {
    format!("{ALT_ID_FIELD}:{}", escape_query_chars(id.trim()))
}

/// One OR-query over many ids.
pub fn ids_query<'a>(ids: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let ids: Vec<String> = ids.into_iter().map(escape_query_chars).collect();
    if ids.is_empty() {
        None
    } else {
        Some(format!("{ID_FIELD}:({})", ids.join(" ")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Must,
    Should,
}

/// One parsed `field:(alternatives)` clause. `field` is `None` for bare values.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub occur: Occur,
    pub field: Option<String>,
    pub values: Vec<ClauseValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseValue {
    Text(String),
    Any,
}

impl ClauseValue {
    fn render(&self) -> String {
        match self {
            Self::Text(t) => escape_query_chars(t),
            Self::Any => WILDCARD.to_string(),
        }
    }
}

/// Parsed form of a query string.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    All,
    Clauses(Vec<Clause>),
}

#[derive(Debug, Error, PartialEq)]
pub enum QuerySyntaxError {
    #[error("unterminated group for field {0:?}")]
    UnterminatedGroup(String),
    #[error("dangling escape at end of query")]
    DanglingEscape,
    #[error("empty field name at offset {0}")]
    EmptyField(usize),
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.occur == Occur::Must {
            f.write_str("+")?;
        }
        let values: Vec<String> = self.values.iter().map(ClauseValue::render).collect();
        match &self.field {
            Some(field) => write!(f, "{}:({})", escape_query_chars(field), values.join(" ")),
            None => write!(f, "({})", values.join(" ")),
        }
    }
}

impl fmt::Display for ParsedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str(MATCH_ALL),
            Self::Clauses(clauses) => {
                let rendered: Vec<String> = clauses.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(" "))
            }
        }
    }
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl Scanner<'_> {
    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    /// Read one escaped word, stopping at unescaped whitespace, `)` or, when
    /// `stop_at_colon` is set, `:`. Returns the unescaped text and whether the
    /// word was a lone unescaped `*`.
    fn word(&mut self, stop_at_colon: bool) -> Result<(String, bool), QuerySyntaxError> {
        let mut text = String::new();
        let mut raw_star = true;
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() || c == ')' || c == '(' || (stop_at_colon && c == ':') {
                break;
            }
            self.chars.next();
            if c == '\\' {
                let (_, escaped) = self.chars.next().ok_or(QuerySyntaxError::DanglingEscape)?;
                text.push(escaped);
                raw_star = false;
            } else {
                if c != '*' {
                    raw_star = false;
                }
                text.push(c);
            }
        }
        let lone_star = raw_star && text == WILDCARD;
        Ok((text, lone_star))
    }

    fn values(&mut self, field: &str) -> Result<Vec<ClauseValue>, QuerySyntaxError> {
        let mut values = Vec::new();
        if self.chars.next_if(|(_, c)| *c == '(').is_some() {
            loop {
                self.skip_ws();
                match self.chars.peek() {
                    None => return Err(QuerySyntaxError::UnterminatedGroup(field.to_string())),
                    Some((_, ')')) => {
                        self.chars.next();
                        break;
                    }
                    Some(_) => {
                        let (text, star) = self.word(false)?;
                        if star {
                            values.push(ClauseValue::Any);
                        } else if !text.is_empty() {
                            values.push(ClauseValue::Text(text));
                        } else {
                            // stray '(' inside a group
                            self.chars.next();
                        }
                    }
                }
            }
        } else {
            let (text, star) = self.word(false)?;
            if star {
                values.push(ClauseValue::Any);
            } else if !text.is_empty() {
                values.push(ClauseValue::Text(text));
            }
        }
        Ok(values)
    }
}

/// Parse a query string into clauses.
pub fn parse_query(q: &str) -> Result<ParsedQuery, QuerySyntaxError> {
    let trimmed = q.trim();
    if trimmed.is_empty() || trimmed == MATCH_ALL {
        return Ok(ParsedQuery::All);
    }

    let mut scanner = Scanner {
        chars: trimmed.char_indices().peekable(),
    };
    let mut clauses = Vec::new();
    loop {
        scanner.skip_ws();
        let Some(&(offset, c)) = scanner.chars.peek() else {
            break;
        };
        let occur = if c == '+' {
            scanner.chars.next();
            Occur::Must
        } else {
            Occur::Should
        };

        if scanner.chars.peek().is_some_and(|(_, c)| *c == '(') {
            let values = scanner.values("")?;
            clauses.push(Clause {
                occur,
                field: None,
                values,
            });
            continue;
        }

        let (head, head_star) = scanner.word(true)?;
        if scanner.chars.next_if(|(_, c)| *c == ':').is_some() {
            if head.is_empty() {
                return Err(QuerySyntaxError::EmptyField(offset));
            }
            let values = scanner.values(&head)?;
            if head_star && values == [ClauseValue::Any] {
                return Ok(ParsedQuery::All);
            }
            clauses.push(Clause {
                occur,
                field: Some(head),
                values,
            });
        } else if !head.is_empty() {
            let value = if head_star {
                ClauseValue::Any
            } else {
                ClauseValue::Text(head)
            };
            clauses.push(Clause {
                occur,
                field: None,
                values: vec![value],
            });
        } else {
            // lone ')' or similar noise
            scanner.chars.next();
        }
    }

    if clauses.is_empty() {
        Ok(ParsedQuery::All)
    } else {
        Ok(ParsedQuery::Clauses(clauses))
    }
}
