//! Field selection: which source fields get indexed, and with what boost.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::model::types::{ID_FIELD, IS_A_FIELD};

/// Boost applied to a selected field without an explicit weight.
pub const DEFAULT_BOOST: f64 = 1.0;

/// Mapping from field name to boost.
///
/// An empty selection selects every field with [`DEFAULT_BOOST`]. Callers
/// must go through [`FieldSelection::is_selected`] rather than probing keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    boosts: BTreeMap<String, f64>,
}

impl FieldSelection {
    /// Selection that accepts every field.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse `name[:boost],name[:boost],...`.
    ///
    /// Blank entries are ignored; a missing, unparsable, non-finite or
    /// non-positive boost falls back to [`DEFAULT_BOOST`].
    pub fn parse(spec: &str) -> Self {
        let mut boosts = BTreeMap::new();
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, boost) = match entry.split_once(':') {
                Some((name, raw)) => (name.trim(), parse_boost(raw)),
                None => (entry, DEFAULT_BOOST),
            };
            if name.is_empty() {
                continue;
            }
            boosts.insert(name.to_string(), boost);
        }
        Self { boosts }
    }

    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }

    pub fn is_selected(&self, field: &str) -> bool {
        self.boosts.is_empty() || self.boosts.contains_key(field)
    }

    /// Whether the parser must record `field`: selected fields plus the
    /// structural `id` and `is_a` needed to build the graph.
    pub fn is_recorded(&self, field: &str) -> bool {
        field == ID_FIELD || field == IS_A_FIELD || self.is_selected(field)
    }

    /// Whether `field` belongs in exported documents.
    pub fn is_exported(&self, field: &str) -> bool {
        field == ID_FIELD || self.is_selected(field)
    }

    pub fn boost(&self, field: &str) -> f64 {
        self.boosts.get(field).copied().unwrap_or(DEFAULT_BOOST)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.boosts.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn parse_boost(raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(b) if b.is_finite() && b > 0.0 => b,
        _ => {
            tracing::debug!(boost = raw, "unparsable boost, using default");
            DEFAULT_BOOST
        }
    }
}

impl FromStr for FieldSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for FieldSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, boost) in &self.boosts {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            write!(f, "{name}:{boost:?}")?;
        }
        Ok(())
    }
}
