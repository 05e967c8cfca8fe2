//! Normalized ontology entities.

pub mod multimap;
pub mod types;

pub use multimap::MultiMap;
pub use types::{Term, TermCollection};
