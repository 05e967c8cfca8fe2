//! Search layer.
//!
//! - **[`query`]**: query-string escaping, construction and parsing.
//! - **[`backend`]**: the `SearchBackend` boundary and its request/response types.
//! - **[`tantivy`]**: tantivy implementation of the backend, with spellcheck.
//! - **[`cache`]**: term cache with explicit not-found entries.

pub mod backend;
pub mod cache;
pub mod query;
pub mod tantivy;

pub use backend::{BackendError, SearchBackend, SearchRequest, SearchResponse, SpellcheckResult};
pub use cache::{CacheEntry, TermCache};
