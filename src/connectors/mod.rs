//! Ontology and annotation sources.
//!
//! A source is either a local file or an `http(s)` URL. Remote sources are
//! downloaded into a temporary file before parsing so the parsers only ever
//! deal with local, seekable files.

pub mod obo;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;

/// Default timeout for downloading a remote source.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Source location is empty")]
    Empty,
    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("Server returned {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("I/O error while staging {location}: {source}")]
    Io {
        location: String,
        source: std::io::Error,
    },
}

/// Where ontology or annotation data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote(String),
}

impl SourceLocation {
    /// Interpret a command-line or config value. `file://` URLs map to local paths.
    pub fn parse(raw: &str) -> Result<Self, SourceError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SourceError::Empty);
        }
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Remote(raw.to_string()));
        }
        if let Some(path) = raw.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        Ok(Self::Local(PathBuf::from(raw)))
    }

    /// Make the source available as a local file, downloading it if needed.
    pub fn fetch(&self, timeout: Duration) -> Result<LocalSource, SourceError> {
        match self {
            Self::Local(path) => Ok(LocalSource {
                path: path.clone(),
                _temp: None,
            }),
            Self::Remote(url) => download(url, timeout),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// A source staged on the local filesystem. Temporary downloads are removed on drop.
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    _temp: Option<NamedTempFile>,
}

impl LocalSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

fn download(url: &str, timeout: Duration) -> Result<LocalSource, SourceError> {
    let download_err = |e: reqwest::Error| SourceError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let io_err = |e: std::io::Error| SourceError::Io {
        location: url.to_string(),
        source: e,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("obo2index/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(download_err)?;

    tracing::info!(url = url, "downloading source");
    let mut response = client.get(url).send().map_err(download_err)?;
    if !response.status().is_success() {
        return Err(SourceError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let mut temp = NamedTempFile::new().map_err(io_err)?;
    let bytes = response.copy_to(temp.as_file_mut()).map_err(download_err)?;
    temp.as_file_mut().flush().map_err(io_err)?;
    tracing::info!(url = url, bytes = bytes, path = %temp.path().display(), "source downloaded");

    Ok(LocalSource {
        path: temp.path().to_path_buf(),
        _temp: Some(temp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_locations() {
        assert_eq!(
            SourceLocation::parse("https://example.org/hp.obo").unwrap(),
            SourceLocation::Remote("https://example.org/hp.obo".into())
        );
        assert_eq!(
            SourceLocation::parse("file:///tmp/hp.obo").unwrap(),
            SourceLocation::Local(PathBuf::from("/tmp/hp.obo"))
        );
        assert_eq!(
            SourceLocation::parse(" data/hp.obo ").unwrap(),
            SourceLocation::Local(PathBuf::from("data/hp.obo"))
        );
        assert!(matches!(SourceLocation::parse("  "), Err(SourceError::Empty)));
    }

    #[test]
    fn local_fetch_is_passthrough() {
        let loc = SourceLocation::Local(PathBuf::from("/tmp/x.obo"));
        let staged = loc.fetch(DEFAULT_FETCH_TIMEOUT).unwrap();
        assert_eq!(staged.path(), Path::new("/tmp/x.obo"));
        assert!(!staged.is_temporary());
    }

    #[test]
    fn unreachable_remote_is_an_error() {
        let loc = SourceLocation::Remote("http://127.0.0.1:9/nothing.obo".into());
        assert!(loc.fetch(Duration::from_secs(2)).is_err());
    }
}
