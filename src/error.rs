use std::path::PathBuf;

use thiserror::Error;

use crate::payload::AssetKind;

pub type Result<T, E = ContentError> = std::result::Result<T, E>;

/// Failures surfaced by the content tracker and its readers.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("asset not found: {name}")]
    NotFound { name: String },
    #[error("asset {name} was requested as {expected} but is {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("failed to read asset {name}")]
    Read {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to load source asset {}", path.display())]
    SourceLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unable to start the loader thread")]
    Worker(#[source] std::io::Error),
}

impl ContentError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn read(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Read {
            name: name.into(),
            source: source.into(),
        }
    }

    pub(crate) fn type_mismatch(name: &str, expected: AssetKind, found: AssetKind) -> Self {
        Self::TypeMismatch {
            name: name.to_string(),
            expected: expected.name(),
            found: found.name(),
        }
    }

    /// Returns true when the failure means the asset has no backing data.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
