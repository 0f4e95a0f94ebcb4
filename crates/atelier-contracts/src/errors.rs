use std::path::PathBuf;

use thiserror::Error;

/// Failures while opening one of the static prompt stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} directory not found: {}", path.display())]
    MissingDirectory { kind: &'static str, path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while resolving a paint configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration not found: neither '{name}.json' nor 'default.json' in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw model output could not be turned into an [`crate::ideas::Idea`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdeaError {
    #[error("invalid idea: missing \"{0}\" field")]
    MissingField(&'static str),

    #[error("invalid idea: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// The only failure type Brain and Artist backends hand back to the pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct CollaboratorFailure {
    pub reason: String,
}

impl CollaboratorFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<IdeaError> for CollaboratorFailure {
    fn from(err: IdeaError) -> Self {
        Self::new(err.to_string())
    }
}
