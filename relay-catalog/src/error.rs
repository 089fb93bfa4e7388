//! Error types for relay-catalog.

use std::path::PathBuf;

use thiserror::Error;

use relay_sync::SyncError;

/// Errors loading or registering a task catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The catalog parsed but is not consistent.
    #[error("invalid catalog: {0}")]
    Invalid(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors raised by catalog handlers while a task runs.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code}: {stderr}")]
    Failed {
        command: String,
        code: String,
        stderr: String,
    },

    #[error("`{command}` printed invalid JSON: {source}")]
    Output {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("`{command}` must print a JSON object")]
    NotAnObject { command: String },

    #[error("job {file} has no '{field}' field")]
    MissingField { file: String, field: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.into(),
        source,
    }
}
