//! Error types for relay-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from job parsing, status records and settings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A structured job file did not decode into a JSON object.
    #[error("invalid job file {file}: {reason}")]
    InvalidJob { file: String, reason: String },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings that cannot be reconciled (e.g. credential count mismatch).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.relay/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
