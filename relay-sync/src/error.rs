//! Error types for relay-sync.

use std::path::PathBuf;

use thiserror::Error;

use relay_core::{CoreError, JobFile, TaskType};
use relay_renderer::RenderError;

/// Error returned by task, prepare and notify handlers.
///
/// Handlers talk to arbitrary collaborators (HTTP, SQL, subprocesses), so the
/// engine only needs to display the error and its sources.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the rendering engine.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An error from job parsing or settings.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A status file exists but is not a valid status document.
    #[error("corrupt status file {path}: {source}")]
    StatusParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (status store).
    #[error("status JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A definition names a task type missing from the registry order.
    #[error("task type '{0}' is not in the task order")]
    UnknownTaskType(TaskType),

    /// The task order lists a type twice.
    #[error("task type '{0}' appears twice in the task order")]
    DuplicateTaskType(TaskType),

    /// A provider's initialize hook failed; nothing was classified.
    #[error("initialization failed: {0}")]
    Initialize(String),

    /// Statuses could not be saved at the end of a run.
    #[error("failed to save statuses: {0}")]
    Persist(String),

    /// The aggregate run error: these job files ended non-succeeded.
    #[error("Some files({}) are processed failed.", join_files(.files))]
    JobsFailed { files: Vec<JobFile> },

    /// Debug include/exclude patterns left files out of the run.
    #[error("{0} files are ignored in debug mode, rollback!")]
    Ignored(usize),

    /// The rollback-for-testing switch is on.
    #[error("rollback requested for testing")]
    Rollback,
}

fn join_files(files: &[JobFile]) -> String {
    files
        .iter()
        .map(JobFile::as_str)
        .collect::<Vec<_>>()
        .join(" , ")
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Renders an error and its source chain on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_failed_lists_every_file() {
        let err = SyncError::JobsFailed {
            files: vec![JobFile::from("kmi/a.json"), JobFile::from("kmi/b.json")],
        };
        assert_eq!(
            err.to_string(),
            "Some files(kmi/a.json , kmi/b.json) are processed failed."
        );
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = io_err("/tmp/x", std::io::Error::other("disk full"));
        assert_eq!(error_chain(&err), "I/O error at /tmp/x: disk full");
    }
}
