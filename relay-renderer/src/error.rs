//! Report rendering failures, each naming the template or status record
//! involved.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// One of the built-in report templates does not compile.
    #[error("built-in report templates are invalid: {0}")]
    Builtin(#[source] tera::Error),

    /// A `.tera` file in the override directory does not compile.
    #[error("report template override '{}' is invalid: {source}", path.display())]
    Override { path: PathBuf, source: tera::Error },

    #[error("failed to read report templates from '{}': {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    /// The status record of `file` could not be converted for rendering.
    #[error("status of '{file}' cannot be rendered: {source}")]
    Context { file: String, source: tera::Error },

    /// Rendering `template` failed, typically an override referencing a
    /// field that reports do not carry.
    #[error("failed to render report '{template}': {source}")]
    Report { template: String, source: tera::Error },
}
