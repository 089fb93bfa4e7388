//! Tera rendering engine for status reports.
//!
//! | Report | Template                 |
//! |--------|--------------------------|
//! | Job    | `job_status.txt.tera`    |
//! | Pull   | `pull_status.txt.tera`   |

use std::path::{Path, PathBuf};

use tera::Tera;

use relay_core::JobStatus;

use crate::context::ReportContext;
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const JOB_TEMPLATE: &str = "job_status.txt.tera";
const PULL_TEMPLATE: &str = "pull_status.txt.tera";

const TPLS: &[(&str, &str)] = &[
    (JOB_TEMPLATE, include_str!("templates/job_status.txt.tera")),
    (PULL_TEMPLATE, include_str!("templates/pull_status.txt.tera")),
];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io { path: path.into(), source }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .to_lowercase()
}

/// `(path, template name, contents)` for every `.tera` file in `dir`.
fn load_user_templates(dir: &Path) -> Result<Vec<(PathBuf, String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tera") || !path.is_file() {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path.as_path());
        let name = normalize_template_name(rel);
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((path, name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    // Reports are plain text; HTML escaping would mangle error messages.
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(TPLS.iter().copied())
        .map_err(RenderError::Builtin)?;
    if let Some(dir) = user_template_dir {
        for (path, name, contents) in load_user_templates(dir)? {
            tera.add_raw_template(&name, &contents)
                .map_err(|source| RenderError::Override { path, source })?;
        }
    }
    Ok(tera)
}

// ---------------------------------------------------------------------------
// ReportRenderer
// ---------------------------------------------------------------------------

/// Renders [`JobStatus`] records as human-readable reports.
///
/// `user_template_dir` may contain `job_status.txt.tera` and/or
/// `pull_status.txt.tera` overriding the embedded defaults. Create once and
/// reuse.
pub struct ReportRenderer {
    tera: Tera,
}

impl ReportRenderer {
    /// Renderer using the embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    pub fn with_overrides(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(ReportRenderer {
            tera: build_tera(user_template_dir)?,
        })
    }

    /// Report for one job, tasks listed in `order`.
    pub fn render_job(&self, status: &JobStatus, order: &[&str]) -> Result<String, RenderError> {
        let ctx = ReportContext::from_status(status, order);
        self.render_context(JOB_TEMPLATE, &ctx)
    }

    /// Report for the repository-pull record; its entries are keyed by file.
    pub fn render_pull(&self, status: &JobStatus) -> Result<String, RenderError> {
        let ctx = ReportContext::from_status(status, &[]);
        self.render_context(PULL_TEMPLATE, &ctx)
    }

    fn render_context(&self, template: &str, ctx: &ReportContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        self.tera
            .render(template, &tera_ctx)
            .map_err(|source| RenderError::Report {
                template: template.to_owned(),
                source,
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{JobFile, TaskStatus, MESSAGE_KEY};

    #[test]
    fn renderer_new_succeeds() {
        ReportRenderer::new().expect("ReportRenderer::new should succeed with embedded templates");
    }

    #[test]
    fn messages_are_not_html_escaped() {
        let mut status = JobStatus::new(JobFile::from("a.json"));
        let mut task = TaskStatus::default();
        task.fail();
        task.set_message(MESSAGE_KEY, "expected <layer> & \"style\"");
        status.tasks.insert("create_feature".into(), task);

        let out = ReportRenderer::new().unwrap().render_job(&status, &[]).unwrap();
        assert!(out.contains("expected <layer> & \"style\""), "{out}");
    }
}
