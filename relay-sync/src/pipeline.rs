//! Shared sync pipeline entrypoint used by the `sync` and `poll` commands.

use std::path::{Path, PathBuf};

use relay_core::Settings;
use relay_renderer::ReportRenderer;

use crate::changeset::ChangeSource;
use crate::engine::{Engine, RunSummary};
use crate::error::{io_err, SyncError};
use crate::registry::TaskRegistry;
use crate::status_store::StatusStore;

/// File under the status root holding the rendered report of the last pull.
pub const PULL_REPORT_FILE: &str = ".pull";

/// `<status root>/.pull`
pub fn pull_report_path(settings: &Settings) -> PathBuf {
    settings.status_path.join(PULL_REPORT_FILE)
}

/// Runs one sync cycle over the pending changes of `source`.
///
/// The source is committed only when the run succeeded, so a failed run sees
/// the same changeset on the next cycle. An `Err` means the changeset could
/// not be read or committed; the outcome of the run itself is reported by
/// [`RunSummary::check`].
pub fn sync_once(
    settings: &Settings,
    registry: &TaskRegistry,
    source: &mut dyn ChangeSource,
) -> Result<RunSummary, SyncError> {
    let changes = source.changes()?;
    if changes.is_empty() {
        tracing::debug!("No changes to synchronize");
    }

    let store = StatusStore::open(&settings.status_path);
    let summary = Engine::new(registry, store, settings).run(&changes);

    if let Err(e) = write_pull_report(&pull_report_path(settings), &summary) {
        tracing::warn!("Failed to write the pull report: {e}");
    }

    if summary.is_success() {
        source.commit(&changes)?;
    } else {
        tracing::warn!("Sync failed; {} change(s) will be retried", changes.len());
    }
    Ok(summary)
}

fn write_pull_report(path: &Path, summary: &RunSummary) -> Result<(), SyncError> {
    let report = ReportRenderer::new()?.render_pull(&summary.pull)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    std::fs::write(path, report).map_err(|e| io_err(path, e))?;
    Ok(())
}
