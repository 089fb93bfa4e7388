//! `relay diff`: the pending changeset as unified diffs.

use anyhow::{Context as _, Result};
use clap::Args;

use relay_sync::diff::diff_changes;
use relay_sync::ChangeSource;

use super::Context;

/// Arguments for `relay diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Only show files whose path starts with this prefix.
    pub prefix: Option<String>,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let ctx = Context::load()?;
        let mut changes = ctx
            .source()
            .changes()
            .context("failed to read the pending changeset")?;
        if let Some(prefix) = &self.prefix {
            changes.retain(|change| change.file.as_str().starts_with(prefix.as_str()));
        }

        let diffs = diff_changes(&changes);
        if diffs.is_empty() {
            println!("No pending changes.");
            return Ok(());
        }

        for diff in diffs {
            if diff.unified_diff.is_empty() {
                println!("{} {} (previous content unavailable)", diff.kind.code(), diff.file);
                continue;
            }
            print!("{}", diff.unified_diff);
            if !diff.unified_diff.ends_with('\n') {
                println!();
            }
        }
        Ok(())
    }
}
