//! `relay plan`: classify the pending changeset without running anything.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use relay_core::MESSAGE_KEY;
use relay_sync::{ChangeSource, Engine, StatusStore};

use super::{CatalogArgs, Context};

/// Arguments for `relay plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let ctx = Context::load()?;
        ctx.init_tracing();
        let registry = ctx.registry(&self.catalog)?;
        let changes = ctx
            .source()
            .changes()
            .context("failed to read the pending changeset")?;
        if changes.is_empty() {
            println!("No pending changes.");
            return Ok(());
        }

        // Nothing is saved: the store only serves to read previous outcomes.
        let store = StatusStore::open(&ctx.settings.status_path);
        let mut engine = Engine::new(&registry, store, &ctx.settings);
        let plan = engine.plan(&changes);

        let pull = engine.store().snapshot(engine.store().pull_status());
        for change in &changes {
            let entry = pull.tasks.get(change.file.as_str());
            let message = entry
                .and_then(|e| e.message(MESSAGE_KEY))
                .unwrap_or("ignored in debug mode");
            let failed = entry.is_some_and(|e| e.is_failed());
            let line = format!("{} {}  {}", change.kind.code(), change.file, message);
            if failed {
                println!("{}", line.as_str().red());
            } else {
                println!("{line}");
            }
        }

        if plan.is_empty() {
            println!("\nNo tasks to run.");
            return Ok(());
        }
        println!("\n{} task(s) to run:", plan.task_count());
        for line in plan.describe() {
            println!("  {line}");
        }
        Ok(())
    }
}
