//! `relay sync`: one engine run over the pending changeset.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;

use relay_sync::{sync_once, RunSummary, TaskRegistry};

use super::{CatalogArgs, Context};

/// Arguments for `relay sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let ctx = Context::load()?;
        ctx.init_tracing();
        let registry = ctx.registry(&self.catalog)?;

        let summary = run_cycle(&ctx, &registry)?;
        print_summary(&summary);
        summary.check().context("sync failed")?;
        Ok(())
    }
}

/// One sync cycle against the configured state and snapshot directories.
pub(crate) fn run_cycle(ctx: &Context, registry: &TaskRegistry) -> Result<RunSummary> {
    let mut source = ctx.source();
    sync_once(&ctx.settings, registry, &mut source).with_context(|| {
        format!(
            "failed to read changes from '{}'",
            ctx.settings.state_path.display()
        )
    })
}

pub(crate) fn print_summary(summary: &RunSummary) {
    let changed = summary.pull.tasks.len();
    if changed == 0 {
        println!("✓ nothing to synchronize");
        return;
    }

    let mark = if summary.is_success() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{mark} {changed} changed file(s), {} job(s), {} task run(s)",
        summary.jobs.len(),
        summary.executed,
    );
    for file in &summary.failed {
        println!("  {}  {}", "failed".red(), file);
    }
    if summary.ignored > 0 {
        println!("  {} file(s) ignored by debug filters", summary.ignored);
    }
}
