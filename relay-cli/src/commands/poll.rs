//! `relay poll`: sync in a loop.

use std::thread::sleep;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use relay_sync::error_chain;

use super::sync::{print_summary, run_cycle};
use super::{CatalogArgs, Context};

/// Arguments for `relay poll`.
#[derive(Args, Debug)]
pub struct PollArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Seconds between cycles; defaults to the configured poll interval.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Run a single cycle and exit, like `sync` but never failing on job errors.
    #[arg(long)]
    pub once: bool,
}

impl PollArgs {
    pub fn run(self) -> Result<()> {
        let ctx = Context::load()?;
        ctx.init_tracing();
        let registry = ctx.registry(&self.catalog)?;
        let interval = Duration::from_secs(
            self.interval
                .filter(|secs| *secs > 0)
                .unwrap_or(ctx.settings.poll_interval),
        );

        loop {
            match run_cycle(&ctx, &registry) {
                Ok(summary) => {
                    if let Err(e) = summary.check() {
                        tracing::error!("{}", error_chain(&e));
                    }
                    if self.once {
                        print_summary(&summary);
                    }
                }
                Err(e) => tracing::error!("{e:#}"),
            }
            if self.once {
                return Ok(());
            }
            tracing::debug!("Sleeping {}s before the next cycle", interval.as_secs());
            sleep(interval);
        }
    }
}
