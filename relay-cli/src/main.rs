//! relay: state-repository synchronization agent.
//!
//! # Usage
//!
//! ```text
//! relay sync [--catalog PATH]
//! relay poll [--catalog PATH] [--interval SECS] [--once]
//! relay plan [--catalog PATH]
//! relay status [<file>] [--json] [--failed]
//! relay diff
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    diff::DiffArgs, plan::PlanArgs, poll::PollArgs, status::StatusArgs, sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Synchronize a state repository with the services it describes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the required tasks for the pending changeset once.
    Sync(SyncArgs),

    /// Sync repeatedly, sleeping between cycles.
    Poll(PollArgs),

    /// Show what a sync would run, without running or saving anything.
    Plan(PlanArgs),

    /// Show persisted job statuses.
    Status(StatusArgs),

    /// Show the pending changeset as unified diffs.
    Diff(DiffArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Poll(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Diff(args) => args.run(),
    }
}
