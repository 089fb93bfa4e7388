//! Subcommand implementations and the context they share.

pub mod diff;
pub mod plan;
pub mod poll;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;

use relay_catalog::Catalog;
use relay_core::{config, Settings};
use relay_sync::registry::DEFAULT_TASK_ORDER;
use relay_sync::{SnapshotSource, TaskRegistry};

/// `--catalog` override shared by the commands that run the registry.
#[derive(Args, Debug, Default)]
pub struct CatalogArgs {
    /// Task catalog to load instead of the configured one.
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,
}

/// Home directory and resolved settings.
pub struct Context {
    pub home: PathBuf,
    pub settings: Settings,
}

impl Context {
    pub fn load() -> Result<Context> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let settings = config::load_at(&home).context("failed to load relay settings")?;
        Ok(Context { home, settings })
    }

    fn catalog_path(&self, args: &CatalogArgs) -> PathBuf {
        args.catalog
            .clone()
            .unwrap_or_else(|| self.settings.catalog_path_at(&self.home))
    }

    fn load_catalog(&self, path: &Path) -> Result<Catalog> {
        Catalog::load(path, &self.settings)
            .with_context(|| format!("failed to load catalog '{}'", path.display()))
    }

    /// Loads the catalog and builds the task registry from it.
    pub fn registry(&self, args: &CatalogArgs) -> Result<TaskRegistry> {
        let path = self.catalog_path(args);
        self.load_catalog(&path)?
            .registry()
            .with_context(|| format!("invalid task order in '{}'", path.display()))
    }

    /// Task order for reports. Falls back to the built-in order when no
    /// catalog was given and none exists at the configured path.
    pub fn task_order(&self, args: &CatalogArgs) -> Result<Vec<String>> {
        let path = self.catalog_path(args);
        if args.catalog.is_none() && !path.exists() {
            return Ok(DEFAULT_TASK_ORDER.iter().map(|t| (*t).to_owned()).collect());
        }
        Ok(self.load_catalog(&path)?.order().to_vec())
    }

    pub fn source(&self) -> SnapshotSource {
        SnapshotSource::new(&self.settings.state_path, &self.settings.snapshot_path)
    }

    /// Installs the log subscriber; `RUST_LOG` wins over the debug switch.
    pub fn init_tracing(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let default = if self.settings.debug { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
