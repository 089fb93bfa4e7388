//! Agent settings: a YAML file layer overlaid by environment variables.
//!
//! # Storage layout
//!
//! ```text
//! ~/.relay/
//!   config.yaml     (optional; every key may be omitted)
//!   status/         (default status root)
//!   snapshot/       (default snapshot of the last committed state)
//! ```
//!
//! # API pattern
//!
//! As with every path-rooted loader in this workspace:
//! - `load_at(home)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `load_at`
//!
//! Environment variables always win over the file. See [`ENV_VARS`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};

/// Poll interval used when none (or a non-positive one) is configured.
pub const DEFAULT_POLL_INTERVAL: u64 = 60;

/// Channel listened to when none is configured.
pub const DEFAULT_CHANNEL: &str = "kmi";

/// Environment variables understood by [`load_at`].
pub const ENV_VARS: &[&str] = &[
    "RELAY_STATUS_PATH",
    "RELAY_STATE_PATH",
    "RELAY_SNAPSHOT_PATH",
    "RELAY_CATALOG",
    "RELAY_DEBUG",
    "RELAY_ROLLBACK",
    "RELAY_INCLUDE",
    "RELAY_EXCLUDE",
    "RELAY_LISTEN_CHANNELS",
    "RELAY_SKIP_AUTH",
    "RELAY_SKIP_RULES",
    "RELAY_SKIP_DB",
    "RELAY_SKIP_CATALOG",
    "RELAY_TARGET_URL",
    "RELAY_TARGET_USERNAME",
    "RELAY_TARGET_PASSWORD",
    "RELAY_TARGET_CLUSTERING",
    "RELAY_POLL_INTERVAL",
];

// ---------------------------------------------------------------------------
// 1. File layer
// ---------------------------------------------------------------------------

/// `config.yaml` as written by operators. Lists may be given as YAML
/// sequences; the environment layer uses comma-separated strings instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsFile {
    pub status_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub debug: Option<bool>,
    pub rollback: Option<bool>,
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub listen_channels: Option<Vec<String>>,
    pub skip: Option<Skips>,
    pub targets: Option<TargetsFile>,
    pub poll_interval: Option<i64>,
}

/// Remote target credentials as configured, before broadcasting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsFile {
    pub urls: Vec<String>,
    pub usernames: Vec<String>,
    pub passwords: Vec<String>,
    pub clustering: bool,
}

/// Per-family enable/disable switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skips {
    pub auth: bool,
    pub rules: bool,
    pub db: bool,
    pub catalog: bool,
}

impl Skips {
    /// Looks up a switch by name; `None` for unknown names.
    pub fn get(&self, name: &str) -> Option<bool> {
        match name {
            "auth" => Some(self.auth),
            "rules" => Some(self.rules),
            "db" => Some(self.db),
            "catalog" => Some(self.catalog),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Resolved settings
// ---------------------------------------------------------------------------

/// One remote serving endpoint. `name` is the URL host and doubles as the
/// stage name in fan-out bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Include/exclude patterns applied to changed files in debug runs.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl FileFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<FileFilter, CoreError> {
        Ok(FileFilter {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    /// `true` if `file` must be left out of the run.
    pub fn ignores(&self, file: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(file) {
                return true;
            }
        }
        self.exclude
            .as_ref()
            .map(|exclude| exclude.is_match(file))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>, CoreError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| CoreError::Config(format!("invalid file pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| CoreError::Config(format!("invalid file patterns: {e}")))
}

/// Fully resolved agent settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of the per-job status tree.
    pub status_path: PathBuf,
    /// Working copy of the state repository.
    pub state_path: PathBuf,
    /// Snapshot of the state repository as of the last successful run.
    pub snapshot_path: PathBuf,
    /// Task catalog; `None` means `<home>/.relay/catalog.yaml`.
    pub catalog: Option<PathBuf>,
    pub debug: bool,
    /// Forces an overall failure so nothing is committed. Debug runs only.
    pub rollback: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub filter: FileFilter,
    pub listen_channels: BTreeSet<String>,
    pub skip: Skips,
    pub targets: Vec<Target>,
    pub clustering: bool,
    pub poll_interval: u64,
}

impl Settings {
    /// Targets a fan-out should visit. A clustered deployment shares its
    /// configuration, so only the first member is driven.
    pub fn effective_targets(&self) -> &[Target] {
        if self.clustering && !self.targets.is_empty() {
            &self.targets[..1]
        } else {
            &self.targets
        }
    }

    /// Whether `file` is left out of this run by the debug include/exclude
    /// patterns.
    pub fn ignores(&self, file: &str) -> bool {
        self.debug && self.filter.ignores(file)
    }

    /// Settings rooted at `home` with no file and no environment; used by tests.
    pub fn defaults_at(home: &Path) -> Settings {
        let base = relay_dir(home);
        Settings {
            status_path: base.join("status"),
            state_path: base.join("state"),
            snapshot_path: base.join("snapshot"),
            catalog: None,
            debug: false,
            rollback: false,
            include: Vec::new(),
            exclude: Vec::new(),
            filter: FileFilter::default(),
            listen_channels: BTreeSet::from([DEFAULT_CHANNEL.to_owned()]),
            skip: Skips::default(),
            targets: Vec::new(),
            clustering: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Catalog path, defaulting to `<home>/.relay/catalog.yaml`.
    pub fn catalog_path_at(&self, home: &Path) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| relay_dir(home).join("catalog.yaml"))
    }
}

// ---------------------------------------------------------------------------
// 3. Loading
// ---------------------------------------------------------------------------

/// `<home>/.relay/`
pub fn relay_dir(home: &Path) -> PathBuf {
    home.join(".relay")
}

/// `<home>/.relay/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    relay_dir(home).join("config.yaml")
}

/// Reads the optional settings file. A missing file is an empty layer.
pub fn read_file_at(home: &Path) -> Result<SettingsFile, CoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse { path, source })
}

/// Loads settings for `home`, overlaying the process environment.
pub fn load_at(home: &Path) -> Result<Settings, CoreError> {
    let file = read_file_at(home)?;
    resolve(home, file, |key| std::env::var(key).ok())
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, CoreError> {
    load_at(&home()?)
}

/// Resolves `file` overlaid by variables from `env` into [`Settings`].
pub fn resolve(
    home: &Path,
    file: SettingsFile,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, CoreError> {
    let defaults = Settings::defaults_at(home);
    let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let path_var = |key: &str| var(key).map(PathBuf::from);
    let flag_var = |key: &str| var(key).map(|v| parse_flag(&v));

    let status_path = path_var("RELAY_STATUS_PATH")
        .or(file.status_path)
        .unwrap_or(defaults.status_path);
    let state_path = path_var("RELAY_STATE_PATH")
        .or(file.state_path)
        .unwrap_or(defaults.state_path);
    let snapshot_path = path_var("RELAY_SNAPSHOT_PATH")
        .or(file.snapshot_path)
        .unwrap_or(defaults.snapshot_path);
    let catalog = path_var("RELAY_CATALOG").or(file.catalog);

    let debug = flag_var("RELAY_DEBUG").or(file.debug).unwrap_or(false);
    let rollback = debug && flag_var("RELAY_ROLLBACK").or(file.rollback).unwrap_or(false);

    let include = var("RELAY_INCLUDE")
        .map(|v| split_list(&v))
        .or(file.include)
        .unwrap_or_default();
    let exclude = var("RELAY_EXCLUDE")
        .map(|v| split_list(&v))
        .or(file.exclude)
        .unwrap_or_default();
    let filter = FileFilter::new(&include, &exclude)?;

    let listen_channels: BTreeSet<String> = var("RELAY_LISTEN_CHANNELS")
        .map(|v| split_list(&v))
        .or(file.listen_channels)
        .map(|channels| {
            channels
                .into_iter()
                .map(|c| c.trim().to_owned())
                .filter(|c| !c.is_empty())
                .collect::<BTreeSet<String>>()
        })
        .filter(|channels| !channels.is_empty())
        .unwrap_or(defaults.listen_channels);

    let file_skip = file.skip.unwrap_or_default();
    let skip = Skips {
        auth: flag_var("RELAY_SKIP_AUTH").unwrap_or(file_skip.auth),
        rules: flag_var("RELAY_SKIP_RULES").unwrap_or(file_skip.rules),
        db: flag_var("RELAY_SKIP_DB").unwrap_or(file_skip.db),
        catalog: flag_var("RELAY_SKIP_CATALOG").unwrap_or(file_skip.catalog),
    };

    let file_targets = file.targets.unwrap_or_default();
    let urls = var("RELAY_TARGET_URL")
        .map(|v| split_list(&v))
        .unwrap_or(file_targets.urls);
    let usernames = var("RELAY_TARGET_USERNAME")
        .map(|v| split_list(&v))
        .unwrap_or(file_targets.usernames);
    let passwords = var("RELAY_TARGET_PASSWORD")
        .map(|v| split_list(&v))
        .unwrap_or(file_targets.passwords);
    let clustering = flag_var("RELAY_TARGET_CLUSTERING").unwrap_or(file_targets.clustering);
    let targets = build_targets(&urls, &usernames, &passwords)?;

    let poll_interval = var("RELAY_POLL_INTERVAL")
        .map(|v| v.trim().parse::<i64>().unwrap_or(0))
        .or(file.poll_interval)
        .filter(|secs| *secs > 0)
        .map(|secs| secs as u64)
        .unwrap_or(DEFAULT_POLL_INTERVAL);

    Ok(Settings {
        status_path,
        state_path,
        snapshot_path,
        catalog,
        debug,
        rollback,
        include,
        exclude,
        filter,
        listen_channels,
        skip,
        targets,
        clustering,
        poll_interval,
    })
}

/// Pairs every URL with its credentials. A single username or password is
/// broadcast to every target; otherwise the counts must match.
pub fn build_targets(
    urls: &[String],
    usernames: &[String],
    passwords: &[String],
) -> Result<Vec<Target>, CoreError> {
    let urls: Vec<String> = urls
        .iter()
        .map(|u| u.trim().trim_end_matches('/').to_owned())
        .filter(|u| !u.is_empty())
        .collect();
    let usernames = broadcast("username", usernames, urls.len())?;
    let passwords = broadcast("password", passwords, urls.len())?;

    urls.into_iter()
        .zip(usernames)
        .zip(passwords)
        .map(|((url, username), password)| {
            let parsed = url::Url::parse(&url)
                .map_err(|e| CoreError::Config(format!("invalid target url '{url}': {e}")))?;
            let name = parsed
                .host_str()
                .ok_or_else(|| CoreError::Config(format!("target url '{url}' has no host")))?
                .to_owned();
            Ok(Target {
                name,
                url,
                username,
                password,
            })
        })
        .collect()
}

fn broadcast(what: &str, values: &[String], count: usize) -> Result<Vec<String>, CoreError> {
    let values: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    match values.len() {
        0 => Ok(vec![String::new(); count]),
        1 => Ok(vec![values[0].clone(); count]),
        n if n == count => Ok(values),
        n => Err(CoreError::Config(format!(
            "{n} target {what}s configured for {count} target urls; configure one {what} or one per target"
        ))),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1"
    )
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        for v in ["true", "YES", "on", "1"] {
            assert!(parse_flag(v), "{v}");
        }
        for v in ["false", "no", "off", "0", "maybe"] {
            assert!(!parse_flag(v), "{v}");
        }
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn include_filter_ignores_files_outside_patterns() {
        let filter = FileFilter::new(&["kmi/layers/*.json".into()], &[]).unwrap();
        assert!(!filter.ignores("kmi/layers/roads.json"));
        assert!(filter.ignores("kmi/workspaces/ws.json"));
    }

    #[test]
    fn exclude_filter_wins_over_include() {
        let filter = FileFilter::new(
            &["kmi/**".into()],
            &["kmi/layers/secret.json".into()],
        )
        .unwrap();
        assert!(filter.ignores("kmi/layers/secret.json"));
        assert!(!filter.ignores("kmi/layers/public.json"));
    }
}
