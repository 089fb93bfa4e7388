//! relay core library: domain types, job parsing, status records, settings.
//!
//! - [`types`]: newtypes and action enums
//! - [`job`]: [`Job`] parsing, action normalisation, fingerprints
//! - [`status`]: persisted [`JobStatus`] / [`TaskStatus`] / [`StageStatus`]
//! - [`config`]: [`Settings`] from `~/.relay/config.yaml` plus environment
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod job;
pub mod status;
pub mod types;

pub use config::{Settings, Skips, Target};
pub use error::CoreError;
pub use job::{fingerprint, Job, Resolution};
pub use status::{JobStatus, StageStatus, TaskStatus, MESSAGE_KEY};
pub use types::{ChangeKind, FileAction, JobAction, JobFile, TaskType};
