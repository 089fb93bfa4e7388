//! # relay-sync
//!
//! Job classification, shared-task scheduling and resumable execution.
//!
//! Build a [`TaskRegistry`] from task providers, then call [`sync_once`] with
//! a [`ChangeSource`] to classify the pending changes, run the required tasks
//! and persist their outcome in the status store.

pub mod changeset;
pub mod classifier;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod status_store;

pub use changeset::{ChangeSource, FileChange, SnapshotSource, StaticChanges};
pub use engine::{Engine, RunSummary};
pub use error::{error_chain, SyncError, TaskError};
pub use fanout::{Fanout, TargetHandler};
pub use pipeline::sync_once;
pub use registry::{
    field_name, handler, JobFamily, NotifyDefinition, PrepareDefinition, TaskDefinition,
    TaskHandler, TaskProvider, TaskRegistry,
};
pub use status_store::StatusStore;
