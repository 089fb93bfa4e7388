//! Persisted status records.
//!
//! # File format
//!
//! One JSON document per job file, stored at `<status root>/<job file>`:
//!
//! ```text
//! {
//!   "file": "kmi/layers/roads.json",
//!   "md5": "<content fingerprint>",
//!   "action": "publish",
//!   "status": true,
//!   "last_process_time": "2024-05-01T03:12:44Z",
//!   "tasks": {
//!     "create_feature": {
//!       "status": true,
//!       "shared": false,
//!       "last_process_time": "...",
//!       "messages": { "message": "succeed" },
//!       "stages": { "gs1.example.org": { "status": true, "messages": {...} } }
//!     }
//!   }
//! }
//! ```
//!
//! The `md5` key is kept for compatibility with older status trees; the value
//! is whatever [`crate::job::fingerprint`] produces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{JobAction, JobFile};

/// Key under which a task's primary message is stored.
pub const MESSAGE_KEY: &str = "message";

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

/// Outcome of one fan-out target for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    #[serde(default)]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Outcome record of one task for one job.
///
/// `status` is `None` until the task has been attempted. `task_status` is the
/// fan-out aggregate flag: a task can succeed as a whole while some
/// non-critical stages are still outstanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, StageStatus>,
    #[serde(skip)]
    ran: bool,
    #[serde(skip)]
    modified: bool,
}

impl TaskStatus {
    /// Rebuilds a task status from its persisted form.
    ///
    /// Stages that did not succeed are dropped. If the task itself did not
    /// succeed, everything but the surviving stages is cleared: failure detail
    /// from an earlier process is not meaningful now.
    pub fn restore(previous: TaskStatus) -> TaskStatus {
        let mut status = previous;
        status.stages.retain(|_, stage| stage.status);
        if status.is_not_succeeded() {
            status = TaskStatus {
                stages: status.stages,
                ..TaskStatus::default()
            };
        }
        status.ran = false;
        status.modified = false;
        status
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == Some(true)
    }

    /// `true` only if the task was attempted and failed.
    pub fn is_failed(&self) -> bool {
        self.status == Some(false)
    }

    /// `true` if the task failed or was never attempted.
    pub fn is_not_succeeded(&self) -> bool {
        !self.is_succeeded()
    }

    /// Aggregate outcome: the fan-out flag when present, else the status.
    pub fn outcome(&self) -> bool {
        self.task_status.or(self.status).unwrap_or(false)
    }

    pub fn succeed(&mut self) {
        self.status = Some(true);
        self.modified = true;
    }

    pub fn fail(&mut self) {
        self.status = Some(false);
        self.modified = true;
    }

    /// Flags that some stages are still outstanding without failing the task.
    pub fn task_failed(&mut self) {
        if self.task_status != Some(false) {
            self.task_status = Some(false);
            self.modified = true;
        }
    }

    pub fn clear_task_failed(&mut self) {
        if self.task_status.take().is_some() {
            self.modified = true;
        }
    }

    /// Whether the task was required and considered during this run.
    pub fn ran(&self) -> bool {
        self.ran
    }

    pub fn mark_ran(&mut self) {
        self.ran = true;
    }

    /// Whether any outcome or message changed during this run.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_process_time = Some(at);
    }

    pub fn message(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn set_message(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.messages.insert(key.into(), message.into());
        self.modified = true;
    }

    pub fn remove_message(&mut self, key: &str) {
        self.messages.remove(key);
        self.modified = true;
    }

    // -- stages -------------------------------------------------------------

    pub fn stage(&self, stage: &str) -> Option<&StageStatus> {
        self.stages.get(stage)
    }

    /// `false` for stages that failed or were never attempted.
    pub fn is_stage_succeeded(&self, stage: &str) -> bool {
        self.stages.get(stage).map(|s| s.status).unwrap_or(false)
    }

    /// `true` when every recorded stage succeeded (vacuously for none).
    pub fn all_stages_succeeded(&self) -> bool {
        self.stages.values().all(|s| s.status)
    }

    pub fn succeed_stage(&mut self, stage: &str, at: DateTime<Utc>) {
        let entry = self.stages.entry(stage.to_owned()).or_default();
        entry.status = true;
        entry.last_process_time = Some(at);
        self.modified = true;
    }

    pub fn fail_stage(&mut self, stage: &str, at: DateTime<Utc>) {
        let entry = self.stages.entry(stage.to_owned()).or_default();
        entry.status = false;
        entry.last_process_time = Some(at);
        self.modified = true;
    }

    pub fn stage_message(&self, stage: &str, key: &str) -> Option<&str> {
        self.stages
            .get(stage)
            .and_then(|s| s.messages.get(key))
            .map(String::as_str)
    }

    pub fn set_stage_message(
        &mut self,
        stage: &str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.stages
            .entry(stage.to_owned())
            .or_default()
            .messages
            .insert(key.into(), message.into());
        self.modified = true;
    }

    pub fn remove_stage_message(&mut self, stage: &str, key: &str) {
        if let Some(entry) = self.stages.get_mut(stage) {
            entry.messages.remove(key);
        }
        self.modified = true;
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Status record of one job file; also the on-disk document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub file: JobFile,
    #[serde(rename = "md5", default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<JobAction>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskStatus>,
    #[serde(default)]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process_time: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn new(file: JobFile) -> JobStatus {
        JobStatus {
            file,
            fingerprint: None,
            action: None,
            tasks: BTreeMap::new(),
            status: false,
            last_process_time: None,
        }
    }

    /// Every task succeeded (vacuously for a job with no tasks).
    pub fn is_succeeded(&self) -> bool {
        self.tasks.values().all(TaskStatus::is_succeeded)
    }

    /// At least one task was attempted and failed.
    pub fn is_failed(&self) -> bool {
        self.tasks.values().any(TaskStatus::is_failed)
    }

    pub fn is_not_succeeded(&self) -> bool {
        self.tasks.values().any(TaskStatus::is_not_succeeded)
    }

    /// At least one task changed during this run.
    pub fn is_processed(&self) -> bool {
        self.tasks.values().any(TaskStatus::is_modified)
    }

    /// Whether a stored record may be reused for content with `fingerprint`
    /// and `action`.
    pub fn matches(&self, fingerprint: &str, action: &JobAction) -> bool {
        self.fingerprint.as_deref() == Some(fingerprint) && self.action.as_ref() == Some(action)
    }
}
