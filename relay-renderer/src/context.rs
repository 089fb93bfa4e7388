//! Report context: serializable rendering payload built from a [`JobStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::{JobStatus, StageStatus, TaskStatus};

use crate::error::RenderError;

/// Task types reported before the ordered main tasks.
pub const LEADING_TASK_TYPES: &[&str] = &["prepare"];

/// Rendering payload for one status record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportContext {
    pub file: String,
    pub succeeded: bool,
    pub last_process_time: String,
    pub tasks: Vec<TaskCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCtx {
    /// 1-based position in the report.
    pub index: usize,
    pub task_type: String,
    pub outcome: bool,
    pub ran: bool,
    pub shared: bool,
    pub last_process_time: String,
    pub messages: Vec<MessageCtx>,
    pub stages: Vec<StageCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCtx {
    pub name: String,
    pub status: bool,
    pub last_process_time: String,
    pub messages: Vec<MessageCtx>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCtx {
    pub key: String,
    pub value: String,
}

impl ReportContext {
    /// Builds a context listing tasks in `order`, preceded by
    /// [`LEADING_TASK_TYPES`]. Task types absent from both lists follow in
    /// name order.
    pub fn from_status(status: &JobStatus, order: &[&str]) -> Self {
        let mut keys: Vec<&str> = Vec::with_capacity(status.tasks.len());
        for key in LEADING_TASK_TYPES.iter().chain(order.iter()) {
            if status.tasks.contains_key(*key) && !keys.contains(key) {
                keys.push(*key);
            }
        }
        for key in status.tasks.keys() {
            if !keys.contains(&key.as_str()) {
                keys.push(key.as_str());
            }
        }

        let tasks = keys
            .into_iter()
            .filter_map(|key| status.tasks.get(key).map(|task| (key, task)))
            .enumerate()
            .map(|(i, (key, task))| task_ctx(i + 1, key, task))
            .collect();

        ReportContext {
            file: status.file.to_string(),
            succeeded: status.is_succeeded(),
            last_process_time: format_time(status.last_process_time),
            tasks,
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(|source| RenderError::Context {
            file: self.file.clone(),
            source,
        })
    }
}

fn task_ctx(index: usize, task_type: &str, task: &TaskStatus) -> TaskCtx {
    TaskCtx {
        index,
        task_type: task_type.to_owned(),
        outcome: task.outcome(),
        ran: task.ran(),
        shared: task.shared,
        last_process_time: format_time(task.last_process_time),
        messages: messages(task.messages.iter()),
        stages: task
            .stages
            .iter()
            .map(|(name, stage)| stage_ctx(name, stage))
            .collect(),
    }
}

fn stage_ctx(name: &str, stage: &StageStatus) -> StageCtx {
    StageCtx {
        name: name.to_owned(),
        status: stage.status,
        last_process_time: format_time(stage.last_process_time),
        messages: messages(stage.messages.iter()),
    }
}

fn messages<'a>(items: impl Iterator<Item = (&'a String, &'a String)>) -> Vec<MessageCtx> {
    items
        .map(|(key, value)| MessageCtx {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

/// `2024-05-01 03:12:44` or `-` when unset.
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_owned())
}
