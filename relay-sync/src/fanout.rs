//! Multi-target fan-out.
//!
//! [`Fanout`] wraps a per-target handler so one task runs against every
//! configured target. With a single target the handler is called directly and
//! no stage bookkeeping happens. With several, each target is a *stage* whose
//! outcome is recorded independently; a failing target never prevents the
//! remaining ones from being attempted, and succeeded stages are not re-run.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use relay_core::{Job, Target, TaskStatus, MESSAGE_KEY};

use crate::error::{error_chain, TaskError};
use crate::registry::{TaskDefinition, TaskHandler};

/// Runs a task against one target. `stage` is `None` in single-target mode.
pub trait TargetHandler: Send + Sync {
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
        target: &Target,
        stage: Option<&str>,
    ) -> Result<(), TaskError>;
}

impl<F> TargetHandler for F
where
    F: Fn(&Job, &TaskDefinition, &mut TaskStatus, &Target, Option<&str>) -> Result<(), TaskError>
        + Send
        + Sync,
{
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
        target: &Target,
        stage: Option<&str>,
    ) -> Result<(), TaskError> {
        self(job, definition, status, target, stage)
    }
}

/// Errors raised by the stages of one fan-out, in target order.
#[derive(Debug, Error)]
#[error("{}", .0.join("\n"))]
pub struct StageErrors(pub Vec<String>);

/// No target is configured for a fanned-out task.
#[derive(Debug, Error)]
#[error("no target is configured")]
pub struct NoTargets;

/// A [`TaskHandler`] applying a [`TargetHandler`] to every target.
pub struct Fanout {
    targets: Vec<Target>,
    handler: Arc<dyn TargetHandler>,
}

impl Fanout {
    pub fn new(targets: Vec<Target>, handler: Arc<dyn TargetHandler>) -> Self {
        Fanout { targets, handler }
    }

    /// Convenience: a shareable task handler over `targets`.
    pub fn handler(targets: &[Target], handler: Arc<dyn TargetHandler>) -> Arc<dyn TaskHandler> {
        Arc::new(Fanout::new(targets.to_vec(), handler))
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }
}

impl TaskHandler for Fanout {
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
    ) -> Result<(), TaskError> {
        match self.targets.as_slice() {
            [] => Err(NoTargets.into()),
            [target] => self.handler.run(job, definition, status, target, None),
            targets => {
                let mut errors = Vec::new();
                for target in targets {
                    let stage = target.name.as_str();
                    if status.is_stage_succeeded(stage) {
                        continue;
                    }
                    status.remove_stage_message(stage, MESSAGE_KEY);
                    match self.handler.run(job, definition, status, target, Some(stage)) {
                        Ok(()) => {
                            if status.stage_message(stage, MESSAGE_KEY).is_none() {
                                status.set_stage_message(stage, MESSAGE_KEY, "succeed");
                            }
                            status.succeed_stage(stage, Utc::now());
                        }
                        Err(e) => {
                            let message = error_chain(e.as_ref());
                            tracing::warn!(
                                "Task {} failed on target {stage}: {message}",
                                definition.task_type
                            );
                            status.fail_stage(stage, Utc::now());
                            status.set_stage_message(stage, MESSAGE_KEY, message.clone());
                            errors.push(message);
                        }
                    }
                }

                if !errors.is_empty() {
                    return Err(StageErrors(errors).into());
                }
                if status.all_stages_succeeded() {
                    status.clear_task_failed();
                } else {
                    status.task_failed();
                }
                Ok(())
            }
        }
    }
}
