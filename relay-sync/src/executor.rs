//! Plan execution: prepare, then main tasks in priority order, then notify.
//!
//! Failures stay inside the task that raised them. A job with a failed task
//! skips its remaining tasks for this run while other jobs continue.

use chrono::Utc;

use relay_core::{JobStatus, TaskType, MESSAGE_KEY};

use crate::error::error_chain;
use crate::plan::{PlannedJob, RunPlan};
use crate::registry::{TaskDefinition, NOTIFY_TASK_TYPE, PREPARE_TASK_TYPE};
use crate::status_store::StatusStore;

pub struct Executor<'s> {
    store: &'s mut StatusStore,
    executed: usize,
}

impl<'s> Executor<'s> {
    pub fn new(store: &'s mut StatusStore) -> Self {
        Executor { store, executed: 0 }
    }

    /// Number of main-task handler invocations so far.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Runs the prepare task of every job that has one. Failures are logged
    /// and leave the job unresolved.
    pub fn prepare(&mut self, plan: &mut RunPlan<'_>) {
        let prepare = plan.prepare_tasks().to_vec();
        for (id, definition) in prepare {
            let planned = plan.job_mut(id);
            tracing::debug!("Begin to run task {PREPARE_TASK_TYPE} for {}", planned.job.file());
            match definition.handler.prepare(&planned.job) {
                Ok(Some(fields)) => planned.job.resolve(fields),
                Ok(None) => {}
                Err(e) => {
                    let message = error_chain(e.as_ref());
                    tracing::error!("Failed to prepare {}: {message}", planned.job.file());
                    planned.job.mark_unresolved(message);
                }
            }
        }
    }

    /// Runs every planned task in priority order.
    pub fn run_main(&mut self, plan: &RunPlan<'_>) {
        for type_tasks in plan.tasks() {
            for (name, entry) in &type_tasks.entries {
                for instance in entry.instances() {
                    let planned = plan.job(instance.job);
                    self.execute_task(planned, type_tasks.task_type, name, instance.definition);
                }
            }
        }
    }

    /// Runs one task for one job; `true` if the task is succeeded afterwards.
    pub fn execute_task(
        &mut self,
        planned: &PlannedJob,
        task_type: &TaskType,
        name: &str,
        definition: &TaskDefinition,
    ) -> bool {
        let Some(job_status) = planned.status else {
            return false;
        };
        let slot = self.store.task_slot(job_status, task_type.as_str());
        if self.store.task(slot).is_succeeded() {
            return true;
        }
        // Stored failures are cleared on load, so this is a shared task that
        // another job already ran and failed in this run.
        if self.store.task(slot).is_failed() {
            return false;
        }
        if self.store.job_failed(job_status) {
            // Other jobs may still need the shared status; leave it to them.
            if self.store.task(slot).shared {
                let private = self.store.detach_task(job_status, task_type.as_str());
                self.store.task_mut(private).mark_ran();
            }
            tracing::debug!(
                "Skip task {task_type}({name}) for {}: job already failed",
                planned.job.file()
            );
            return false;
        }

        let now = Utc::now();
        self.store.touch(job_status, now);
        let status = self.store.task_mut(slot);
        status.touch(now);
        status.remove_message(MESSAGE_KEY);

        tracing::info!("Running task {task_type}({name}) for {}", planned.job.file());
        let result = definition.handler.run(&planned.job, definition, status);
        self.executed += 1;

        match result {
            Ok(()) => {
                if status.message(MESSAGE_KEY).is_none() {
                    status.set_message(MESSAGE_KEY, "succeed");
                }
                status.succeed();
                true
            }
            Err(e) => {
                let message = error_chain(e.as_ref());
                tracing::error!(
                    "Task {task_type}({name}) failed for {}: {message}",
                    planned.job.file()
                );
                status.fail();
                status.set_message(MESSAGE_KEY, message);
                false
            }
        }
    }

    /// Runs the notify task of every job that has one. Failures are logged.
    pub fn notify(&self, plan: &RunPlan<'_>) {
        for (id, definition) in plan.notify_tasks() {
            let planned = plan.job(*id);
            let status = match planned.status {
                Some(status) => self.store.snapshot(status),
                None => JobStatus::new(planned.job.file().clone()),
            };
            if let Err(e) = definition.handler.notify(&planned.job, &status) {
                tracing::warn!(
                    "Task {NOTIFY_TASK_TYPE} failed for {}: {}",
                    planned.job.file(),
                    error_chain(e.as_ref())
                );
            }
        }
    }
}
