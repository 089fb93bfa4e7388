//! The sync engine: one run over one changeset.
//!
//! A run initializes the providers, classifies every changed file, merges the
//! required tasks into a [`RunPlan`] and executes it. Saving statuses, sending
//! notifications and resetting providers always happen once classification
//! started, whatever the outcome of the main phase. The aggregate outcome is
//! reported by [`RunSummary::check`].

use chrono::Utc;

use relay_core::{JobFile, JobStatus, Settings, MESSAGE_KEY};

use crate::changeset::FileChange;
use crate::classifier::{preprocess_failure, Classification, Classifier};
use crate::error::{error_chain, SyncError};
use crate::executor::Executor;
use crate::plan::RunPlan;
use crate::registry::TaskRegistry;
use crate::status_store::StatusStore;

pub const READ_FAILED: &str = "Failed to read file content, ignored.";
pub const NO_ACTION: &str = "No action is required.";
pub const READY: &str = "Ready to synchronize";
pub const ALREADY_SYNCHRONIZED: &str = "Already synchronized or no need to synchronize";

/// Pull-entry message key holding the job's effective action.
pub const ACTION_KEY: &str = "action";

/// What one run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The repository-pull record; one entry per changed file.
    pub pull: JobStatus,
    /// Status of every job classified in this run.
    pub jobs: Vec<JobStatus>,
    pub failed: Vec<JobFile>,
    pub ignored: usize,
    /// Main-task handler invocations.
    pub executed: usize,
    pub rollback: bool,
    pub initialize_error: Option<String>,
    pub save_error: Option<String>,
}

impl RunSummary {
    fn new(rollback: bool) -> Self {
        RunSummary {
            pull: JobStatus::new(JobFile::from(crate::status_store::PULL_STATUS_FILE)),
            jobs: Vec::new(),
            failed: Vec::new(),
            ignored: 0,
            executed: 0,
            rollback,
            initialize_error: None,
            save_error: None,
        }
    }

    /// The aggregate outcome of the run.
    ///
    /// Infrastructure failures come first, then the files that ended
    /// non-succeeded, then debug-ignored files, then the rollback switch.
    pub fn check(&self) -> Result<(), SyncError> {
        if let Some(e) = &self.initialize_error {
            return Err(SyncError::Initialize(e.clone()));
        }
        if let Some(e) = &self.save_error {
            return Err(SyncError::Persist(e.clone()));
        }
        if !self.failed.is_empty() {
            return Err(SyncError::JobsFailed {
                files: self.failed.clone(),
            });
        }
        if self.ignored > 0 {
            return Err(SyncError::Ignored(self.ignored));
        }
        if self.rollback {
            return Err(SyncError::Rollback);
        }
        Ok(())
    }

    pub fn into_result(self) -> Result<RunSummary, SyncError> {
        self.check().map(|()| self)
    }

    pub fn is_success(&self) -> bool {
        self.check().is_ok()
    }
}

pub struct Engine<'r> {
    registry: &'r TaskRegistry,
    settings: &'r Settings,
    store: StatusStore,
}

impl<'r> Engine<'r> {
    pub fn new(registry: &'r TaskRegistry, store: StatusStore, settings: &'r Settings) -> Self {
        Engine {
            registry,
            settings,
            store,
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Classifies `changes` without running anything or saving statuses.
    pub fn plan(&mut self, changes: &[FileChange]) -> RunPlan<'r> {
        let classifier = Classifier::new(self.registry, self.settings);
        let mut plan = RunPlan::new();

        for change in changes {
            match classifier.classify(change, &mut self.store) {
                Classification::Ignored => plan.ignore(),
                Classification::Unreadable => {
                    tracing::warn!("Failed to read the content of {}, ignored", change.file);
                    self.record_pull(&change.file, None, true, READ_FAILED);
                }
                Classification::NoAction { job } => {
                    self.record_pull(&change.file, Some(job.action().as_str()), true, NO_ACTION);
                }
                Classification::Ready {
                    job,
                    status,
                    tasks,
                    prepare,
                    notify,
                } => {
                    let action = job.action().to_string();
                    if tasks.is_empty() {
                        self.record_pull(&change.file, Some(&action), true, ALREADY_SYNCHRONIZED);
                        continue;
                    }
                    self.record_pull(&change.file, Some(&action), true, READY);
                    let id = plan.add_job(job, status);
                    for requirement in tasks {
                        plan.require(id, requirement, &mut self.store);
                    }
                    if let Some(prepare) = prepare {
                        plan.prepare_with(id, prepare);
                    }
                    if let Some(notify) = notify {
                        plan.notify_with(id, notify);
                    }
                }
                Classification::Failed {
                    file,
                    job,
                    status,
                    error,
                    notify,
                } => {
                    let action = job.as_ref().map(|j| j.action().to_string());
                    self.record_pull(&file, action.as_deref(), false, &preprocess_failure(&error));
                    if let (Some(job), Some(notify)) = (job, notify) {
                        let id = plan.add_job(job, status);
                        plan.notify_with(id, notify);
                    }
                }
            }
        }
        plan
    }

    fn record_pull(&mut self, file: &JobFile, action: Option<&str>, succeeded: bool, message: &str) {
        let pull = self.store.pull_status();
        let slot = self.store.task_slot(pull, file.as_str());
        let now = Utc::now();
        self.store.touch(pull, now);
        let entry = self.store.task_mut(slot);
        entry.mark_ran();
        entry.touch(now);
        if let Some(action) = action {
            entry.set_message(ACTION_KEY, action);
        }
        entry.set_message(MESSAGE_KEY, message);
        if succeeded {
            entry.succeed();
        } else {
            entry.fail();
        }
    }

    /// Runs the whole pipeline over `changes`.
    pub fn run(mut self, changes: &[FileChange]) -> RunSummary {
        let mut summary = RunSummary::new(self.settings.rollback);

        if let Err(e) = self.registry.initialize() {
            let message = error_chain(e.as_ref());
            tracing::error!("Failed to initialize: {message}");
            summary.initialize_error = Some(message);
            self.registry.reset();
            summary.pull = self.store.snapshot(self.store.pull_status());
            return summary;
        }

        let mut plan = self.plan(changes);
        tracing::info!(
            "{} file(s) changed, {} task(s) to run",
            changes.len(),
            plan.task_count()
        );
        for line in plan.describe() {
            tracing::debug!("  {line}");
        }

        let mut executor = Executor::new(&mut self.store);
        executor.prepare(&mut plan);
        executor.run_main(&plan);
        summary.executed = executor.executed();

        match self.store.save_all() {
            Ok(written) => tracing::debug!("Saved {written} status file(s)"),
            Err(e) => summary.save_error = Some(e.to_string()),
        }
        Executor::new(&mut self.store).notify(&plan);
        self.registry.reset();

        summary.ignored = plan.ignored();
        summary.failed = self.store.failed_jobs();
        summary.pull = self.store.snapshot(self.store.pull_status());
        summary.jobs = self
            .store
            .job_ids()
            .map(|id| self.store.snapshot(id))
            .collect();
        if summary.failed.is_empty() {
            tracing::info!("Executed {} task(s), all files synchronized", summary.executed);
        } else {
            tracing::warn!(
                "Executed {} task(s), {} file(s) failed",
                summary.executed,
                summary.failed.len()
            );
        }
        summary
    }
}
