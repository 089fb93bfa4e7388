//! The run plan: every job of this run and the tasks they require, merged by
//! task identity.
//!
//! Tasks are grouped by type in priority order, then keyed by name. The first
//! job to register a key owns the task; a second job registering the same key
//! turns it into a shared task bound to the first job's status slot, so one
//! execution satisfies both.

use std::collections::BTreeMap;

use relay_core::{Job, TaskType};

use crate::classifier::Requirement;
use crate::registry::{NotifyDefinition, PrepareDefinition, TaskDefinition};
use crate::status_store::{JobStatusId, StatusStore};

/// Handle to a job inside a [`RunPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(usize);

#[derive(Debug)]
pub struct PlannedJob {
    pub job: Job,
    /// `None` when no task type ever matched, so no status was loaded.
    pub status: Option<JobStatusId>,
}

#[derive(Debug, Clone)]
pub struct TaskInstance<'r> {
    pub job: JobId,
    pub definition: &'r TaskDefinition,
}

#[derive(Debug, Clone)]
pub enum TaskEntry<'r> {
    Single(TaskInstance<'r>),
    /// Ordered by job file, descending.
    Shared(Vec<TaskInstance<'r>>),
}

impl<'r> TaskEntry<'r> {
    pub fn instances(&self) -> &[TaskInstance<'r>] {
        match self {
            TaskEntry::Single(instance) => std::slice::from_ref(instance),
            TaskEntry::Shared(instances) => instances,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, TaskEntry::Shared(_))
    }
}

/// All tasks of one type, keyed by task name.
#[derive(Debug, Clone)]
pub struct TypeTasks<'r> {
    pub task_type: &'r TaskType,
    pub entries: BTreeMap<String, TaskEntry<'r>>,
}

#[derive(Debug, Default)]
pub struct RunPlan<'r> {
    jobs: Vec<PlannedJob>,
    tasks: BTreeMap<usize, TypeTasks<'r>>,
    prepare: Vec<(JobId, &'r PrepareDefinition)>,
    notify: Vec<(JobId, &'r NotifyDefinition)>,
    ignored: usize,
}

impl<'r> RunPlan<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&mut self, job: Job, status: Option<JobStatusId>) -> JobId {
        self.jobs.push(PlannedJob { job, status });
        JobId(self.jobs.len() - 1)
    }

    /// Merges one requirement of `job` into the plan.
    pub fn require(&mut self, job: JobId, requirement: Requirement<'r>, store: &mut StatusStore) {
        let instance = TaskInstance {
            job,
            definition: requirement.definition,
        };
        let type_tasks = self
            .tasks
            .entry(requirement.type_index)
            .or_insert_with(|| TypeTasks {
                task_type: requirement.task_type,
                entries: BTreeMap::new(),
            });

        let Some(entry) = type_tasks.entries.get_mut(&requirement.name) else {
            type_tasks
                .entries
                .insert(requirement.name, TaskEntry::Single(instance));
            return;
        };

        let owner = entry.instances()[0].job;
        let task_type = requirement.task_type.as_str();
        let statuses = (self.jobs[owner.0].status, self.jobs[job.0].status);
        if let (Some(owner_status), Some(job_status)) = statuses {
            let slot = store.task_slot(owner_status, task_type);
            store.task_mut(slot).shared = true;
            store.bind_task(job_status, task_type, slot);
        }

        let mut instances = entry.instances().to_vec();
        instances.push(instance);
        let jobs = &self.jobs;
        instances.sort_by(|a, b| jobs[b.job.0].job.file().cmp(jobs[a.job.0].job.file()));
        *entry = TaskEntry::Shared(instances);
    }

    pub fn prepare_with(&mut self, job: JobId, definition: &'r PrepareDefinition) {
        self.prepare.push((job, definition));
    }

    pub fn notify_with(&mut self, job: JobId, definition: &'r NotifyDefinition) {
        self.notify.push((job, definition));
    }

    /// Counts a file left out by the debug filters.
    pub fn ignore(&mut self) {
        self.ignored += 1;
    }

    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn job(&self, id: JobId) -> &PlannedJob {
        &self.jobs[id.0]
    }

    pub fn job_mut(&mut self, id: JobId) -> &mut PlannedJob {
        &mut self.jobs[id.0]
    }

    pub fn jobs(&self) -> &[PlannedJob] {
        &self.jobs
    }

    /// Task groups in priority order.
    pub fn tasks(&self) -> impl Iterator<Item = &TypeTasks<'r>> {
        self.tasks.values()
    }

    pub fn prepare_tasks(&self) -> &[(JobId, &'r PrepareDefinition)] {
        &self.prepare
    }

    pub fn notify_tasks(&self) -> &[(JobId, &'r NotifyDefinition)] {
        &self.notify
    }

    /// Number of distinct main tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.values().map(|t| t.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// One line per task, in execution order.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for type_tasks in self.tasks.values() {
            for (name, entry) in &type_tasks.entries {
                let files: Vec<&str> = entry
                    .instances()
                    .iter()
                    .map(|i| self.jobs[i.job.0].job.file().as_str())
                    .collect();
                let shared = if entry.is_shared() { " [shared]" } else { "" };
                lines.push(format!(
                    "{} {}{} <- {}",
                    type_tasks.task_type,
                    name,
                    shared,
                    files.join(", ")
                ));
            }
        }
        lines
    }
}
