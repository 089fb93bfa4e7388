//! Job classification: which task types does a changed file require?
//!
//! For every task type in priority order, the first definition whose selector
//! accepts the job is chosen. A task whose stored status already succeeded
//! adds no work, unless an earlier type of the same job is outstanding; from
//! then on every matching type is required. Any error aborts the job as a
//! whole so no partial task set is merged into the run.

use relay_core::{Job, JobAction, JobFile, Settings, TaskType, MESSAGE_KEY};

use crate::changeset::FileChange;
use crate::error::{error_chain, TaskError};
use crate::registry::{NotifyDefinition, PrepareDefinition, TaskDefinition, TaskRegistry};
use crate::status_store::{JobStatusId, StatusStore};

/// One task a job requires in this run.
#[derive(Debug, Clone)]
pub struct Requirement<'r> {
    /// Priority of the task type; lower runs first.
    pub type_index: usize,
    pub task_type: &'r TaskType,
    /// Identity key; jobs producing the same key share the task.
    pub name: String,
    pub definition: &'r TaskDefinition,
}

/// Result of classifying one changed file.
#[derive(Debug)]
pub enum Classification<'r> {
    /// Left out by the debug include/exclude filters.
    Ignored,
    /// The content needed to classify the file is not available.
    Unreadable,
    /// The job's effective action is `none`.
    NoAction { job: Job },
    /// Classified successfully. No tasks means already synchronized.
    Ready {
        job: Job,
        status: Option<JobStatusId>,
        tasks: Vec<Requirement<'r>>,
        prepare: Option<&'r PrepareDefinition>,
        notify: Option<&'r NotifyDefinition>,
    },
    /// Parsing or classification failed; no task of the job runs.
    Failed {
        file: JobFile,
        job: Option<Job>,
        status: Option<JobStatusId>,
        error: String,
        notify: Option<&'r NotifyDefinition>,
    },
}

/// Message recorded for a job whose classification failed.
pub fn preprocess_failure(error: &str) -> String {
    format!("Preprocess the file failed. err = {error}")
}

pub struct Classifier<'r> {
    registry: &'r TaskRegistry,
    settings: &'r Settings,
}

impl<'r> Classifier<'r> {
    pub fn new(registry: &'r TaskRegistry, settings: &'r Settings) -> Self {
        Classifier { registry, settings }
    }

    pub fn classify(&self, change: &FileChange, store: &mut StatusStore) -> Classification<'r> {
        if self.settings.ignores(change.file.as_str()) {
            tracing::debug!("Ignore file {} in debug mode", change.file);
            return Classification::Ignored;
        }
        let Some(content) = &change.content else {
            return Classification::Unreadable;
        };

        let mut job = match Job::parse(&change.file, change.action(), content) {
            Ok(job) => job,
            Err(e) => {
                let error = error_chain(&e);
                tracing::error!("Failed to parse {}: {error}", change.file);
                return Classification::Failed {
                    file: change.file.clone(),
                    job: None,
                    status: None,
                    error,
                    notify: None,
                };
            }
        };
        if *job.action() == JobAction::None {
            return Classification::NoAction { job };
        }

        let mut status = None;
        match self.requirements(&mut job, content, store, &mut status) {
            Ok(tasks) => {
                let (prepare, notify) = if tasks.is_empty() {
                    (None, None)
                } else {
                    (self.find_prepare(&job), self.find_notify(&job))
                };
                Classification::Ready {
                    job,
                    status,
                    tasks,
                    prepare,
                    notify,
                }
            }
            Err(e) => {
                let error = error_chain(e.as_ref());
                tracing::error!("Failed to classify {}: {error}", change.file);
                let notify = self.find_notify(&job);
                Classification::Failed {
                    file: change.file.clone(),
                    job: Some(job),
                    status,
                    error,
                    notify,
                }
            }
        }
    }

    fn requirements(
        &self,
        job: &mut Job,
        content: &[u8],
        store: &mut StatusStore,
        status: &mut Option<JobStatusId>,
    ) -> Result<Vec<Requirement<'r>>, TaskError> {
        let channels = &self.settings.listen_channels;
        let mut tasks = Vec::new();
        let mut job_failed = false;

        for (type_index, task_type, definitions) in self.registry.definitions() {
            let Some(definition) = definitions
                .iter()
                .find(|d| d.selector.applies(&*job, channels))
            else {
                continue;
            };
            if definition.family().supports_channel {
                let channel = job.file().segments()[0].to_owned();
                job.set_channel(&channel);
            }

            let status_id = match *status {
                Some(id) => id,
                None => {
                    let id = store.load(job.file(), job.action(), content)?;
                    *status = Some(id);
                    id
                }
            };
            let slot = store.task_slot(status_id, task_type.as_str());
            store.task_mut(slot).mark_ran();
            if !job_failed && store.task(slot).is_succeeded() {
                continue;
            }
            job_failed = true;

            match definition.task_name(job) {
                Ok(name) => tasks.push(Requirement {
                    type_index,
                    task_type,
                    name,
                    definition,
                }),
                Err(e) => {
                    let task = store.task_mut(slot);
                    task.fail();
                    task.set_message(MESSAGE_KEY, preprocess_failure(&error_chain(e.as_ref())));
                    return Err(e);
                }
            }
        }
        Ok(tasks)
    }

    fn find_prepare(&self, job: &Job) -> Option<&'r PrepareDefinition> {
        let channels = &self.settings.listen_channels;
        self.registry
            .prepare()
            .iter()
            .find(|p| p.selector.applies(job, channels))
    }

    fn find_notify(&self, job: &Job) -> Option<&'r NotifyDefinition> {
        let channels = &self.settings.listen_channels;
        self.registry
            .notify()
            .iter()
            .find(|n| n.selector.applies(job, channels))
    }
}
