//! Task registry: the static catalog of task definitions.
//!
//! A registry is assembled once at startup from every task-providing
//! collaborator and handed to the [`Engine`](crate::Engine) as an immutable
//! value. There is no global registration state.
//!
//! # Building
//!
//! ```rust
//! use std::sync::Arc;
//! use relay_sync::registry::{handler, field_name, JobFamily, TaskDefinition, TaskRegistry};
//!
//! let layers = Arc::new(JobFamily::new("layer", field_name(&["workspace", "name"])));
//! let mut builder = TaskRegistry::builder(["create_workspace", "create_feature"]).unwrap();
//! builder
//!     .task(TaskDefinition::new(
//!         "create_feature",
//!         layers,
//!         handler(|_job, _def, _status| Ok(())),
//!     ))
//!     .unwrap();
//! let registry = builder.build();
//! assert_eq!(registry.order().len(), 2);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use relay_core::{Job, JobAction, JobStatus, TaskStatus, TaskType};

use crate::error::{SyncError, TaskError};

/// Task type of prepare definitions, as logged.
pub const PREPARE_TASK_TYPE: &str = "prepare";

/// Task type of notify definitions, as logged.
pub const NOTIFY_TASK_TYPE: &str = "send_notify";

/// Global task priority order: database work first, then catalog resources,
/// then caches, then previews and cleanup.
pub const DEFAULT_TASK_ORDER: &[&str] = &[
    "create_postgis_extension",
    "create_db_schema",
    "move_outdated_table",
    "restore_table",
    "restore_foreignkey",
    "create_access_view",
    "drop_outdated_table",
    "drop_table",
    "delete_dbfile",
    "update_access_rules",
    "load_gs_stylefile",
    "create_workspace",
    "delete_feature",
    "delete_datastore",
    "create_datastore",
    "update_wmsstore",
    "update_wmslayer",
    "update_layergroup",
    "remove_layergroup",
    "remove_wmslayer",
    "remove_wmsstore",
    "create_feature",
    "create_style",
    "set_feature_styles",
    "update_gwc",
    "empty_gwc",
    "reload_geoserver",
    "purge_fastly_cache",
    "get_layer_preview",
    "send_layer_preview",
    "delete_dumpfile",
];

// ---------------------------------------------------------------------------
// 1. Function values
// ---------------------------------------------------------------------------

/// Predicate over a parsed job.
pub type JobPredicate = Arc<dyn Fn(&Job) -> bool + Send + Sync>;

/// Predicate over the last path segment of a job file.
pub type FilePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Computes a task's identity key. Failing is a classification error.
pub type NameFn = Arc<dyn Fn(&Job) -> Result<String, TaskError> + Send + Sync>;

/// Provider lifecycle hook run around every sync.
pub type HookFn = Arc<dyn Fn() -> Result<(), TaskError> + Send + Sync>;

/// Name function joining the given fields with `:`, e.g. `ws:roads`.
///
/// A missing field fails the name, and with it the classification of the job.
pub fn field_name(fields: &[&str]) -> NameFn {
    let fields: Vec<String> = fields.iter().map(|f| (*f).to_owned()).collect();
    Arc::new(move |job: &Job| {
        let mut parts = Vec::with_capacity(fields.len());
        for field in &fields {
            match job.display_field(field) {
                Some(value) => parts.push(value),
                None => {
                    return Err(format!("job {} has no '{field}' field", job.file()).into())
                }
            }
        }
        Ok(parts.join(":"))
    })
}

// ---------------------------------------------------------------------------
// 2. Handlers
// ---------------------------------------------------------------------------

/// Executes one task for one job, recording detail in `status`.
///
/// Handlers must be idempotent: a task may be re-run after an interruption
/// or when a shared task is detached from a failing job.
pub trait TaskHandler: Send + Sync {
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
    ) -> Result<(), TaskError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Job, &TaskDefinition, &mut TaskStatus) -> Result<(), TaskError> + Send + Sync,
{
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
    ) -> Result<(), TaskError> {
        self(job, definition, status)
    }
}

/// Wraps a closure as a shareable [`TaskHandler`].
pub fn handler<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(&Job, &TaskDefinition, &mut TaskStatus) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Best-effort enrichment run before the main phase. Returned fields resolve
/// the job.
pub trait PrepareHandler: Send + Sync {
    fn prepare(&self, job: &Job) -> Result<Option<Map<String, Value>>, TaskError>;
}

impl<F> PrepareHandler for F
where
    F: Fn(&Job) -> Result<Option<Map<String, Value>>, TaskError> + Send + Sync,
{
    fn prepare(&self, job: &Job) -> Result<Option<Map<String, Value>>, TaskError> {
        self(job)
    }
}

/// Best-effort telemetry run after statuses are saved.
pub trait NotifyHandler: Send + Sync {
    fn notify(&self, job: &Job, status: &JobStatus) -> Result<(), TaskError>;
}

impl<F> NotifyHandler for F
where
    F: Fn(&Job, &JobStatus) -> Result<(), TaskError> + Send + Sync,
{
    fn notify(&self, job: &Job, status: &JobStatus) -> Result<(), TaskError> {
        self(job, status)
    }
}

// ---------------------------------------------------------------------------
// 3. Job families and selectors
// ---------------------------------------------------------------------------

/// Decides whether a changed file belongs to a family of jobs at all,
/// independent of any specific task type.
#[derive(Clone)]
pub struct JobFamily {
    pub job_type: String,
    /// The first path segment is a channel; the folder is the second one.
    pub supports_channel: bool,
    pub folder: Option<String>,
    pub action: Option<JobAction>,
    pub is_job_file: Option<FilePredicate>,
    pub is_valid_job: Option<JobPredicate>,
    pub name: NameFn,
}

impl JobFamily {
    pub fn new(job_type: impl Into<String>, name: NameFn) -> Self {
        JobFamily {
            job_type: job_type.into(),
            supports_channel: false,
            folder: None,
            action: None,
            is_job_file: None,
            is_valid_job: None,
            name,
        }
    }

    pub fn with_channels(mut self) -> Self {
        self.supports_channel = true;
        self
    }

    pub fn in_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn for_action(mut self, action: JobAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn job_files(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.is_job_file = Some(Arc::new(predicate));
        self
    }

    pub fn valid_when(mut self, predicate: impl Fn(&Job) -> bool + Send + Sync + 'static) -> Self {
        self.is_valid_job = Some(Arc::new(predicate));
        self
    }

    /// Channel, folder, action and file/validity checks, in that order.
    pub fn accepts(&self, job: &Job, channels: &BTreeSet<String>) -> bool {
        let segments = job.file().segments();
        if self.supports_channel {
            if segments.len() < 2 || !channels.contains(segments[0]) {
                return false;
            }
            if let Some(folder) = &self.folder {
                if segments[1] != folder.as_str() {
                    return false;
                }
            }
        } else if let Some(folder) = &self.folder {
            if segments[0] != folder.as_str() {
                return false;
            }
        }

        if let Some(action) = &self.action {
            if job.action() != action {
                return false;
            }
        }

        if let Some(is_job_file) = &self.is_job_file {
            let last = segments.last().copied().unwrap_or_default();
            if !is_job_file(last) {
                return false;
            }
        }

        match &self.is_valid_job {
            Some(is_valid) => is_valid(job),
            None => true,
        }
    }
}

impl fmt::Debug for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFamily")
            .field("job_type", &self.job_type)
            .field("supports_channel", &self.supports_channel)
            .field("folder", &self.folder)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// A job family narrowed by an optional per-definition filter.
#[derive(Clone)]
pub struct Selector {
    pub family: Arc<JobFamily>,
    pub filter: Option<JobPredicate>,
}

impl Selector {
    pub fn new(family: Arc<JobFamily>) -> Self {
        Selector {
            family,
            filter: None,
        }
    }

    pub fn applies(&self, job: &Job, channels: &BTreeSet<String>) -> bool {
        if !self.family.accepts(job, channels) {
            return false;
        }
        match &self.filter {
            Some(filter) => filter(job),
            None => true,
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("family", &self.family)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// 4. Definitions
// ---------------------------------------------------------------------------

/// Binds a task type to a job family, an inclusion filter, a naming function
/// and a handler.
#[derive(Clone)]
pub struct TaskDefinition {
    pub task_type: TaskType,
    pub selector: Selector,
    /// Overrides the family's name function.
    pub name: Option<NameFn>,
    pub handler: Arc<dyn TaskHandler>,
}

impl TaskDefinition {
    pub fn new(
        task_type: impl Into<TaskType>,
        family: Arc<JobFamily>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        TaskDefinition {
            task_type: task_type.into(),
            selector: Selector::new(family),
            name: None,
            handler,
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&Job) -> bool + Send + Sync + 'static) -> Self {
        self.selector.filter = Some(Arc::new(filter));
        self
    }

    pub fn named(mut self, name: NameFn) -> Self {
        self.name = Some(name);
        self
    }

    pub fn family(&self) -> &JobFamily {
        &self.selector.family
    }

    /// The task's identity key for `job`.
    pub fn task_name(&self, job: &Job) -> Result<String, TaskError> {
        match &self.name {
            Some(name) => name(job),
            None => (self.selector.family.name)(job),
        }
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("task_type", &self.task_type)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// A prepare task: at most one runs per job that has main work to do.
#[derive(Clone)]
pub struct PrepareDefinition {
    pub selector: Selector,
    pub handler: Arc<dyn PrepareHandler>,
}

impl PrepareDefinition {
    pub fn new(family: Arc<JobFamily>, handler: Arc<dyn PrepareHandler>) -> Self {
        PrepareDefinition {
            selector: Selector::new(family),
            handler,
        }
    }
}

impl fmt::Debug for PrepareDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepareDefinition")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

/// A notify task: at most one runs per classified job.
#[derive(Clone)]
pub struct NotifyDefinition {
    pub selector: Selector,
    pub handler: Arc<dyn NotifyHandler>,
}

impl NotifyDefinition {
    pub fn new(family: Arc<JobFamily>, handler: Arc<dyn NotifyHandler>) -> Self {
        NotifyDefinition {
            selector: Selector::new(family),
            handler,
        }
    }
}

impl fmt::Debug for NotifyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyDefinition")
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// 5. Registry
// ---------------------------------------------------------------------------

/// A collaborator contributing definitions and lifecycle hooks.
pub trait TaskProvider {
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), SyncError>;
}

/// Immutable catalog of definitions, grouped by task type in priority order.
pub struct TaskRegistry {
    order: Vec<TaskType>,
    definitions: Vec<Vec<TaskDefinition>>,
    prepare: Vec<PrepareDefinition>,
    notify: Vec<NotifyDefinition>,
    initializers: Vec<HookFn>,
    resetters: Vec<HookFn>,
}

impl TaskRegistry {
    /// Starts a registry whose task types run in `order`.
    pub fn builder<I, T>(order: I) -> Result<RegistryBuilder, SyncError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskType>,
    {
        let mut seen = BTreeSet::new();
        let mut types = Vec::new();
        for task_type in order {
            let task_type = task_type.into();
            if !seen.insert(task_type.clone()) {
                return Err(SyncError::DuplicateTaskType(task_type));
            }
            types.push(task_type);
        }
        let definitions = vec![Vec::new(); types.len()];
        Ok(RegistryBuilder {
            registry: TaskRegistry {
                order: types,
                definitions,
                prepare: Vec::new(),
                notify: Vec::new(),
                initializers: Vec::new(),
                resetters: Vec::new(),
            },
        })
    }

    pub fn order(&self) -> &[TaskType] {
        &self.order
    }

    /// Task type names in priority order, for reports.
    pub fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(TaskType::as_str).collect()
    }

    /// Priority of `task_type`; lower runs first.
    pub fn position(&self, task_type: &TaskType) -> Option<usize> {
        self.order.iter().position(|t| t == task_type)
    }

    /// `(priority, task type, definitions in registration order)` for every
    /// type that has at least one definition.
    pub fn definitions(&self) -> impl Iterator<Item = (usize, &TaskType, &[TaskDefinition])> {
        self.order
            .iter()
            .zip(self.definitions.iter())
            .enumerate()
            .filter(|(_, (_, defs))| !defs.is_empty())
            .map(|(i, (task_type, defs))| (i, task_type, defs.as_slice()))
    }

    pub fn prepare(&self) -> &[PrepareDefinition] {
        &self.prepare
    }

    pub fn notify(&self) -> &[NotifyDefinition] {
        &self.notify
    }

    /// Number of registered main-task definitions.
    pub fn len(&self) -> usize {
        self.definitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every initialize hook; the first failure aborts.
    pub fn initialize(&self) -> Result<(), TaskError> {
        for hook in &self.initializers {
            hook()?;
        }
        Ok(())
    }

    /// Runs every reset hook, logging failures.
    pub fn reset(&self) {
        for hook in &self.resetters {
            if let Err(e) = hook() {
                tracing::error!("Reset hook failed: {e}");
            }
        }
    }
}

/// Accumulates definitions for a [`TaskRegistry`].
pub struct RegistryBuilder {
    registry: TaskRegistry,
}

impl RegistryBuilder {
    /// Adds a main-task definition after any earlier ones of the same type.
    pub fn task(&mut self, definition: TaskDefinition) -> Result<&mut Self, SyncError> {
        let index = self
            .registry
            .position(&definition.task_type)
            .ok_or_else(|| SyncError::UnknownTaskType(definition.task_type.clone()))?;
        self.registry.definitions[index].push(definition);
        Ok(self)
    }

    pub fn prepare(&mut self, definition: PrepareDefinition) -> &mut Self {
        self.registry.prepare.push(definition);
        self
    }

    pub fn notify(&mut self, definition: NotifyDefinition) -> &mut Self {
        self.registry.notify.push(definition);
        self
    }

    pub fn on_initialize(
        &mut self,
        hook: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.registry.initializers.push(Arc::new(hook));
        self
    }

    pub fn on_reset(
        &mut self,
        hook: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.registry.resetters.push(Arc::new(hook));
        self
    }

    /// Lets `provider` contribute its definitions and hooks.
    pub fn provider(&mut self, provider: &dyn TaskProvider) -> Result<&mut Self, SyncError> {
        provider.register(self)?;
        Ok(self)
    }

    pub fn build(self) -> TaskRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{FileAction, JobFile};

    fn job(file: &str, action: FileAction, content: &str) -> Job {
        Job::parse(&JobFile::from(file), action, content.as_bytes()).unwrap()
    }

    fn channels() -> BTreeSet<String> {
        BTreeSet::from(["kmi".to_owned()])
    }

    fn noop() -> Arc<dyn TaskHandler> {
        handler(|_, _, _| Ok(()))
    }

    fn family() -> JobFamily {
        JobFamily::new("layer", field_name(&["workspace", "name"]))
    }

    #[test]
    fn channel_family_requires_listened_channel_and_folder() {
        let fam = family().with_channels().in_folder("layers");
        assert!(fam.accepts(&job("kmi/layers/a.json", FileAction::Update, "{}"), &channels()));
        assert!(!fam.accepts(&job("dev/layers/a.json", FileAction::Update, "{}"), &channels()));
        assert!(!fam.accepts(&job("kmi/styles/a.json", FileAction::Update, "{}"), &channels()));
        assert!(!fam.accepts(&job("kmi", FileAction::Update, "{}"), &channels()));
    }

    #[test]
    fn plain_family_matches_first_segment_against_folder() {
        let fam = family().in_folder("layers");
        assert!(fam.accepts(&job("layers/a.json", FileAction::Update, "{}"), &channels()));
        assert!(!fam.accepts(&job("kmi/layers/a.json", FileAction::Update, "{}"), &channels()));
        assert!(family().accepts(&job("anything/a.json", FileAction::Update, "{}"), &channels()));
    }

    #[test]
    fn action_file_and_validity_checks() {
        let fam = family()
            .for_action(JobAction::Remove)
            .job_files(|name| name.ends_with(".json"))
            .valid_when(|job| job.has("workspace"));
        let removed = job("ws/a.json", FileAction::Remove, r#"{"workspace":"ws"}"#);
        assert!(fam.accepts(&removed, &channels()));
        let published = job("ws/a.json", FileAction::Update, r#"{"workspace":"ws"}"#);
        assert!(!fam.accepts(&published, &channels()));
        let invalid = job("ws/a.json", FileAction::Remove, "{}");
        assert!(!fam.accepts(&invalid, &channels()));
        let sql = job("ws/a.sql", FileAction::Remove, "x");
        assert!(!fam.accepts(&sql, &channels()));
    }

    #[test]
    fn field_name_joins_fields_and_fails_on_missing() {
        let name = field_name(&["workspace", "name"]);
        let ok = job("a.json", FileAction::Update, r#"{"workspace":"ws","name":"roads"}"#);
        assert_eq!(name(&ok).unwrap(), "ws:roads");
        let missing = job("a.json", FileAction::Update, r#"{"workspace":"ws"}"#);
        let err = name(&missing).unwrap_err();
        assert!(err.to_string().contains("'name'"));
    }

    #[test]
    fn definition_name_overrides_family_name() {
        let def = TaskDefinition::new("create_workspace", Arc::new(family()), noop())
            .named(field_name(&["workspace"]));
        let j = job("a.json", FileAction::Update, r#"{"workspace":"ws","name":"roads"}"#);
        assert_eq!(def.task_name(&j).unwrap(), "ws");
    }

    #[test]
    fn hook_definitions_debug_without_handlers() {
        let prepare = PrepareDefinition::new(Arc::new(family()), Arc::new(
            |_: &Job| -> Result<Option<Map<String, Value>>, TaskError> { Ok(None) },
        ));
        let notify = NotifyDefinition::new(
            Arc::new(family().in_folder("layers")),
            Arc::new(|_: &Job, _: &JobStatus| -> Result<(), TaskError> { Ok(()) }),
        );
        let prepare = format!("{prepare:?}");
        let notify = format!("{notify:?}");
        assert!(prepare.starts_with("PrepareDefinition"), "{prepare}");
        assert!(prepare.contains("layer"), "{prepare}");
        assert!(notify.starts_with("NotifyDefinition"), "{notify}");
        assert!(notify.ends_with(".. }"), "{notify}");
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let mut builder = TaskRegistry::builder(["create_workspace"]).unwrap();
        let err = builder
            .task(TaskDefinition::new("create_feature", Arc::new(family()), noop()))
            .err()
            .expect("unknown type");
        assert!(matches!(err, SyncError::UnknownTaskType(_)));
    }

    #[test]
    fn duplicate_order_entry_is_rejected() {
        let err = TaskRegistry::builder(["a", "b", "a"]).err().expect("duplicate");
        assert!(matches!(err, SyncError::DuplicateTaskType(t) if t.as_str() == "a"));
    }

    #[test]
    fn definitions_follow_order_and_skip_empty_types() {
        let fam = Arc::new(family());
        let mut builder = TaskRegistry::builder(["a", "b", "c"]).unwrap();
        builder
            .task(TaskDefinition::new("c", fam.clone(), noop()))
            .unwrap()
            .task(TaskDefinition::new("a", fam.clone(), noop()))
            .unwrap()
            .task(TaskDefinition::new("a", fam, noop()))
            .unwrap();
        let registry = builder.build();
        let seen: Vec<(usize, &str, usize)> = registry
            .definitions()
            .map(|(i, t, defs)| (i, t.as_str(), defs.len()))
            .collect();
        assert_eq!(seen, vec![(0, "a", 2), (2, "c", 1)]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn initialize_stops_at_first_failure() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = TaskRegistry::builder(DEFAULT_TASK_ORDER.iter().copied()).unwrap();
        let c1 = calls.clone();
        let c2 = calls.clone();
        builder
            .on_initialize(|| Err("database unreachable".into()))
            .on_initialize(move || {
                c1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_reset(move || {
                c2.fetch_add(10, Ordering::SeqCst);
                Ok(())
            });
        let registry = builder.build();
        let err = registry.initialize().unwrap_err();
        assert_eq!(err.to_string(), "database unreachable");
        registry.reset();
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
