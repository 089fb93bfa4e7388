//! The task catalog: job families, task definitions, prepare and notify hooks
//! declared in YAML.
//!
//! ```yaml
//! families:
//!   - name: layer
//!     name_template: "{workspace}:{name}"
//!     channels: true
//!     folder: layers
//!     action: publish
//!     suffix: .json
//!     exclude_suffix: .meta.json
//!     required: [[workspace, name]]
//! tasks:
//!   - type: create_workspace
//!     family: layer
//!     name_template: "{workspace}"
//!     when: [{ skip: catalog }]
//!     command: ./bin/create-workspace
//!     fanout: true
//! notify:
//!   - family: layer
//!     webhook: https://hooks.example.org/relay
//! ```
//!
//! Everything is validated when the catalog is loaded, so registering it with
//! a [`TaskRegistry`] cannot fail on catalog content.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use relay_core::{Job, JobAction, Settings, Target};
use relay_sync::registry::{JobPredicate, NotifyHandler, RegistryBuilder, DEFAULT_TASK_ORDER};
use relay_sync::{
    Fanout, JobFamily, NotifyDefinition, PrepareDefinition, SyncError, TaskDefinition,
    TaskHandler, TaskProvider, TaskRegistry,
};

use crate::command::{template_name, CommandHandler, CommandNotifier, CommandPrepare};
use crate::error::{io_err, CatalogError};
use crate::rules::{all_match, compile_all, NameTemplate, RuleSpec};
use crate::webhook::WebhookNotifier;

// ---------------------------------------------------------------------------
// 1. File model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    #[serde(default)]
    pub order: Option<Vec<String>>,
    #[serde(default)]
    pub families: Vec<FamilySpec>,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub prepare: Vec<HookSpec>,
    #[serde(default)]
    pub notify: Vec<HookSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilySpec {
    pub name: String,
    /// Defaults to `name`.
    pub job_type: Option<String>,
    pub name_template: String,
    #[serde(default)]
    pub channels: bool,
    pub folder: Option<String>,
    pub action: Option<String>,
    pub suffix: Option<String>,
    pub exclude_suffix: Option<String>,
    /// Alternative field sets; a job is valid if any set is fully present.
    #[serde(default)]
    pub required: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(rename = "type")]
    pub task_type: String,
    pub family: String,
    pub name_template: Option<String>,
    #[serde(default)]
    pub when: Vec<RuleSpec>,
    pub command: String,
    #[serde(default)]
    pub fanout: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub family: String,
    #[serde(default)]
    pub when: Vec<RuleSpec>,
    pub command: Option<String>,
    pub webhook: Option<String>,
}

// ---------------------------------------------------------------------------
// 2. Compiled catalog
// ---------------------------------------------------------------------------

/// A validated catalog, ready to register.
pub struct Catalog {
    order: Vec<String>,
    tasks: Vec<TaskDefinition>,
    prepare: Vec<PrepareDefinition>,
    notify: Vec<NotifyDefinition>,
    fanout_targets: Option<Vec<Target>>,
}

impl Catalog {
    /// Reads and compiles the catalog at `path`.
    pub fn load(path: &Path, settings: &Settings) -> Result<Catalog, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let file: CatalogFile =
            serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let catalog = Catalog::compile(file, settings)?;
        tracing::debug!(
            "Loaded catalog {} with {} task(s)",
            path.display(),
            catalog.tasks.len()
        );
        Ok(catalog)
    }

    pub fn compile(file: CatalogFile, settings: &Settings) -> Result<Catalog, CatalogError> {
        let order = file
            .order
            .clone()
            .unwrap_or_else(|| DEFAULT_TASK_ORDER.iter().map(|t| (*t).to_owned()).collect());
        let known: BTreeSet<&str> = order.iter().map(String::as_str).collect();

        let mut families = BTreeMap::new();
        for spec in &file.families {
            if families.contains_key(&spec.name) {
                return Err(CatalogError::Invalid(format!(
                    "family '{}' is declared twice",
                    spec.name
                )));
            }
            families.insert(spec.name.clone(), compile_family(spec)?);
        }
        let family = |name: &str| {
            families
                .get(name)
                .cloned()
                .ok_or_else(|| CatalogError::Invalid(format!("unknown family '{name}'")))
        };

        let targets = settings.effective_targets();
        let mut tasks = Vec::new();
        let mut fanout = false;
        for spec in &file.tasks {
            if !known.contains(spec.task_type.as_str()) {
                return Err(CatalogError::Invalid(format!(
                    "task type '{}' is not in the task order",
                    spec.task_type
                )));
            }
            let command = Arc::new(CommandHandler::new(spec.command.clone()));
            let handler: Arc<dyn TaskHandler> = if spec.fanout {
                fanout = true;
                Fanout::handler(targets, command)
            } else {
                command
            };
            let mut definition =
                TaskDefinition::new(spec.task_type.as_str(), family(&spec.family)?, handler);
            if let Some(template) = &spec.name_template {
                definition = definition.named(template_name(NameTemplate::parse(template)?));
            }
            let rules = compile_all(&spec.when, &settings.skip)?;
            if !rules.is_empty() {
                definition = definition.with_filter(move |job| all_match(&rules, job));
            }
            tasks.push(definition);
        }

        let mut prepare = Vec::new();
        for spec in &file.prepare {
            let Hook::Command(command) = hook(spec, "prepare")? else {
                return Err(CatalogError::Invalid(format!(
                    "prepare hook for family '{}' only supports `command`",
                    spec.family
                )));
            };
            let mut definition =
                PrepareDefinition::new(family(&spec.family)?, Arc::new(CommandPrepare::new(command)));
            definition.selector.filter = hook_filter(&spec.when, settings)?;
            prepare.push(definition);
        }

        let mut notify = Vec::new();
        for spec in &file.notify {
            let handler: Arc<dyn NotifyHandler> = match hook(spec, "notify")? {
                Hook::Command(command) => Arc::new(CommandNotifier::new(command)),
                Hook::Webhook(url) => Arc::new(WebhookNotifier::new(url)),
            };
            let mut definition = NotifyDefinition::new(family(&spec.family)?, handler);
            definition.selector.filter = hook_filter(&spec.when, settings)?;
            notify.push(definition);
        }

        Ok(Catalog {
            order,
            tasks,
            prepare,
            notify,
            fanout_targets: fanout.then(|| targets.to_vec()),
        })
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    /// A registry holding exactly this catalog.
    pub fn registry(&self) -> Result<TaskRegistry, SyncError> {
        let mut builder = TaskRegistry::builder(self.order.iter().map(String::as_str))?;
        builder.provider(self)?;
        Ok(builder.build())
    }
}

impl TaskProvider for Catalog {
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), SyncError> {
        for definition in &self.tasks {
            builder.task(definition.clone())?;
        }
        for definition in &self.prepare {
            builder.prepare(definition.clone());
        }
        for definition in &self.notify {
            builder.notify(definition.clone());
        }
        if let Some(targets) = &self.fanout_targets {
            let configured = !targets.is_empty();
            builder.on_initialize(move || {
                if configured {
                    Ok(())
                } else {
                    Err("the catalog fans tasks out but no target is configured".into())
                }
            });
        }
        Ok(())
    }
}

fn compile_family(spec: &FamilySpec) -> Result<Arc<JobFamily>, CatalogError> {
    let template = NameTemplate::parse(&spec.name_template)?;
    let job_type = spec.job_type.clone().unwrap_or_else(|| spec.name.clone());
    let mut family = JobFamily::new(job_type, template_name(template));
    if spec.channels {
        family = family.with_channels();
    }
    if let Some(folder) = &spec.folder {
        family = family.in_folder(folder.clone());
    }
    if let Some(action) = &spec.action {
        family = family.for_action(JobAction::from(action.as_str()));
    }
    if spec.suffix.is_some() || spec.exclude_suffix.is_some() {
        let suffix = spec.suffix.clone();
        let exclude = spec.exclude_suffix.clone();
        family = family.job_files(move |name| {
            suffix.as_deref().map_or(true, |s| name.ends_with(s))
                && !exclude.as_deref().is_some_and(|s| name.ends_with(s))
        });
    }
    if !spec.required.is_empty() {
        let required = spec.required.clone();
        family = family.valid_when(move |job| {
            required
                .iter()
                .any(|fields| fields.iter().all(|field| job.has(field)))
        });
    }
    Ok(Arc::new(family))
}

enum Hook {
    Command(String),
    Webhook(String),
}

/// Errors unless exactly one of `command` and `webhook` is set.
fn hook(spec: &HookSpec, kind: &str) -> Result<Hook, CatalogError> {
    match (&spec.command, &spec.webhook) {
        (Some(command), None) => Ok(Hook::Command(command.clone())),
        (None, Some(url)) => Ok(Hook::Webhook(url.clone())),
        _ => Err(CatalogError::Invalid(format!(
            "{kind} hook for family '{}' needs exactly one of `command` and `webhook`",
            spec.family
        ))),
    }
}

fn hook_filter(
    specs: &[RuleSpec],
    settings: &Settings,
) -> Result<Option<JobPredicate>, CatalogError> {
    let rules = compile_all(specs, &settings.skip)?;
    if rules.is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(move |job: &Job| all_match(&rules, job))))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn settings() -> Settings {
        Settings::defaults_at(Path::new("/home/test"))
    }

    fn compile(yaml: &str) -> Result<Catalog, CatalogError> {
        Catalog::compile(serde_yaml::from_str(yaml).unwrap(), &settings())
    }

    #[test]
    fn unknown_family_is_rejected() {
        let err = compile(
            "tasks:\n  - { type: create_workspace, family: nope, command: 'true' }\n",
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("unknown family 'nope'"));
    }

    #[test]
    fn task_type_outside_order_is_rejected() {
        let yaml = "
families:
  - { name: layer, name_template: '{name}' }
tasks:
  - { type: make_coffee, family: layer, command: 'true' }
";
        let err = compile(yaml).err().unwrap();
        assert!(err.to_string().contains("make_coffee"));
    }

    #[test]
    fn hook_needs_exactly_one_handler() {
        let yaml = "
families:
  - { name: layer, name_template: '{name}' }
notify:
  - { family: layer }
";
        assert!(compile(yaml).is_err());
    }

    #[test]
    fn custom_order_is_used_by_registry() {
        let yaml = "
order: [b_task, a_task]
families:
  - { name: layer, name_template: '{name}' }
tasks:
  - { type: a_task, family: layer, command: 'true' }
  - { type: b_task, family: layer, command: 'true' }
";
        let catalog = compile(yaml).unwrap();
        let registry = catalog.registry().unwrap();
        assert_eq!(registry.order_names(), vec!["b_task", "a_task"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn fanout_without_targets_fails_initialize() {
        let yaml = "
families:
  - { name: layer, name_template: '{name}' }
tasks:
  - { type: reload_geoserver, family: layer, command: 'true', fanout: true }
";
        let registry = compile(yaml).unwrap().registry().unwrap();
        assert!(registry.initialize().is_err());
    }
}
