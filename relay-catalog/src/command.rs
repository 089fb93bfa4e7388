//! Shell command handlers.
//!
//! Every command runs as `sh -c <command>` with the job's JSON on stdin and
//! the task context in `RELAY_*` environment variables. A zero exit status is
//! success; the last non-empty stdout line becomes the task message.

use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{json, Map, Value};

use relay_core::{Job, JobStatus, Target, TaskStatus, MESSAGE_KEY};
use relay_sync::registry::{NotifyHandler, PrepareHandler};
use relay_sync::{TargetHandler, TaskDefinition, TaskError, TaskHandler};

use crate::error::CommandError;
use crate::rules::NameTemplate;

/// Context exported to a command.
#[derive(Debug, Default)]
struct CommandEnv<'a> {
    task_type: &'a str,
    task_name: Option<String>,
    stage: Option<&'a str>,
    target: Option<&'a Target>,
}

/// Output of a command that exited successfully.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
}

impl CommandOutput {
    /// Last non-empty stdout line, trimmed.
    pub fn message(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
    }
}

fn run_command(
    command: &str,
    job: &Job,
    env: &CommandEnv<'_>,
    stdin: &Value,
) -> Result<CommandOutput, CommandError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env("RELAY_TASK_TYPE", env.task_type)
        .env("RELAY_JOB_FILE", job.file().as_str())
        .env("RELAY_ACTION", job.action().as_str())
        .env("RELAY_CHANNEL", job.channel().unwrap_or_default())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(name) = &env.task_name {
        cmd.env("RELAY_TASK_NAME", name);
    }
    if let Some(stage) = env.stage {
        cmd.env("RELAY_STAGE", stage);
    }
    if let Some(target) = env.target {
        cmd.env("RELAY_TARGET_URL", &target.url)
            .env("RELAY_TARGET_USERNAME", &target.username)
            .env("RELAY_TARGET_PASSWORD", &target.password);
    }

    let spawn_err = |source| CommandError::Spawn {
        command: command.to_owned(),
        source,
    };
    let mut child = cmd.spawn().map_err(spawn_err)?;

    let input = stdin.to_string();
    let writer = child.stdin.take().map(|mut pipe| {
        std::thread::spawn(move || {
            // The command may exit without reading its input.
            let _ = pipe.write_all(input.as_bytes());
        })
    });
    let output = child.wait_with_output().map_err(spawn_err)?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| format!("exit code {c}"))
            .unwrap_or_else(|| "a signal".to_owned());
        return Err(CommandError::Failed {
            command: command.to_owned(),
            code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Main-task handler running a shell command.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    command: String,
}

impl CommandHandler {
    pub fn new(command: impl Into<String>) -> Self {
        CommandHandler {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn execute(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
        target: Option<&Target>,
        stage: Option<&str>,
    ) -> Result<(), TaskError> {
        let env = CommandEnv {
            task_type: definition.task_type.as_str(),
            task_name: definition.task_name(job).ok(),
            stage,
            target,
        };
        let output = run_command(&self.command, job, &env, &job.to_value())?;
        if let Some(message) = output.message() {
            match stage {
                Some(stage) => status.set_stage_message(stage, MESSAGE_KEY, message),
                None => status.set_message(MESSAGE_KEY, message),
            }
        }
        Ok(())
    }
}

impl TaskHandler for CommandHandler {
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
    ) -> Result<(), TaskError> {
        self.execute(job, definition, status, None, None)
    }
}

impl TargetHandler for CommandHandler {
    fn run(
        &self,
        job: &Job,
        definition: &TaskDefinition,
        status: &mut TaskStatus,
        target: &Target,
        stage: Option<&str>,
    ) -> Result<(), TaskError> {
        self.execute(job, definition, status, Some(target), stage)
    }
}

// ---------------------------------------------------------------------------
// Prepare and notify
// ---------------------------------------------------------------------------

/// Prepare handler: the command prints a JSON object whose fields resolve the
/// job. Empty output leaves the job raw.
#[derive(Debug, Clone)]
pub struct CommandPrepare {
    command: String,
}

impl CommandPrepare {
    pub fn new(command: impl Into<String>) -> Self {
        CommandPrepare {
            command: command.into(),
        }
    }
}

impl PrepareHandler for CommandPrepare {
    fn prepare(&self, job: &Job) -> Result<Option<Map<String, Value>>, TaskError> {
        let env = CommandEnv {
            task_type: relay_sync::registry::PREPARE_TASK_TYPE,
            ..CommandEnv::default()
        };
        let output = run_command(&self.command, job, &env, &job.to_value())?;
        if output.stdout.trim().is_empty() {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(&output.stdout).map_err(|source| CommandError::Output {
                command: self.command.clone(),
                source,
            })?;
        match value {
            Value::Object(fields) => Ok(Some(fields)),
            _ => Err(CommandError::NotAnObject {
                command: self.command.clone(),
            }
            .into()),
        }
    }
}

/// Notify handler: the command receives `{job, status}` on stdin.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: String,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        CommandNotifier {
            command: command.into(),
        }
    }
}

impl NotifyHandler for CommandNotifier {
    fn notify(&self, job: &Job, status: &JobStatus) -> Result<(), TaskError> {
        let env = CommandEnv {
            task_type: relay_sync::registry::NOTIFY_TASK_TYPE,
            ..CommandEnv::default()
        };
        let payload = json!({ "job": job.to_value(), "status": status });
        run_command(&self.command, job, &env, &payload)?;
        Ok(())
    }
}

/// Name function backed by a [`NameTemplate`].
pub fn template_name(template: NameTemplate) -> relay_sync::registry::NameFn {
    std::sync::Arc::new(move |job: &Job| template.render(job).map_err(TaskError::from))
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use relay_core::{FileAction, JobFile};
    use relay_sync::{field_name, JobFamily};

    use super::*;

    fn job() -> Job {
        let mut job = Job::parse(
            &JobFile::from("kmi/layers/roads.json"),
            FileAction::Update,
            br#"{"workspace":"ws","name":"roads"}"#,
        )
        .unwrap();
        job.set_channel("kmi");
        job
    }

    fn definition(handler: Arc<dyn TaskHandler>) -> TaskDefinition {
        let family = Arc::new(JobFamily::new("layer", field_name(&["workspace", "name"])));
        TaskDefinition::new("create_feature", family, handler)
    }

    #[test]
    fn command_sees_environment_and_stdin() {
        let handler = Arc::new(CommandHandler::new(
            r#"read job; echo "working"; echo "$RELAY_TASK_TYPE $RELAY_TASK_NAME $RELAY_CHANNEL $RELAY_ACTION"; echo "$job" | grep -q '"name":"roads"'"#,
        ));
        let def = definition(handler.clone());
        let mut status = TaskStatus::default();

        TaskHandler::run(handler.as_ref(), &job(), &def, &mut status).unwrap();
        assert_eq!(
            status.message(MESSAGE_KEY),
            Some("create_feature ws:roads kmi publish")
        );
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let handler = Arc::new(CommandHandler::new("echo 'layer missing' >&2; exit 3"));
        let def = definition(handler.clone());
        let mut status = TaskStatus::default();

        let err = TaskHandler::run(handler.as_ref(), &job(), &def, &mut status).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("exit code 3"), "{text}");
        assert!(text.contains("layer missing"), "{text}");
    }

    #[test]
    fn target_command_records_stage_message() {
        let handler = Arc::new(CommandHandler::new(r#"echo "$RELAY_STAGE $RELAY_TARGET_URL""#));
        let def = definition(handler.clone());
        let target = Target {
            name: "gs1".into(),
            url: "https://gs1/geoserver".into(),
            username: "admin".into(),
            password: "secret".into(),
        };
        let mut status = TaskStatus::default();

        TargetHandler::run(handler.as_ref(), &job(), &def, &mut status, &target, Some("gs1"))
            .unwrap();
        assert_eq!(
            status.stage_message("gs1", MESSAGE_KEY),
            Some("gs1 https://gs1/geoserver")
        );
    }

    #[test]
    fn prepare_output_resolves_job() {
        let prepare = CommandPrepare::new(r#"echo '{"title":"Roads"}'"#);
        let fields = prepare.prepare(&job()).unwrap().unwrap();
        assert_eq!(fields["title"], "Roads");

        assert!(CommandPrepare::new("true").prepare(&job()).unwrap().is_none());
        assert!(CommandPrepare::new("echo '[1]'").prepare(&job()).is_err());
    }

    #[test]
    fn notifier_receives_status() {
        let notifier = CommandNotifier::new(r#"grep -q '"file":"kmi/layers/roads.json"'"#);
        let status = JobStatus::new(JobFile::from("kmi/layers/roads.json"));
        notifier.notify(&job(), &status).unwrap();
    }
}
