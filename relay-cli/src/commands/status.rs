//! `relay status`: persisted job statuses.

use std::fs;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use relay_core::{JobFile, JobStatus, MESSAGE_KEY};
use relay_renderer::ReportRenderer;
use relay_sync::pipeline::pull_report_path;
use relay_sync::status_store::{list_statuses_at, read_status_at};

use super::{CatalogArgs, Context};

/// Arguments for `relay status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show the full report of one job file.
    #[arg(conflicts_with_all = ["json", "failed", "pull"])]
    pub file: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Only list jobs that have not succeeded.
    #[arg(long)]
    pub failed: bool,

    /// Print the report of the last pull.
    #[arg(long, conflicts_with_all = ["json", "failed"])]
    pub pull: bool,

    #[command(flatten)]
    pub catalog: CatalogArgs,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let ctx = Context::load()?;
        let root = &ctx.settings.status_path;

        if self.pull {
            let path = pull_report_path(&ctx.settings);
            if !path.exists() {
                println!("No pull recorded yet.");
                return Ok(());
            }
            let report = fs::read_to_string(&path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            print!("{report}");
            return Ok(());
        }

        if let Some(file) = &self.file {
            let Some(status) = read_status_at(root, &JobFile::from(file.as_str()))
                .with_context(|| format!("failed to read the status of '{file}'"))?
            else {
                bail!("no status recorded for '{file}'");
            };
            let order = ctx.task_order(&self.catalog)?;
            let order: Vec<&str> = order.iter().map(String::as_str).collect();
            let report = ReportRenderer::new()
                .and_then(|renderer| renderer.render_job(&status, &order))
                .context("failed to render the job report")?;
            print!("{report}");
            return Ok(());
        }

        let mut statuses = if root.exists() {
            list_statuses_at(root)
                .with_context(|| format!("failed to list statuses in '{}'", root.display()))?
        } else {
            Vec::new()
        };
        let total = statuses.len();
        if self.failed {
            statuses.retain(JobStatus::is_not_succeeded);
        }

        if self.json {
            return print_json(total, &statuses);
        }
        print_table(total, statuses);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReportJson<'a> {
    summary: StatusSummaryJson,
    jobs: &'a [JobStatus],
}

#[derive(Serialize)]
struct StatusSummaryJson {
    jobs: usize,
    failed: usize,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "")]
    indicator: String,
    #[tabled(rename = "job file")]
    file: String,
    #[tabled(rename = "tasks")]
    tasks: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "last processed")]
    last_processed: String,
}

fn print_json(total: usize, statuses: &[JobStatus]) -> Result<()> {
    let payload = StatusReportJson {
        summary: StatusSummaryJson {
            jobs: total,
            failed: statuses.iter().filter(|s| s.is_not_succeeded()).count(),
        },
        jobs: statuses,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(total: usize, statuses: Vec<JobStatus>) {
    let failed = statuses.iter().filter(|s| s.is_not_succeeded()).count();
    println!(
        "relay v{} | {} jobs | {} not succeeded",
        env!("CARGO_PKG_VERSION"),
        total,
        failed,
    );
    if statuses.is_empty() {
        println!("No job statuses recorded.");
        return;
    }

    let rows: Vec<StatusTableRow> = statuses
        .iter()
        .map(|status| StatusTableRow {
            indicator: indicator(status),
            file: status.file.to_string(),
            tasks: task_counts(status),
            detail: detail(status),
            last_processed: format_age(status.last_process_time),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if failed > 0 {
        println!("Run 'relay status <file>' for the full report of a job.");
    }
}

fn indicator(status: &JobStatus) -> String {
    if status.is_succeeded() {
        "■".green().bold().to_string()
    } else if status.is_failed() {
        "■".red().bold().to_string()
    } else {
        "■".yellow().bold().to_string()
    }
}

/// `succeeded/total`
fn task_counts(status: &JobStatus) -> String {
    let succeeded = status.tasks.values().filter(|t| t.is_succeeded()).count();
    format!("{succeeded}/{}", status.tasks.len())
}

/// The first failed task and its message, or the state of the job.
fn detail(status: &JobStatus) -> String {
    let failed = status.tasks.iter().find(|(_, task)| task.is_failed());
    match failed {
        Some((task_type, task)) => match task.message(MESSAGE_KEY) {
            Some(message) => format!("{task_type}: {}", first_line(message)),
            None => task_type.clone(),
        },
        None if status.is_succeeded() => "synchronized".to_owned(),
        None => "pending".to_owned(),
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

/// `3m ago`, `2h ago`, `4d ago`, or `never`.
fn format_age(time: Option<DateTime<Utc>>) -> String {
    let Some(time) = time else {
        return "never".to_owned();
    };
    let secs = (Utc::now() - time).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}
