//! Status report rendering, including user template overrides.

use chrono::{TimeZone, Utc};
use relay_core::{JobFile, JobStatus, TaskStatus, MESSAGE_KEY};
use relay_renderer::{RenderError, ReportRenderer};
use tempfile::TempDir;

fn sample_status() -> JobStatus {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 3, 12, 44).unwrap();
    let mut status = JobStatus::new(JobFile::from("kmi/layers/roads.json"));
    status.last_process_time = Some(at);

    let mut workspace = TaskStatus::default();
    workspace.succeed();
    workspace.touch(at);
    workspace.set_message(MESSAGE_KEY, "succeed");
    status.tasks.insert("create_workspace".into(), workspace);

    let mut feature = TaskStatus::default();
    feature.fail();
    feature.touch(at);
    feature.succeed_stage("gs1.example.org", at);
    feature.set_stage_message("gs1.example.org", MESSAGE_KEY, "succeed");
    feature.fail_stage("gs2.example.org", at);
    feature.set_stage_message("gs2.example.org", MESSAGE_KEY, "connection refused");
    feature.set_message(MESSAGE_KEY, "connection refused");
    status.tasks.insert("create_feature".into(), feature);
    status
}

#[test]
fn job_report_lists_tasks_in_priority_order_with_stages() {
    let renderer = ReportRenderer::new().expect("renderer");
    let out = renderer
        .render_job(&sample_status(), &["create_workspace", "create_feature"])
        .expect("render");

    assert!(out.starts_with("Sync File : kmi/layers/roads.json"), "{out}");
    assert!(out.contains("Last Process Time : 2024-05-01 03:12:44"), "{out}");
    assert!(out.contains("Succeed : false"), "{out}");

    let workspace = out.find("Task 1 : create_workspace").expect("task 1");
    let feature = out.find("Task 2 : create_feature").expect("task 2");
    assert!(workspace < feature);

    assert!(out.contains("Stage : gs1.example.org"), "{out}");
    assert!(out.contains("Stage : gs2.example.org"), "{out}");
    assert!(out.contains("Message : connection refused"), "{out}");
}

#[test]
fn pull_report_lists_files() {
    let mut pull = JobStatus::new(JobFile::from("pull"));
    let mut entry = TaskStatus::default();
    entry.succeed();
    entry.set_message("action", "publish");
    entry.set_message(MESSAGE_KEY, "Ready to synchronize");
    pull.tasks.insert("kmi/layers/roads.json".into(), entry);

    let out = ReportRenderer::new().expect("renderer").render_pull(&pull).expect("render");
    assert!(out.starts_with("Synchronize file from repository"), "{out}");
    assert!(out.contains("File 1 : kmi/layers/roads.json"), "{out}");
    assert!(out.contains("Action : publish"), "{out}");
    assert!(out.contains("Message : Ready to synchronize"), "{out}");
}

#[test]
fn user_template_overrides_embedded_default() {
    let dir = TempDir::new().expect("templates");
    std::fs::write(
        dir.path().join("job_status.txt.tera"),
        "{{ file }} -> {% for t in tasks %}{{ t.task_type }}={{ t.outcome }};{% endfor %}",
    )
    .expect("write");

    let renderer = ReportRenderer::with_overrides(Some(dir.path())).expect("renderer");
    let out = renderer
        .render_job(&sample_status(), &["create_workspace", "create_feature"])
        .expect("render");
    assert_eq!(
        out,
        "kmi/layers/roads.json -> create_workspace=true;create_feature=false;"
    );
}

#[test]
fn missing_override_dir_falls_back_to_embedded() {
    let dir = TempDir::new().expect("tmp");
    let renderer =
        ReportRenderer::with_overrides(Some(&dir.path().join("absent"))).expect("renderer");
    let out = renderer.render_job(&sample_status(), &[]).expect("render");
    assert!(out.contains("Sync File"));
}

#[test]
fn broken_override_names_the_file() {
    let dir = TempDir::new().expect("templates");
    let path = dir.path().join("pull_status.txt.tera");
    std::fs::write(&path, "{% for f in tasks %}{{ f.task_type }}").expect("write");

    let err = ReportRenderer::with_overrides(Some(dir.path()))
        .err()
        .expect("unclosed loop must not compile");
    match &err {
        RenderError::Override { path: bad, .. } => assert_eq!(bad, &path),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("pull_status.txt.tera"), "{err}");
}

#[test]
fn override_with_unknown_field_fails_at_render_time() {
    let dir = TempDir::new().expect("templates");
    std::fs::write(dir.path().join("job_status.txt.tera"), "{{ owner.name }}").expect("write");

    let renderer = ReportRenderer::with_overrides(Some(dir.path())).expect("renderer");
    let err = renderer.render_job(&sample_status(), &[]).expect_err("owner is not a field");
    match &err {
        RenderError::Report { template, .. } => assert_eq!(template, "job_status.txt.tera"),
        other => panic!("unexpected error: {other:?}"),
    }
}
