//! Status store: durable, resumable record of per-job task outcomes.
//!
//! Persists one [`JobStatus`] JSON document per job file at
//! `<status root>/<job file>`. Writes use the atomic `.tmp` + rename pattern.
//!
//! # Identity
//!
//! A stored record is reused only when both its content fingerprint and its
//! action match the current file; otherwise the job starts from an empty
//! record. Tasks are never considered done against content that changed.
//!
//! # Sharing
//!
//! Task statuses live in an arena indexed by [`TaskStatusId`]. A job maps each
//! task type to an id, so a shared task is simply one id referenced by several
//! jobs, and every mutation goes through [`StatusStore::task_mut`].
//!
//! # Writes
//!
//! [`StatusStore::save_all`] writes only jobs with at least one modified task;
//! untouched historical records keep their bytes and mtimes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use relay_core::{fingerprint, JobAction, JobFile, JobStatus, TaskStatus};

use crate::error::{io_err, SyncError};

/// File name of the in-memory repository-pull record.
pub const PULL_STATUS_FILE: &str = "pull";

/// Handle to a job record inside a [`StatusStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobStatusId(usize);

/// Handle to a task status inside a [`StatusStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskStatusId(usize);

#[derive(Debug)]
struct JobRecord {
    file: JobFile,
    /// `None` for records that are never written, like the pull record.
    path: Option<PathBuf>,
    fingerprint: Option<String>,
    action: Option<JobAction>,
    last_process_time: Option<DateTime<Utc>>,
    previous: BTreeMap<String, TaskStatus>,
    tasks: BTreeMap<String, TaskStatusId>,
}

/// Per-run view of the status tree.
#[derive(Debug)]
pub struct StatusStore {
    root: Option<PathBuf>,
    jobs: Vec<JobRecord>,
    tasks: Vec<TaskStatus>,
    pull: JobStatusId,
}

impl StatusStore {
    /// Store persisting under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_root(Some(root.into()))
    }

    /// Store that never reads or writes; used for dry runs.
    pub fn in_memory() -> Self {
        Self::with_root(None)
    }

    fn with_root(root: Option<PathBuf>) -> Self {
        let pull = JobRecord {
            file: JobFile::from(PULL_STATUS_FILE),
            path: None,
            fingerprint: None,
            action: Some(JobAction::Other("sync".to_owned())),
            last_process_time: None,
            previous: BTreeMap::new(),
            tasks: BTreeMap::new(),
        };
        StatusStore {
            root,
            jobs: vec![pull],
            tasks: Vec::new(),
            pull: JobStatusId(0),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// The non-persistent record of the repository-pull step. Its entries are
    /// keyed by job file rather than task type.
    pub fn pull_status(&self) -> JobStatusId {
        self.pull
    }

    /// Loads the record for `file`, discarding it if `content` or `action`
    /// changed since it was written.
    pub fn load(
        &mut self,
        file: &JobFile,
        action: &JobAction,
        content: &[u8],
    ) -> Result<JobStatusId, SyncError> {
        let fingerprint = fingerprint(content);
        let path = self.root.as_ref().map(|root| status_path_at(root, file));
        let stored = match &path {
            Some(path) => read_status(path)?,
            None => None,
        };
        let previous = match stored {
            Some(stored) if stored.matches(&fingerprint, action) => stored.tasks,
            Some(_) => {
                tracing::debug!("Discarding stale status of {file}: content or action changed");
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        self.jobs.push(JobRecord {
            file: file.clone(),
            path,
            fingerprint: Some(fingerprint),
            action: Some(action.clone()),
            last_process_time: None,
            previous,
            tasks: BTreeMap::new(),
        });
        Ok(JobStatusId(self.jobs.len() - 1))
    }

    pub fn file(&self, job: JobStatusId) -> &JobFile {
        &self.jobs[job.0].file
    }

    // -- task slots ---------------------------------------------------------

    /// The job's slot for `task_type`, created on first use from the stored
    /// record.
    pub fn task_slot(&mut self, job: JobStatusId, task_type: &str) -> TaskStatusId {
        if let Some(id) = self.jobs[job.0].tasks.get(task_type) {
            return *id;
        }
        let restored = self.jobs[job.0]
            .previous
            .remove(task_type)
            .map(TaskStatus::restore)
            .unwrap_or_default();
        let id = self.push_task(restored);
        self.jobs[job.0].tasks.insert(task_type.to_owned(), id);
        id
    }

    /// The job's slot for `task_type`, if one exists.
    pub fn existing_slot(&self, job: JobStatusId, task_type: &str) -> Option<TaskStatusId> {
        self.jobs[job.0].tasks.get(task_type).copied()
    }

    /// Points the job's `task_type` slot at `task`, sharing it.
    pub fn bind_task(&mut self, job: JobStatusId, task_type: &str, task: TaskStatusId) {
        self.jobs[job.0].tasks.insert(task_type.to_owned(), task);
    }

    /// Gives the job a fresh private slot for `task_type`.
    pub fn detach_task(&mut self, job: JobStatusId, task_type: &str) -> TaskStatusId {
        let id = self.push_task(TaskStatus::default());
        self.jobs[job.0].tasks.insert(task_type.to_owned(), id);
        id
    }

    fn push_task(&mut self, status: TaskStatus) -> TaskStatusId {
        self.tasks.push(status);
        TaskStatusId(self.tasks.len() - 1)
    }

    pub fn task(&self, task: TaskStatusId) -> &TaskStatus {
        &self.tasks[task.0]
    }

    pub fn task_mut(&mut self, task: TaskStatusId) -> &mut TaskStatus {
        &mut self.tasks[task.0]
    }

    /// Records that `job` was processed at `at`.
    pub fn touch(&mut self, job: JobStatusId, at: DateTime<Utc>) {
        self.jobs[job.0].last_process_time = Some(at);
    }

    // -- aggregates ---------------------------------------------------------

    fn job_tasks(&self, job: JobStatusId) -> impl Iterator<Item = &TaskStatus> + '_ {
        self.jobs[job.0].tasks.values().map(|id| &self.tasks[id.0])
    }

    pub fn job_succeeded(&self, job: JobStatusId) -> bool {
        self.job_tasks(job).all(TaskStatus::is_succeeded)
    }

    /// At least one of the job's tasks was attempted and failed.
    pub fn job_failed(&self, job: JobStatusId) -> bool {
        self.job_tasks(job).any(TaskStatus::is_failed)
    }

    fn job_processed(&self, job: JobStatusId) -> bool {
        self.job_tasks(job).any(TaskStatus::is_modified)
    }

    /// Every job loaded in this run, plus the pull record, succeeded.
    pub fn all_succeeded(&self) -> bool {
        (0..self.jobs.len()).all(|i| self.job_succeeded(JobStatusId(i)))
    }

    /// Files that ended non-succeeded: jobs with a task that did not
    /// succeed, plus files whose pull entry failed. Sorted, without repeats.
    pub fn failed_jobs(&self) -> Vec<JobFile> {
        let mut failed: BTreeSet<JobFile> = self
            .job_ids()
            .filter(|id| !self.job_succeeded(*id))
            .map(|id| self.jobs[id.0].file.clone())
            .collect();
        for (file, slot) in &self.jobs[self.pull.0].tasks {
            if self.tasks[slot.0].is_not_succeeded() {
                failed.insert(JobFile::from(file.as_str()));
            }
        }
        failed.into_iter().collect()
    }

    /// Ids of every job record except the pull record.
    pub fn job_ids(&self) -> impl Iterator<Item = JobStatusId> + '_ {
        (0..self.jobs.len())
            .map(JobStatusId)
            .filter(move |id| *id != self.pull)
    }

    /// Materialises the job's record as it would be written.
    pub fn snapshot(&self, job: JobStatusId) -> JobStatus {
        let record = &self.jobs[job.0];
        let tasks: BTreeMap<String, TaskStatus> = record
            .tasks
            .iter()
            .map(|(task_type, id)| (task_type.clone(), self.tasks[id.0].clone()))
            .collect();
        JobStatus {
            file: record.file.clone(),
            fingerprint: record.fingerprint.clone(),
            action: record.action.clone(),
            status: tasks.values().all(TaskStatus::is_succeeded),
            tasks,
            last_process_time: record.last_process_time,
        }
    }

    /// Writes every persistent record with at least one modified task.
    ///
    /// Every record is attempted; the first error is returned afterwards.
    /// Returns the number of records written.
    pub fn save_all(&self) -> Result<usize, SyncError> {
        let mut written = 0;
        let mut first_error = None;
        for (i, record) in self.jobs.iter().enumerate() {
            let Some(path) = &record.path else { continue };
            if !self.job_processed(JobStatusId(i)) {
                continue;
            }
            match write_status(path, &self.snapshot(JobStatusId(i))) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::error!("Failed to save status of {}: {e}", record.file);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

// ---------------------------------------------------------------------------
// Status files
// ---------------------------------------------------------------------------

/// `<root>/<job file>`: pure, no I/O.
pub fn status_path_at(root: &Path, file: &JobFile) -> PathBuf {
    file.as_str()
        .split('/')
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Reads one status document. Missing or blank files yield `None`.
pub fn read_status(path: &Path) -> Result<Option<JobStatus>, SyncError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| SyncError::StatusParse {
            path: path.to_path_buf(),
            source,
        })
}

/// Reads the status document of `file` under `root`.
pub fn read_status_at(root: &Path, file: &JobFile) -> Result<Option<JobStatus>, SyncError> {
    read_status(&status_path_at(root, file))
}

/// Writes `status` atomically: `<path>.tmp` then rename.
pub fn write_status(path: &Path, status: &JobStatus) -> Result<(), SyncError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid status path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(status)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Every status document under `root`, sorted by file. Hidden entries and
/// leftover `.tmp` files are skipped.
pub fn list_statuses_at(root: &Path) -> Result<Vec<JobStatus>, SyncError> {
    let mut paths = Vec::new();
    if root.exists() {
        collect_files(root, &mut paths)?;
    }
    let mut statuses = Vec::new();
    for path in paths {
        if let Some(status) = read_status(&path)? {
            statuses.push(status);
        }
    }
    statuses.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(statuses)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name.ends_with(".tmp") {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::MESSAGE_KEY;
    use tempfile::TempDir;

    fn file() -> JobFile {
        JobFile::from("kmi/layers/roads.json")
    }

    fn succeed_all(store: &mut StatusStore, job: JobStatusId, types: &[&str]) {
        for t in types {
            let slot = store.task_slot(job, t);
            store.task_mut(slot).succeed();
        }
    }

    #[test]
    fn fresh_store_has_only_the_pull_record() {
        let store = StatusStore::in_memory();
        assert!(store.all_succeeded());
        assert!(store.failed_jobs().is_empty());
        assert_eq!(store.job_ids().count(), 0);
        assert_eq!(store.file(store.pull_status()).as_str(), PULL_STATUS_FILE);
    }

    #[test]
    fn succeeded_tasks_survive_reload_with_same_content() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        succeed_all(&mut store, job, &["create_workspace"]);
        assert_eq!(store.save_all().unwrap(), 1);

        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        let slot = store.task_slot(job, "create_workspace");
        assert!(store.task(slot).is_succeeded());
    }

    #[test]
    fn changed_content_discards_stored_record() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        succeed_all(&mut store, job, &["create_workspace"]);
        store.save_all().unwrap();

        let mut store = StatusStore::open(tmp.path());
        let job = store
            .load(&file(), &JobAction::Publish, br#"{"keywords":[]}"#)
            .unwrap();
        let slot = store.task_slot(job, "create_workspace");
        assert!(!store.task(slot).is_succeeded());
    }

    #[test]
    fn changed_action_discards_stored_record() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        succeed_all(&mut store, job, &["delete_feature"]);
        store.save_all().unwrap();

        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Remove, b"{}").unwrap();
        let slot = store.task_slot(job, "delete_feature");
        assert!(!store.task(slot).is_succeeded());
    }

    #[test]
    fn untouched_records_are_not_rewritten() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        let slot = store.task_slot(job, "create_workspace");
        store.task_mut(slot).mark_ran();
        assert_eq!(store.save_all().unwrap(), 0);
        assert!(!status_path_at(tmp.path(), &file()).exists());
    }

    #[test]
    fn shared_slot_is_seen_by_both_jobs() {
        let mut store = StatusStore::in_memory();
        let a = store.load(&JobFile::from("kmi/a.json"), &JobAction::Publish, b"a").unwrap();
        let b = store.load(&JobFile::from("kmi/b.json"), &JobAction::Publish, b"b").unwrap();
        let shared = store.task_slot(a, "create_workspace");
        store.task_mut(shared).shared = true;
        store.bind_task(b, "create_workspace", shared);

        store.task_mut(shared).fail();
        assert!(store.job_failed(a));
        assert!(store.job_failed(b));

        let private = store.detach_task(b, "create_workspace");
        assert_ne!(private, shared);
        assert!(!store.job_failed(b));
        assert!(store.job_failed(a));
        assert_eq!(store.failed_jobs().len(), 2);
    }

    #[test]
    fn saved_document_has_status_flag_and_md5() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        let job = store.load(&file(), &JobAction::Publish, b"{}").unwrap();
        let slot = store.task_slot(job, "create_workspace");
        store.task_mut(slot).succeed();
        store.task_mut(slot).set_message(MESSAGE_KEY, "succeed");
        store.save_all().unwrap();

        let raw = std::fs::read_to_string(status_path_at(tmp.path(), &file())).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["status"], true);
        assert_eq!(doc["md5"], fingerprint(b"{}"));
        assert_eq!(doc["tasks"]["create_workspace"]["messages"]["message"], "succeed");
        assert!(!tmp_path(&status_path_at(tmp.path(), &file())).exists());
    }

    #[test]
    fn corrupt_status_file_is_reported_with_path() {
        let tmp = TempDir::new().unwrap();
        let path = status_path_at(tmp.path(), &file());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let mut store = StatusStore::open(tmp.path());
        let err = store.load(&file(), &JobAction::Publish, b"{}").unwrap_err();
        assert!(matches!(err, SyncError::StatusParse { .. }));
        assert!(err.to_string().contains("roads.json"));
    }

    #[test]
    fn blank_status_file_counts_as_missing() {
        let tmp = TempDir::new().unwrap();
        let path = status_path_at(tmp.path(), &file());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "  \n").unwrap();
        assert!(read_status(&path).unwrap().is_none());
    }

    #[test]
    fn list_statuses_skips_hidden_and_tmp_files() {
        let tmp = TempDir::new().unwrap();
        let mut store = StatusStore::open(tmp.path());
        for name in ["kmi/a.json", "kmi/layers/b.json"] {
            let job = store.load(&JobFile::from(name), &JobAction::Publish, b"{}").unwrap();
            succeed_all(&mut store, job, &["create_feature"]);
        }
        store.save_all().unwrap();
        std::fs::write(tmp.path().join(".pull"), "report").unwrap();
        std::fs::write(tmp.path().join("kmi").join("c.json.tmp"), "{}").unwrap();

        let statuses = list_statuses_at(tmp.path()).unwrap();
        let files: Vec<&str> = statuses.iter().map(|s| s.file.as_str()).collect();
        assert_eq!(files, vec!["kmi/a.json", "kmi/layers/b.json"]);
    }
}
