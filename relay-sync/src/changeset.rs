//! Changesets: the file-level changes observed since the last successful run.
//!
//! A [`ChangeSource`] yields the pending [`FileChange`]s and is told to
//! `commit` them once a run has succeeded; until then the same changes are
//! offered again on the next cycle.
//!
//! [`SnapshotSource`] compares a state directory (the working copy of the
//! repository) against a snapshot directory holding the content that was last
//! committed. Committing copies the processed content into the snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use relay_core::{ChangeKind, FileAction, JobFile};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// 1. Changes
// ---------------------------------------------------------------------------

/// One changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub file: JobFile,
    pub kind: ChangeKind,
    /// Current content for additions and modifications; the last committed
    /// content for removals. `None` when it could not be read.
    pub content: Option<Vec<u8>>,
    /// Last committed content, when known. Used for diffs.
    pub previous: Option<Vec<u8>>,
}

impl FileChange {
    pub fn added(file: impl Into<JobFile>, content: impl Into<Vec<u8>>) -> Self {
        FileChange {
            file: file.into(),
            kind: ChangeKind::Added,
            content: Some(content.into()),
            previous: None,
        }
    }

    pub fn modified(
        file: impl Into<JobFile>,
        previous: impl Into<Vec<u8>>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        FileChange {
            file: file.into(),
            kind: ChangeKind::Modified,
            content: Some(content.into()),
            previous: Some(previous.into()),
        }
    }

    /// A removal; `previous` is `None` when the old content is gone.
    pub fn removed(file: impl Into<JobFile>, previous: Option<Vec<u8>>) -> Self {
        FileChange {
            file: file.into(),
            kind: ChangeKind::Removed,
            content: previous.clone(),
            previous,
        }
    }

    pub fn action(&self) -> FileAction {
        self.kind.file_action()
    }
}

/// Where changes come from.
pub trait ChangeSource {
    /// Pending changes, sorted by file.
    fn changes(&self) -> Result<Vec<FileChange>, SyncError>;

    /// Marks `changes` as processed so they are not offered again.
    fn commit(&mut self, changes: &[FileChange]) -> Result<(), SyncError>;
}

/// A fixed, in-memory changeset. Committing records nothing.
#[derive(Debug, Clone, Default)]
pub struct StaticChanges(pub Vec<FileChange>);

impl ChangeSource for StaticChanges {
    fn changes(&self) -> Result<Vec<FileChange>, SyncError> {
        let mut changes = self.0.clone();
        changes.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(changes)
    }

    fn commit(&mut self, _changes: &[FileChange]) -> Result<(), SyncError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 2. Snapshot source
// ---------------------------------------------------------------------------

/// Diffs a state tree against the snapshot of the last committed state.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    state: PathBuf,
    snapshot: PathBuf,
}

impl SnapshotSource {
    pub fn new(state: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Self {
        SnapshotSource {
            state: state.into(),
            snapshot: snapshot.into(),
        }
    }

    pub fn state(&self) -> &Path {
        &self.state
    }

    pub fn snapshot(&self) -> &Path {
        &self.snapshot
    }
}

impl ChangeSource for SnapshotSource {
    fn changes(&self) -> Result<Vec<FileChange>, SyncError> {
        let current = list_tree(&self.state)?;
        let committed = list_tree(&self.snapshot)?;

        let mut changes = Vec::new();
        for (file, path) in &current {
            let content = std::fs::read(path).map_err(|e| io_err(path, e))?;
            match committed.get(file) {
                None => changes.push(FileChange::added(file.as_str(), content)),
                Some(old) => {
                    let previous = std::fs::read(old).map_err(|e| io_err(old, e))?;
                    if previous != content {
                        changes.push(FileChange::modified(file.as_str(), previous, content));
                    }
                }
            }
        }
        for (file, old) in &committed {
            if current.contains_key(file) {
                continue;
            }
            let previous = match std::fs::read(old) {
                Ok(previous) => Some(previous),
                Err(e) => {
                    tracing::warn!("Cannot read committed content of {file}: {e}");
                    None
                }
            };
            changes.push(FileChange::removed(file.as_str(), previous));
        }

        changes.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(changes)
    }

    fn commit(&mut self, changes: &[FileChange]) -> Result<(), SyncError> {
        for change in changes {
            let target = tree_path(&self.snapshot, &change.file);
            match change.kind {
                ChangeKind::Removed => match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&target, e)),
                },
                ChangeKind::Added | ChangeKind::Modified => {
                    let Some(content) = &change.content else {
                        continue;
                    };
                    write_atomic(&target, content)?;
                }
            }
        }
        tracing::debug!(
            "Committed {} change(s) to {}",
            changes.len(),
            self.snapshot.display()
        );
        Ok(())
    }
}

fn tree_path(root: &Path, file: &JobFile) -> PathBuf {
    file.as_str()
        .split('/')
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);
    std::fs::write(&tmp, content).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Every regular file under `root`, keyed by `/`-joined relative path.
/// Hidden entries (`.git`, dotfiles) are skipped. A missing root is empty.
fn list_tree(root: &Path) -> Result<BTreeMap<JobFile, PathBuf>, SyncError> {
    let mut files = BTreeMap::new();
    if !root.exists() {
        return Ok(files);
    }
    let mut pending = vec![(root.to_path_buf(), Vec::<String>::new())];
    let mut visited = BTreeSet::new();
    while let Some((dir, prefix)) = pending.pop() {
        if !visited.insert(dir.clone()) {
            continue;
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let mut segments = prefix.clone();
            segments.push(name);
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                pending.push((path, segments));
            } else if file_type.is_file() {
                files.insert(JobFile::from(segments.join("/")), path);
            }
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, file: &str, content: &str) {
        let path = tree_path(root, &JobFile::from(file));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn summary(changes: &[FileChange]) -> Vec<(String, char)> {
        changes
            .iter()
            .map(|c| (c.file.to_string(), c.kind.code()))
            .collect()
    }

    #[test]
    fn empty_snapshot_reports_every_file_as_added() {
        let state = TempDir::new().unwrap();
        let snapshot = TempDir::new().unwrap();
        write(state.path(), "kmi/layers/b.json", "{}");
        write(state.path(), "kmi/a.json", "{}");
        write(state.path(), ".git/HEAD", "ref");

        let source = SnapshotSource::new(state.path(), snapshot.path());
        let changes = source.changes().unwrap();
        assert_eq!(
            summary(&changes),
            vec![("kmi/a.json".into(), 'A'), ("kmi/layers/b.json".into(), 'A')]
        );
    }

    #[test]
    fn modified_and_removed_files_carry_previous_content() {
        let state = TempDir::new().unwrap();
        let snapshot = TempDir::new().unwrap();
        write(state.path(), "kmi/a.json", r#"{"name":"new"}"#);
        write(snapshot.path(), "kmi/a.json", r#"{"name":"old"}"#);
        write(snapshot.path(), "kmi/gone.json", r#"{"name":"gone"}"#);
        write(state.path(), "kmi/same.json", "{}");
        write(snapshot.path(), "kmi/same.json", "{}");

        let changes = SnapshotSource::new(state.path(), snapshot.path())
            .changes()
            .unwrap();
        assert_eq!(
            summary(&changes),
            vec![("kmi/a.json".into(), 'M'), ("kmi/gone.json".into(), 'R')]
        );
        assert_eq!(changes[0].previous.as_deref(), Some(&br#"{"name":"old"}"#[..]));
        assert_eq!(changes[1].content.as_deref(), Some(&br#"{"name":"gone"}"#[..]));
        assert_eq!(changes[1].action(), FileAction::Remove);
    }

    #[test]
    fn commit_advances_snapshot_so_nothing_is_pending() {
        let state = TempDir::new().unwrap();
        let snapshot = TempDir::new().unwrap();
        write(state.path(), "kmi/a.json", "{}");
        write(snapshot.path(), "kmi/gone.json", "{}");

        let mut source = SnapshotSource::new(state.path(), snapshot.path());
        let changes = source.changes().unwrap();
        source.commit(&changes).unwrap();

        assert!(source.changes().unwrap().is_empty());
        assert!(!snapshot.path().join("kmi").join("gone.json").exists());
    }

    #[test]
    fn missing_directories_mean_no_changes() {
        let tmp = TempDir::new().unwrap();
        let source = SnapshotSource::new(tmp.path().join("state"), tmp.path().join("snap"));
        assert!(source.changes().unwrap().is_empty());
    }

    #[test]
    fn static_changes_are_sorted() {
        let source = StaticChanges(vec![
            FileChange::added("kmi/b.json", "{}"),
            FileChange::added("kmi/a.json", "{}"),
        ]);
        let files: Vec<String> = source
            .changes()
            .unwrap()
            .into_iter()
            .map(|c| c.file.to_string())
            .collect();
        assert_eq!(files, vec!["kmi/a.json", "kmi/b.json"]);
    }
}
