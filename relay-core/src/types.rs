//! Domain types shared by every relay crate.
//!
//! Job files are always addressed by their repository-relative path using `/`
//! separators, independent of the host platform.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A task type, e.g. `create_workspace`. Task types are totally ordered by the
/// registry, not by this type's `Ord` impl.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(pub String);

impl TaskType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Repository-relative path of a job file, e.g. `kmi/layers/roads.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFile(pub String);

impl JobFile {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the path into at most three segments: channel, folder, rest.
    pub fn segments(&self) -> Vec<&str> {
        self.0.splitn(3, '/').collect()
    }

    /// The final path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for JobFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobFile {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobFile {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// What happened to a file in the state repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Physical action implied by the change.
    pub fn file_action(self) -> FileAction {
        match self {
            ChangeKind::Added | ChangeKind::Modified => FileAction::Update,
            ChangeKind::Removed => FileAction::Remove,
        }
    }

    /// Single-letter code as printed by `relay plan` (`A`, `M`, `R`).
    pub fn code(self) -> char {
        match self {
            ChangeKind::Added => 'A',
            ChangeKind::Modified => 'M',
            ChangeKind::Removed => 'R',
        }
    }
}

/// Physical action on a job file: it exists (update) or it was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Update,
    Remove,
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileAction::Update => f.write_str("update"),
            FileAction::Remove => f.write_str("remove"),
        }
    }
}

/// Effective action of a job after normalisation.
///
/// Serialised as its lowercase name; unknown names round-trip through
/// [`JobAction::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobAction {
    Publish,
    Remove,
    Meta,
    None,
    Other(String),
}

impl JobAction {
    pub fn as_str(&self) -> &str {
        match self {
            JobAction::Publish => "publish",
            JobAction::Remove => "remove",
            JobAction::Meta => "meta",
            JobAction::None => "none",
            JobAction::Other(s) => s,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for JobAction {
    fn from(s: &str) -> Self {
        match s {
            "publish" => JobAction::Publish,
            "remove" => JobAction::Remove,
            "meta" => JobAction::Meta,
            "none" => JobAction::None,
            other => JobAction::Other(other.to_owned()),
        }
    }
}

impl From<String> for JobAction {
    fn from(s: String) -> Self {
        JobAction::from(s.as_str())
    }
}

impl From<JobAction> for String {
    fn from(a: JobAction) -> Self {
        a.as_str().to_owned()
    }
}
