//! Unified diffs of pending changes for `relay diff`.

use similar::TextDiff;

use relay_core::{ChangeKind, JobFile};

use crate::changeset::FileChange;

/// A single file diff against the last committed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    pub file: JobFile,
    pub kind: ChangeKind,
    pub unified_diff: String,
}

/// Diffs every change against its last committed content. Nothing is written.
///
/// Removals diff against empty text; a removal whose old content is gone
/// yields an empty diff body.
pub fn diff_changes(changes: &[FileChange]) -> Vec<FileDiff> {
    changes
        .iter()
        .map(|change| {
            let previous = text(change.previous.as_deref());
            let current = match change.kind {
                ChangeKind::Removed => String::new(),
                ChangeKind::Added | ChangeKind::Modified => text(change.content.as_deref()),
            };
            let old_header = format!("a/{}", change.file);
            let new_header = format!("b/{}", change.file);
            let unified_diff = TextDiff::from_lines(&previous, &current)
                .unified_diff()
                .header(&old_header, &new_header)
                .context_radius(3)
                .to_string();
            FileDiff {
                file: change.file.clone(),
                kind: change.kind,
                unified_diff,
            }
        })
        .collect()
}

fn text(content: Option<&[u8]>) -> String {
    content
        .map(|bytes| normalize_line_endings(&String::from_utf8_lossy(bytes)))
        .unwrap_or_default()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modification_produces_unified_diff() {
        let changes = vec![FileChange::modified(
            "ws/layer.json",
            "{\n  \"name\": \"roads\"\n}\n",
            "{\n  \"name\": \"roads\",\n  \"keywords\": []\n}\n",
        )];
        let diffs = diff_changes(&changes);
        assert_eq!(diffs.len(), 1);
        let diff = &diffs[0].unified_diff;
        assert!(diff.contains("--- a/ws/layer.json"));
        assert!(diff.contains("+++ b/ws/layer.json"));
        assert!(diff.contains("@@"));
        assert!(diff.contains("+  \"keywords\": []"));
    }

    #[test]
    fn removal_diffs_to_nothing() {
        let changes = vec![FileChange::removed("ws/layer.json", Some(b"{}\n".to_vec()))];
        let diffs = diff_changes(&changes);
        assert_eq!(diffs[0].kind, ChangeKind::Removed);
        assert!(diffs[0].unified_diff.contains("-{}"));
    }

    #[test]
    fn crlf_is_not_a_change() {
        let changes = vec![FileChange::modified("ws/a.txt", "a\r\nb\r\n", "a\nb\n")];
        assert!(!diff_changes(&changes)[0].unified_diff.contains("@@"));
    }
}
