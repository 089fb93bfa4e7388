//! Job records parsed from changed files.
//!
//! A job is loaded in two phases. [`Job::parse`] decodes the file and
//! normalises its action (the *raw* job). A prepare task may later resolve the
//! job by supplying extra fields, typically pulled from a metadata document the
//! job refers to; resolved fields shadow raw ones on lookup.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::types::{FileAction, JobAction, JobFile};

/// Field holding the text of a non-structured job file.
pub const RAW_CONTENT_FIELD: &str = "raw_content";

/// Suffix of metadata job files; these default to the `meta` action.
pub const META_SUFFIX: &str = ".meta.json";

/// Outcome of the optional resolve phase.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// No prepare task has touched the job.
    Raw,
    /// A prepare task supplied these fields.
    Resolved(Map<String, Value>),
    /// A prepare task ran and failed; the job proceeds with its raw fields.
    Unresolved(String),
}

/// One declared unit of synchronization intent, derived from one changed file.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    file: JobFile,
    action: JobAction,
    channel: Option<String>,
    fields: Map<String, Value>,
    resolution: Resolution,
}

impl Job {
    /// Parses `content` of `file` observed with the physical `action`.
    ///
    /// `.json` files must decode to a JSON object. Any other file is wrapped
    /// as `{ "raw_content": <text> }`.
    pub fn parse(file: &JobFile, action: FileAction, content: &[u8]) -> Result<Job, CoreError> {
        let mut fields = if file.as_str().ends_with(".json") {
            match serde_json::from_slice::<Value>(content)? {
                Value::Object(map) => map,
                other => {
                    return Err(CoreError::InvalidJob {
                        file: file.to_string(),
                        reason: format!("expected a JSON object, found {}", json_kind(&other)),
                    })
                }
            }
        } else {
            let mut map = Map::new();
            map.insert(
                RAW_CONTENT_FIELD.to_owned(),
                Value::String(String::from_utf8_lossy(content).into_owned()),
            );
            map
        };

        let declared = match fields.get("action") {
            Some(Value::String(s)) => Some(JobAction::from(s.as_str())),
            Some(Value::Null) | None => None,
            Some(other) => Some(JobAction::from(other.to_string())),
        };
        let declared = declared.or_else(|| {
            file.as_str()
                .ends_with(META_SUFFIX)
                .then_some(JobAction::Meta)
        });

        let action = match action {
            // Deleting an auxiliary file needs no processing.
            FileAction::Remove => match declared {
                None | Some(JobAction::Publish) => JobAction::Remove,
                Some(_) => JobAction::None,
            },
            FileAction::Update => declared.unwrap_or(JobAction::Publish),
        };

        fields.insert("job_file".to_owned(), Value::String(file.to_string()));
        fields.insert("action".to_owned(), Value::String(action.to_string()));

        Ok(Job {
            file: file.clone(),
            action,
            channel: None,
            fields,
            resolution: Resolution::Raw,
        })
    }

    pub fn file(&self) -> &JobFile {
        &self.file
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Records the channel the job was received on.
    pub fn set_channel(&mut self, channel: &str) {
        self.channel = Some(channel.to_owned());
        self.fields
            .insert("channel".to_owned(), Value::String(channel.to_owned()));
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Completes the resolve phase with the fields a prepare task produced.
    pub fn resolve(&mut self, fields: Map<String, Value>) {
        self.resolution = Resolution::Resolved(fields);
    }

    /// Marks the resolve phase as failed; raw fields stay authoritative.
    pub fn mark_unresolved(&mut self, reason: impl Into<String>) {
        self.resolution = Resolution::Unresolved(reason.into());
    }

    /// Looks up a field, preferring resolved values over raw ones.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Resolution::Resolved(resolved) = &self.resolution {
            if let Some(value) = resolved.get(key) {
                return Some(value);
            }
        }
        self.fields.get(key)
    }

    /// String field lookup; non-string values yield `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// `true` if the field exists, whatever its value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Truthiness of a field; `default` applies when the field is missing.
    pub fn is_truthy(&self, key: &str, default: bool) -> bool {
        self.get(key).map(truthy).unwrap_or(default)
    }

    /// Field text suitable for interpolation into names and commands.
    pub fn display_field(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// The merged view of the job handed to external handlers.
    pub fn to_value(&self) -> Value {
        let mut merged = self.fields.clone();
        if let Resolution::Resolved(resolved) = &self.resolution {
            for (key, value) in resolved {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }
}

/// Content fingerprint used to detect whether a job file changed meaning.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(file: &str, action: FileAction, content: &str) -> Job {
        Job::parse(&JobFile::from(file), action, content.as_bytes()).unwrap()
    }

    #[test]
    fn resolved_fields_shadow_raw_fields() {
        let mut job = parse("kmi/layers/a.json", FileAction::Update, r#"{"name":"a","title":"old"}"#);
        let mut extra = Map::new();
        extra.insert("title".into(), json!("new"));
        extra.insert("srs".into(), json!("EPSG:4326"));
        job.resolve(extra);

        assert_eq!(job.get_str("title"), Some("new"));
        assert_eq!(job.get_str("name"), Some("a"));
        assert_eq!(job.to_value()["srs"], json!("EPSG:4326"));
    }

    #[test]
    fn unresolved_job_keeps_raw_fields() {
        let mut job = parse("kmi/layers/a.json", FileAction::Update, r#"{"name":"a"}"#);
        job.mark_unresolved("metadata missing");
        assert_eq!(job.get_str("name"), Some("a"));
        assert!(matches!(job.resolution(), Resolution::Unresolved(r) if r == "metadata missing"));
    }

    #[test]
    fn truthiness_follows_json_values() {
        let job = parse(
            "a.json",
            FileAction::Update,
            r#"{"t":true,"f":false,"zero":0,"empty":"","list":[1]}"#,
        );
        assert!(job.is_truthy("t", false));
        assert!(!job.is_truthy("f", true));
        assert!(!job.is_truthy("zero", true));
        assert!(!job.is_truthy("empty", true));
        assert!(job.is_truthy("list", false));
        assert!(job.is_truthy("missing", true));
    }

    #[test]
    fn channel_is_visible_as_field() {
        let mut job = parse("kmi/layers/a.json", FileAction::Update, "{}");
        job.set_channel("kmi");
        assert_eq!(job.channel(), Some("kmi"));
        assert_eq!(job.get_str("channel"), Some("kmi"));
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let fp = fingerprint(b"hello");
        assert_eq!(fp.len(), 64);
        assert_eq!(
            fp,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(fingerprint(b"hello "), fp);
    }
}
