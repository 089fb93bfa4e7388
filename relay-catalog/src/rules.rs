//! Inclusion rules and name templates.
//!
//! Rules are written as single-key maps:
//!
//! ```yaml
//! when:
//!   - present: workspace
//!   - equals: { field: type, value: wms }
//!   - truthy: gwc_enabled
//!   - skip: db
//! ```
//!
//! A `skip` rule is decided when the catalog is loaded: it rejects every job
//! while the named skip switch is on.

use serde::Deserialize;
use serde_json::Value;

use relay_core::{Job, Skips};

use crate::error::{CatalogError, CommandError};

/// Raw rule as written in the catalog.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub present: Option<String>,
    pub absent: Option<String>,
    pub equals: Option<EqualsSpec>,
    pub truthy: Option<String>,
    pub falsy: Option<String>,
    pub skip: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EqualsSpec {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Present(String),
    Absent(String),
    Equals(String, Value),
    /// A missing field counts as true.
    Truthy(String),
    Falsy(String),
    /// Rejects every job when `active`.
    Skip { switch: String, active: bool },
}

impl Rule {
    /// Compiles `spec`, resolving `skip` switches against `skips`.
    pub fn compile(spec: &RuleSpec, skips: &Skips) -> Result<Rule, CatalogError> {
        let mut rules = Vec::new();
        if let Some(field) = &spec.present {
            rules.push(Rule::Present(field.clone()));
        }
        if let Some(field) = &spec.absent {
            rules.push(Rule::Absent(field.clone()));
        }
        if let Some(equals) = &spec.equals {
            rules.push(Rule::Equals(equals.field.clone(), equals.value.clone()));
        }
        if let Some(field) = &spec.truthy {
            rules.push(Rule::Truthy(field.clone()));
        }
        if let Some(field) = &spec.falsy {
            rules.push(Rule::Falsy(field.clone()));
        }
        if let Some(switch) = &spec.skip {
            let active = skips
                .get(switch)
                .ok_or_else(|| CatalogError::Invalid(format!("unknown skip switch '{switch}'")))?;
            rules.push(Rule::Skip {
                switch: switch.clone(),
                active,
            });
        }

        match rules.len() {
            1 => Ok(rules.remove(0)),
            0 => Err(CatalogError::Invalid("empty rule".into())),
            _ => Err(CatalogError::Invalid(format!(
                "a rule must have exactly one key, found {}",
                rules.len()
            ))),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Rule::Present(field) => job.has(field),
            Rule::Absent(field) => !job.has(field),
            Rule::Equals(field, value) => job.get(field) == Some(value),
            Rule::Truthy(field) => job.is_truthy(field, true),
            Rule::Falsy(field) => !job.is_truthy(field, false),
            Rule::Skip { active, .. } => !active,
        }
    }
}

/// Compiles every rule of a `when` list.
pub fn compile_all(specs: &[RuleSpec], skips: &Skips) -> Result<Vec<Rule>, CatalogError> {
    specs.iter().map(|spec| Rule::compile(spec, skips)).collect()
}

/// `true` when every rule accepts the job.
pub fn all_match(rules: &[Rule], job: &Job) -> bool {
    rules.iter().all(|rule| rule.matches(job))
}

// ---------------------------------------------------------------------------
// Name templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Field(String),
}

/// A task name such as `{workspace}:{name}` with `{field}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTemplate {
    pieces: Vec<Piece>,
}

impl NameTemplate {
    pub fn parse(template: &str) -> Result<NameTemplate, CatalogError> {
        let mut pieces = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            if start > 0 {
                pieces.push(Piece::Text(rest[..start].to_owned()));
            }
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                CatalogError::Invalid(format!("unclosed placeholder in '{template}'"))
            })?;
            let field = after[..end].trim();
            if field.is_empty() {
                return Err(CatalogError::Invalid(format!("empty placeholder in '{template}'")));
            }
            pieces.push(Piece::Field(field.to_owned()));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            pieces.push(Piece::Text(rest.to_owned()));
        }
        if pieces.is_empty() {
            return Err(CatalogError::Invalid("empty name template".into()));
        }
        Ok(NameTemplate { pieces })
    }

    pub fn render(&self, job: &Job) -> Result<String, CommandError> {
        let mut name = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => name.push_str(text),
                Piece::Field(field) => {
                    let value = job
                        .display_field(field)
                        .ok_or_else(|| CommandError::MissingField {
                            file: job.file().to_string(),
                            field: field.clone(),
                        })?;
                    name.push_str(&value);
                }
            }
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{FileAction, JobFile};
    use rstest::rstest;

    use super::*;

    fn job(content: &str) -> Job {
        Job::parse(&JobFile::from("kmi/layers/a.json"), FileAction::Update, content.as_bytes())
            .unwrap()
    }

    fn spec(yaml: &str) -> RuleSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[rstest]
    #[case("present: name", r#"{"name":"a"}"#, true)]
    #[case("present: name", "{}", false)]
    #[case("absent: name", "{}", true)]
    #[case("equals: { field: type, value: wms }", r#"{"type":"wms"}"#, true)]
    #[case("equals: { field: type, value: wms }", r#"{"type":"wfs"}"#, false)]
    #[case("truthy: gwc", "{}", true)]
    #[case("truthy: gwc", r#"{"gwc":false}"#, false)]
    #[case("falsy: gwc", "{}", true)]
    #[case("falsy: gwc", r#"{"gwc":true}"#, false)]
    fn rules_match_job_fields(#[case] rule: &str, #[case] content: &str, #[case] expected: bool) {
        let rule = Rule::compile(&spec(rule), &Skips::default()).unwrap();
        assert_eq!(rule.matches(&job(content)), expected);
    }

    #[test]
    fn skip_rule_follows_the_switch() {
        let skips = Skips {
            db: true,
            ..Skips::default()
        };
        let db = Rule::compile(&spec("skip: db"), &skips).unwrap();
        let catalog = Rule::compile(&spec("skip: catalog"), &skips).unwrap();
        assert!(!db.matches(&job("{}")));
        assert!(catalog.matches(&job("{}")));
    }

    #[test]
    fn rule_with_two_keys_is_rejected() {
        let err = Rule::compile(&spec("{present: a, absent: b}"), &Skips::default()).unwrap_err();
        assert!(err.to_string().contains("exactly one key"));
    }

    #[test]
    fn unknown_skip_switch_is_rejected() {
        assert!(Rule::compile(&spec("skip: cache"), &Skips::default()).is_err());
    }

    #[test]
    fn template_interpolates_fields() {
        let template = NameTemplate::parse("{workspace}:{name}").unwrap();
        let name = template
            .render(&job(r#"{"workspace":"ws","name":"roads"}"#))
            .unwrap();
        assert_eq!(name, "ws:roads");

        let err = template.render(&job(r#"{"workspace":"ws"}"#)).unwrap_err();
        assert!(err.to_string().contains("no 'name' field"));
    }

    #[test]
    fn template_rejects_unclosed_placeholder() {
        assert!(NameTemplate::parse("{workspace").is_err());
    }
}
