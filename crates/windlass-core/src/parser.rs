//! Workflow document parser and validator
//!
//! Documents deserialise into permissive raw structs first, so a field that
//! belongs to the inactive variant surfaces as a warning instead of a serde
//! error. The one hard mixing error is an HTTP action carrying shell
//! fields. Unknown fields are tolerated silently.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ParseWarning, ValidationError};
use crate::model::{
    Action, ActionKind, BashAction, CustomAction, ExpectStatus, HttpAction, RetryConfig, Trigger,
    WatchEventKind, Workflow,
};
use crate::schedule;

/// A successfully validated document plus anything worth telling the
/// operator about.
#[derive(Debug)]
pub struct Parsed {
    pub workflow: Workflow,
    pub warnings: Vec<ParseWarning>,
}

/// Parse and validate one workflow document from YAML text.
pub fn parse_str(src: &str) -> Result<Parsed, ValidationError> {
    let doc: WorkflowDoc = serde_yaml::from_str(src)?;
    validate(doc)
}

/// Parse and validate one workflow document from disk.
pub fn parse_file(path: &Path) -> Result<Parsed, ValidationError> {
    let src = std::fs::read_to_string(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_str(&src)?;
    tracing::debug!(
        workflow = %parsed.workflow.name,
        path = %path.display(),
        warnings = parsed.warnings.len(),
        "parsed workflow document"
    );
    Ok(parsed)
}

// Raw document shapes. Everything optional; validation decides.

#[derive(Debug, Deserialize)]
struct WorkflowDoc {
    name: Option<String>,
    description: Option<String>,
    trigger: Option<TriggerDoc>,
    actions: Option<Vec<ActionDoc>>,
}

#[derive(Debug, Deserialize)]
struct TriggerDoc {
    #[serde(rename = "type")]
    kind: Option<String>,
    schedule: Option<String>,
    path: Option<PathBuf>,
    events: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionDoc {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,

    // bash
    command: Option<String>,

    // http
    url: Option<String>,
    method: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    body: Option<String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    expect_status: Option<ExpectStatus>,
    expect_body_contains: Option<String>,

    // custom
    function_name: Option<String>,
    arguments: Option<serde_json::Value>,

    retry: Option<RetryConfig>,
}

fn validate(doc: WorkflowDoc) -> Result<Parsed, ValidationError> {
    let mut warnings = Vec::new();

    let name = doc.name.ok_or(ValidationError::MissingField("name"))?;
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    let trigger_doc = doc.trigger.ok_or(ValidationError::MissingField("trigger"))?;
    let trigger = validate_trigger(trigger_doc, &mut warnings)?;

    let action_docs = doc.actions.ok_or(ValidationError::MissingField("actions"))?;
    if action_docs.is_empty() {
        return Err(ValidationError::NoActions);
    }

    let mut actions = Vec::with_capacity(action_docs.len());
    for (index, action_doc) in action_docs.into_iter().enumerate() {
        actions.push(validate_action(index, action_doc, &mut warnings)?);
    }

    Ok(Parsed {
        workflow: Workflow {
            name,
            description: doc.description,
            trigger,
            actions,
        },
        warnings,
    })
}

fn validate_trigger(
    doc: TriggerDoc,
    warnings: &mut Vec<ParseWarning>,
) -> Result<Trigger, ValidationError> {
    let kind = doc.kind.ok_or(ValidationError::MissingField("trigger.type"))?;

    match kind.as_str() {
        "cron" => {
            let expr = doc
                .schedule
                .ok_or(ValidationError::MissingField("trigger.schedule"))?;
            schedule::parse(&expr).map_err(|e| ValidationError::InvalidCron {
                expr: expr.clone(),
                reason: e.to_string(),
            })?;
            if doc.path.is_some() {
                warnings.push(ParseWarning::foreign_field("trigger", "path", "cron"));
            }
            if doc.events.is_some() {
                warnings.push(ParseWarning::foreign_field("trigger", "events", "cron"));
            }
            Ok(Trigger::Cron { schedule: expr })
        }
        "filewatch" => {
            let path = doc.path.ok_or(ValidationError::MissingField("trigger.path"))?;
            let names = doc
                .events
                .ok_or(ValidationError::MissingField("trigger.events"))?;
            if names.is_empty() {
                return Err(ValidationError::NoWatchEvents);
            }
            let mut events = Vec::with_capacity(names.len());
            for raw in names {
                let event = WatchEventKind::parse(&raw)
                    .ok_or(ValidationError::InvalidWatchEvent(raw))?;
                if !events.contains(&event) {
                    events.push(event);
                }
            }
            if doc.schedule.is_some() {
                warnings.push(ParseWarning::foreign_field("trigger", "schedule", "filewatch"));
            }
            Ok(Trigger::FileWatch { path, events })
        }
        other => Err(ValidationError::UnknownTriggerType(other.to_string())),
    }
}

fn validate_action(
    index: usize,
    doc: ActionDoc,
    warnings: &mut Vec<ParseWarning>,
) -> Result<Action, ValidationError> {
    let name = doc
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .ok_or(ValidationError::ActionMissingName(index))?;
    let kind_tag = doc.kind.clone().ok_or(ValidationError::ActionMissingField {
        action: name.clone(),
        field: "type",
    })?;

    let label = format!("action `{name}`");
    let mut retry = doc.retry.clone();
    if let Some(config) = retry.as_mut() {
        if config.multiplier < 1.0 {
            warnings.push(ParseWarning(format!(
                "{label}: retry multiplier {} below 1, clamped to 1",
                config.multiplier
            )));
            config.multiplier = 1.0;
        }
    }

    let kind = match kind_tag.as_str() {
        "bash" => {
            let command = doc.command.clone().ok_or(ValidationError::ActionMissingField {
                action: name.clone(),
                field: "command",
            })?;
            if command.trim().is_empty() {
                return Err(ValidationError::ActionEmptyField {
                    action: name,
                    field: "command",
                });
            }
            warn_foreign_http_fields(&doc, &label, "bash", warnings);
            warn_foreign_custom_fields(&doc, &label, "bash", warnings);
            ActionKind::Bash(BashAction { command })
        }
        "http" => {
            // Shell fields on an HTTP action are a hard error by policy.
            if doc.command.is_some() {
                return Err(ValidationError::ShellFieldsOnHttpAction(name));
            }
            let url = doc.url.clone().ok_or(ValidationError::ActionMissingField {
                action: name.clone(),
                field: "url",
            })?;
            let method = doc.method.clone().ok_or(ValidationError::ActionMissingField {
                action: name.clone(),
                field: "method",
            })?;
            if url.trim().is_empty() {
                return Err(ValidationError::ActionEmptyField {
                    action: name,
                    field: "url",
                });
            }
            if method.trim().is_empty() {
                return Err(ValidationError::ActionEmptyField {
                    action: name,
                    field: "method",
                });
            }
            warn_foreign_custom_fields(&doc, &label, "http", warnings);
            ActionKind::Http(HttpAction {
                url,
                method,
                headers: doc.headers.clone().unwrap_or_default(),
                body: doc.body.clone(),
                timeout: doc.timeout,
                expect_status: doc.expect_status.clone(),
                expect_body_contains: doc.expect_body_contains.clone(),
            })
        }
        "custom" => {
            let function_name =
                doc.function_name
                    .clone()
                    .ok_or(ValidationError::ActionMissingField {
                        action: name.clone(),
                        field: "function_name",
                    })?;
            if doc.command.is_some() {
                warnings.push(ParseWarning::foreign_field(&label, "command", "custom"));
            }
            warn_foreign_http_fields(&doc, &label, "custom", warnings);
            ActionKind::Custom(CustomAction {
                function_name,
                arguments: doc.arguments.clone().unwrap_or(serde_json::Value::Null),
            })
        }
        other => {
            return Err(ValidationError::UnknownActionType {
                action: name,
                kind: other.to_string(),
            })
        }
    };

    Ok(Action { name, kind, retry })
}

fn warn_foreign_http_fields(
    doc: &ActionDoc,
    label: &str,
    active: &str,
    warnings: &mut Vec<ParseWarning>,
) {
    for (present, field) in [
        (doc.url.is_some(), "url"),
        (doc.method.is_some(), "method"),
        (doc.headers.is_some(), "headers"),
        (doc.body.is_some(), "body"),
        (doc.timeout.is_some(), "timeout"),
        (doc.expect_status.is_some(), "expect_status"),
        (doc.expect_body_contains.is_some(), "expect_body_contains"),
    ] {
        if present {
            warnings.push(ParseWarning::foreign_field(label, field, active));
        }
    }
}

fn warn_foreign_custom_fields(
    doc: &ActionDoc,
    label: &str,
    active: &str,
    warnings: &mut Vec<ParseWarning>,
) {
    for (present, field) in [
        (doc.function_name.is_some(), "function_name"),
        (doc.arguments.is_some(), "arguments"),
    ] {
        if present {
            warnings.push(ParseWarning::foreign_field(label, field, active));
        }
    }
}
