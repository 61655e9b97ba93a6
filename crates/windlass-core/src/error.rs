//! Validation errors and parse warnings

use std::path::PathBuf;

/// Error rejecting a workflow document.
///
/// Any of these means the workflow is not started; other workflows in the
/// same directory are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Document could not be read from disk
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid YAML
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Required top-level field missing
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// Workflow name present but empty
    #[error("workflow name must not be empty")]
    EmptyName,

    /// `actions` present but empty
    #[error("workflow must declare at least one action")]
    NoActions,

    /// Trigger `type` is not a known variant
    #[error("unknown trigger type `{0}` (expected `cron` or `filewatch`)")]
    UnknownTriggerType(String),

    /// Cron expression rejected by the schedule parser
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidCron { expr: String, reason: String },

    /// Filewatch event name is not one of the accepted five
    #[error(
        "unknown filewatch event `{0}` (expected create, write, remove, rename or chmod)"
    )]
    InvalidWatchEvent(String),

    /// Filewatch trigger with an empty `events` list
    #[error("filewatch trigger must list at least one event")]
    NoWatchEvents,

    /// Action missing its `name`
    #[error("action at index {0} is missing a name")]
    ActionMissingName(usize),

    /// Action `type` is not a known variant
    #[error("action `{action}`: unknown type `{kind}` (expected `bash`, `http` or `custom`)")]
    UnknownActionType { action: String, kind: String },

    /// Required action field missing for its declared type
    #[error("action `{action}`: missing required field `{field}`")]
    ActionMissingField { action: String, field: &'static str },

    /// Action field present but empty
    #[error("action `{action}`: field `{field}` must not be empty")]
    ActionEmptyField { action: String, field: &'static str },

    /// HTTP action carrying shell fields, a hard error by parser policy
    #[error("action `{0}`: http action must not carry a `command` field")]
    ShellFieldsOnHttpAction(String),
}

/// Non-fatal finding from document validation.
///
/// Warnings accompany a successfully parsed workflow; `validate --strict`
/// promotes them to failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning(pub String);

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ParseWarning {
    pub(crate) fn foreign_field(action_or_trigger: &str, field: &str, active: &str) -> Self {
        Self(format!(
            "{action_or_trigger}: field `{field}` is ignored for type `{active}`"
        ))
    }
}
