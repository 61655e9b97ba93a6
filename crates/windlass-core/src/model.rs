//! Validated workflow model
//!
//! These types are what the rest of the engine consumes: a `Workflow` is
//! produced once by the parser, is immutable for the life of its
//! per-workflow task, and is destroyed when its document is removed or
//! replaced.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// One automation: a trigger bound to an ordered chain of actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub trigger: Trigger,

    pub actions: Vec<Action>,
}

/// What decides when a workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Time-based: a standard five-field cron expression (six/seven-field
    /// forms with a seconds column are accepted too).
    Cron { schedule: String },

    /// Filesystem-based: fire on matching operations under `path`.
    #[serde(rename = "filewatch")]
    FileWatch {
        path: PathBuf,
        events: Vec<WatchEventKind>,
    },
}

impl Trigger {
    /// Short label used in metrics and history rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cron { .. } => "cron",
            Self::FileWatch { .. } => "filewatch",
        }
    }
}

/// Filesystem operations a filewatch trigger can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Create,
    Write,
    Remove,
    Rename,
    Chmod,
}

impl WatchEventKind {
    /// All accepted event names, in canonical order.
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Write,
        Self::Remove,
        Self::Rename,
        Self::Chmod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
        }
    }

    /// Parse one of the five accepted names. Anything else is rejected at
    /// document load time.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "write" => Some(Self::Write),
            "remove" => Some(Self::Remove),
            "rename" => Some(Self::Rename),
            "chmod" => Some(Self::Chmod),
            _ => None,
        }
    }
}

impl std::fmt::Display for WatchEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub name: String,

    #[serde(flatten)]
    pub kind: ActionKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl Action {
    /// Short label used in metrics and history rows.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ActionKind::Bash { .. } => "bash",
            ActionKind::Http { .. } => "http",
            ActionKind::Custom { .. } => "custom",
        }
    }
}

/// The tag determines which fields are meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Run a shell command through `sh -c`.
    Bash(BashAction),

    /// Send an HTTP request and validate the response.
    Http(HttpAction),

    /// Reserved. Execution is unimplemented and records as skipped; it
    /// never silently succeeds and contributes no failure.
    Custom(CustomAction),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BashAction {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpAction {
    pub url: String,
    pub method: String,

    /// Stored case-sensitively, matched per HTTP semantics at send time.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Request deadline; bounded default applied when absent.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<ExpectStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect_body_contains: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomAction {
    pub function_name: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub arguments: serde_json::Value,
}

/// Accepted response status codes: a single value or a list.
///
/// YAML-typed numbers (including floats with zero fraction, which is how
/// some emitters write integers) coerce to integer; anything else fails
/// at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectStatus {
    One(u16),
    Any(Vec<u16>),
}

impl ExpectStatus {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            Self::One(code) => *code == status,
            Self::Any(codes) => codes.contains(&status),
        }
    }

    /// Render the accepted set for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::One(code) => code.to_string(),
            Self::Any(codes) => format!(
                "[{}]",
                codes
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl Serialize for ExpectStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::One(code) => serializer.serialize_u16(*code),
            Self::Any(codes) => codes.serialize(serializer),
        }
    }
}

fn status_from_f64<E: de::Error>(value: f64) -> Result<u16, E> {
    if value.fract() != 0.0 {
        return Err(E::custom(format!(
            "status code must be an integer, got {value}"
        )));
    }
    status_from_i64(value as i64)
}

fn status_from_i64<E: de::Error>(value: i64) -> Result<u16, E> {
    u16::try_from(value)
        .map_err(|_| E::custom(format!("status code {value} out of range")))
}

/// A single status code inside a list, with the same numeric coercion.
struct StatusCode(u16);

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CodeVisitor;

        impl Visitor<'_> for CodeVisitor {
            type Value = StatusCode;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integer HTTP status code")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                status_from_i64(i64::try_from(v).map_err(|_| {
                    E::custom(format!("status code {v} out of range"))
                })?)
                .map(StatusCode)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                status_from_i64(v).map(StatusCode)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                status_from_f64(v).map(StatusCode)
            }
        }

        deserializer.deserialize_any(CodeVisitor)
    }
}

impl<'de> Deserialize<'de> for ExpectStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ExpectVisitor;

        impl<'de> Visitor<'de> for ExpectVisitor {
            type Value = ExpectStatus;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integer status code or a list of integer status codes")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                status_from_i64(i64::try_from(v).map_err(|_| {
                    E::custom(format!("status code {v} out of range"))
                })?)
                .map(ExpectStatus::One)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                status_from_i64(v).map(ExpectStatus::One)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                status_from_f64(v).map(ExpectStatus::One)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut codes = Vec::new();
                while let Some(StatusCode(code)) = seq.next_element()? {
                    codes.push(code);
                }
                Ok(ExpectStatus::Any(codes))
            }
        }

        deserializer.deserialize_any(ExpectVisitor)
    }
}

/// Retry behaviour attached to one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first; absent or ≤ 0 means a single
    /// attempt with no retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Backoff ceiling.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Backoff multiplier, ≥ 1.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Which failures to retry on; empty means any failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_on: Vec<RetryPredicate>,
}

fn default_max_attempts() -> i64 {
    1
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            retry_on: Vec::new(),
        }
    }
}

/// One clause of a `retry_on` list.
///
/// Parsed from the document strings `timeout`, `network`, `error`,
/// `status:<N>`, or any other literal, which matches as a case-insensitive
/// substring of the failure text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetryPredicate {
    /// Failure text contains "timeout" or "deadline exceeded".
    Timeout,
    /// Failure text contains "network", "connection" or "dns".
    Network,
    /// Failure text contains "status code <N>" or "status <N>".
    Status(u16),
    /// Matches any failure.
    Any,
    /// Case-insensitive substring of the failure text.
    Substring(String),
}

impl RetryPredicate {
    pub fn matches(&self, error_text: &str) -> bool {
        let lowered = error_text.to_lowercase();
        match self {
            Self::Timeout => lowered.contains("timeout") || lowered.contains("deadline exceeded"),
            Self::Network => {
                lowered.contains("network")
                    || lowered.contains("connection")
                    || lowered.contains("dns")
            }
            Self::Status(code) => {
                lowered.contains(&format!("status code {code}"))
                    || lowered.contains(&format!("status {code}"))
            }
            Self::Any => true,
            Self::Substring(needle) => lowered.contains(&needle.to_lowercase()),
        }
    }
}

impl From<String> for RetryPredicate {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "timeout" => Self::Timeout,
            "network" => Self::Network,
            "error" => Self::Any,
            other => {
                if let Some(code) = other
                    .strip_prefix("status:")
                    .and_then(|n| n.trim().parse::<u16>().ok())
                {
                    Self::Status(code)
                } else {
                    Self::Substring(raw)
                }
            }
        }
    }
}

impl From<RetryPredicate> for String {
    fn from(pred: RetryPredicate) -> Self {
        match pred {
            RetryPredicate::Timeout => "timeout".to_string(),
            RetryPredicate::Network => "network".to_string(),
            RetryPredicate::Any => "error".to_string(),
            RetryPredicate::Status(code) => format!("status:{code}"),
            RetryPredicate::Substring(s) => s,
        }
    }
}
