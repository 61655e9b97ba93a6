//! Trigger state machines
//!
//! One trigger per workflow, owned by that workflow's task. Every wait a
//! trigger performs observes the workflow's cancellation token, so a
//! cancelled workflow cannot fire again, reschedule, or keep a filesystem
//! watch alive.

mod cron;
mod filewatch;

pub use cron::run_cron_trigger;
pub use filewatch::{map_event_kind, run_filewatch_trigger};

use std::path::PathBuf;

/// Setup failure that prevents a workflow's trigger from starting.
/// Scoped to the one workflow; the agent keeps running.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("watch path does not exist: {0}")]
    WatchPathMissing(PathBuf),

    #[error("failed to register filesystem watch on {path}: {reason}")]
    WatchSetup { path: PathBuf, reason: String },
}
