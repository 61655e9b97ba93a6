//! In-memory workflow registry
//!
//! The read-only projection behind `/status` and `/api/workflows/active`.
//! Per-workflow tasks mutate their own entry; readers clone a snapshot and
//! never hold the lock past it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use windlass_core::{Trigger, Workflow};
use windlass_storage::ExecutionStatus;

/// Live state of one supervised workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Active,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: String,
}

/// Projection entry for one workflow.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeWorkflowInfo {
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    /// Cron expression; `None` for filewatch workflows.
    pub schedule: Option<String>,
    /// Watched path; `None` for cron workflows.
    pub watch_path: Option<String>,
    pub status: RuntimeStatus,
    pub registered_at: DateTime<Utc>,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub total_executions: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub last_error: Option<String>,
    pub actions: Vec<ActionSummary>,
}

impl RuntimeWorkflowInfo {
    fn for_workflow(workflow: &Workflow) -> Self {
        let (schedule, watch_path) = match &workflow.trigger {
            Trigger::Cron { schedule } => (Some(schedule.clone()), None),
            Trigger::FileWatch { path, .. } => (None, Some(path.display().to_string())),
        };
        Self {
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            trigger_type: workflow.trigger.kind().to_string(),
            schedule,
            watch_path,
            status: RuntimeStatus::Active,
            registered_at: Utc::now(),
            last_execution: None,
            next_execution: None,
            total_executions: 0,
            succeeded: 0,
            failed: 0,
            last_error: None,
            actions: workflow
                .actions
                .iter()
                .map(|a| ActionSummary {
                    name: a.name.clone(),
                    action_type: a.type_name().to_string(),
                })
                .collect(),
        }
    }
}

/// Thread-safe name → runtime-info map.
#[derive(Default)]
pub struct WorkflowRegistry {
    inner: RwLock<HashMap<String, RuntimeWorkflowInfo>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace, on hot-reload) the entry for a workflow.
    pub fn register(&self, workflow: &Workflow) {
        let info = RuntimeWorkflowInfo::for_workflow(workflow);
        self.inner.write().insert(workflow.name.clone(), info);
    }

    pub fn remove(&self, name: &str) {
        self.inner.write().remove(name);
    }

    pub fn set_status(&self, name: &str, status: RuntimeStatus, error: Option<String>) {
        let mut map = self.inner.write();
        if let Some(info) = map.get_mut(name) {
            info.status = status;
            if error.is_some() {
                info.last_error = error;
            }
        }
    }

    pub fn set_next_execution(&self, name: &str, at: Option<DateTime<Utc>>) {
        let mut map = self.inner.write();
        if let Some(info) = map.get_mut(name) {
            info.next_execution = at;
        }
    }

    /// Fold one finished execution into the counters.
    pub fn record_execution(&self, name: &str, status: ExecutionStatus, error: Option<&str>) {
        let mut map = self.inner.write();
        if let Some(info) = map.get_mut(name) {
            info.total_executions += 1;
            info.last_execution = Some(Utc::now());
            match status {
                ExecutionStatus::Success => info.succeeded += 1,
                ExecutionStatus::Failed => {
                    info.failed += 1;
                    info.last_error = error.map(str::to_string);
                }
                ExecutionStatus::Running | ExecutionStatus::Cancelled => {}
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<RuntimeWorkflowInfo> {
        self.inner.read().get(name).cloned()
    }

    /// Sorted snapshot for the HTTP surface.
    pub fn snapshot(&self) -> Vec<RuntimeWorkflowInfo> {
        let mut entries: Vec<_> = self.inner.read().values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use windlass_core::{parse_str, WatchEventKind};

    fn workflow(name: &str) -> Workflow {
        parse_str(&format!(
            "name: {name}\ntrigger:\n  type: cron\n  schedule: '* * * * *'\nactions:\n  - name: a\n    type: bash\n    command: ls"
        ))
        .unwrap()
        .workflow
    }

    #[test]
    fn test_register_and_snapshot() {
        let registry = WorkflowRegistry::new();
        registry.register(&workflow("beta"));
        registry.register(&workflow("alpha"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "alpha"); // sorted
        assert_eq!(snapshot[0].status, RuntimeStatus::Active);
        assert_eq!(snapshot[0].schedule.as_deref(), Some("* * * * *"));
        assert_eq!(snapshot[0].actions.len(), 1);
        assert_eq!(snapshot[0].actions[0].action_type, "bash");
    }

    #[test]
    fn test_filewatch_entry_has_path_not_schedule() {
        let registry = WorkflowRegistry::new();
        let workflow = Workflow {
            name: "watcher".into(),
            description: None,
            trigger: Trigger::FileWatch {
                path: "/tmp/in".into(),
                events: vec![WatchEventKind::Create],
            },
            actions: workflow("x").actions,
        };
        registry.register(&workflow);

        let info = registry.get("watcher").unwrap();
        assert_eq!(info.trigger_type, "filewatch");
        assert!(info.schedule.is_none());
        assert_eq!(info.watch_path.as_deref(), Some("/tmp/in"));
    }

    #[test]
    fn test_record_execution_updates_counters() {
        let registry = WorkflowRegistry::new();
        registry.register(&workflow("w"));

        registry.record_execution("w", ExecutionStatus::Success, None);
        registry.record_execution("w", ExecutionStatus::Failed, Some("exit code 1"));
        registry.record_execution("w", ExecutionStatus::Cancelled, None);

        let info = registry.get("w").unwrap();
        assert_eq!(info.total_executions, 3);
        assert_eq!(info.succeeded, 1);
        assert_eq!(info.failed, 1);
        assert_eq!(info.last_error.as_deref(), Some("exit code 1"));
        assert!(info.last_execution.is_some());
    }

    #[test]
    fn test_set_status_keeps_earlier_error() {
        let registry = WorkflowRegistry::new();
        registry.register(&workflow("w"));
        registry.set_status("w", RuntimeStatus::Error, Some("boom".into()));
        registry.set_status("w", RuntimeStatus::Stopped, None);

        let info = registry.get("w").unwrap();
        assert_eq!(info.status, RuntimeStatus::Stopped);
        assert_eq!(info.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_reregister_resets_counters() {
        let registry = WorkflowRegistry::new();
        registry.register(&workflow("w"));
        registry.record_execution("w", ExecutionStatus::Success, None);
        registry.register(&workflow("w")); // hot-reload replacement

        assert_eq!(registry.get("w").unwrap().total_executions, 0);
    }

    #[test]
    fn test_remove() {
        let registry = WorkflowRegistry::new();
        registry.register(&workflow("w"));
        registry.remove("w");
        assert!(registry.is_empty());
    }
}
