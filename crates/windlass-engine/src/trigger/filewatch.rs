//! Filewatch trigger
//!
//! watching → firing → watching, until cancelled. Raw notify events map
//! onto the five document event names; an event outside the workflow's
//! configured set is ignored. No debouncing: consecutive matching events
//! produce consecutive executions, serialised through the pipeline await.

use std::path::Path;
use std::sync::Arc;

use notify::{RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use windlass_core::{WatchEventKind, Workflow};

use super::TriggerError;
use crate::metrics::Metrics;
use crate::pipeline::ExecutionPipeline;
use crate::registry::WorkflowRegistry;

/// Map a raw notify event kind onto a document event name.
pub fn map_event_kind(kind: &notify::EventKind) -> Option<WatchEventKind> {
    use notify::event::{EventKind, ModifyKind};
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Create),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(WatchEventKind::Write)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(WatchEventKind::Chmod),
        EventKind::Remove(_) => Some(WatchEventKind::Remove),
        _ => None,
    }
}

pub async fn run_filewatch_trigger(
    workflow: &Workflow,
    path: &Path,
    events: &[WatchEventKind],
    pipeline: Arc<ExecutionPipeline>,
    metrics: Arc<Metrics>,
    _registry: Arc<WorkflowRegistry>,
    cancel: CancellationToken,
) -> Result<(), TriggerError> {
    if !path.exists() {
        return Err(TriggerError::WatchPathMissing(path.to_path_buf()));
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        // Called from notify's own thread; unbounded send never blocks.
        let _ = tx.send(result);
    })
    .map_err(|e| TriggerError::WatchSetup {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|e| TriggerError::WatchSetup {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    info!(
        workflow = %workflow.name,
        path = %path.display(),
        events = ?events.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
        "filewatch trigger watching"
    );

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => received,
        };
        let Some(result) = received else {
            // Watcher gone; nothing more will arrive.
            break;
        };
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(workflow = %workflow.name, "watch error stream: {e}");
                continue;
            }
        };

        let Some(kind) = map_event_kind(&event.kind) else {
            continue;
        };
        if !events.contains(&kind) {
            debug!(workflow = %workflow.name, event = %kind, "event outside configured set");
            continue;
        }

        let event_path = event
            .paths
            .first()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        info!(
            workflow = %workflow.name,
            event = %kind,
            path = %event_path,
            "filewatch trigger fired"
        );
        metrics.record_trigger_fire(&workflow.name, "filewatch");
        pipeline.run(workflow, &cancel).await;
    }

    // Dropping the watcher releases the OS watch.
    drop(watcher);
    info!(workflow = %workflow.name, "filewatch trigger stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, EventKind, MetadataKind, ModifyKind, RemoveKind};

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            map_event_kind(&EventKind::Create(CreateKind::File)),
            Some(WatchEventKind::Create)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Some(WatchEventKind::Write)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Metadata(
                MetadataKind::Permissions
            ))),
            Some(WatchEventKind::Chmod)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(RemoveKind::File)),
            Some(WatchEventKind::Remove)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Name(
                notify::event::RenameMode::Any
            ))),
            Some(WatchEventKind::Rename)
        );
        assert_eq!(map_event_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }
}
