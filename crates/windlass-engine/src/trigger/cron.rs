//! Cron trigger
//!
//! scheduled → firing → scheduled, until cancelled. Only one firing is in
//! flight at a time: the next instant is computed after the pipeline
//! returns, so a long-running execution drops missed ticks instead of
//! queueing them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use windlass_core::{schedule, Workflow};

use super::TriggerError;
use crate::metrics::Metrics;
use crate::pipeline::ExecutionPipeline;
use crate::registry::WorkflowRegistry;

/// How often the background updater refreshes `next_execution` in the
/// registry between fires.
const NEXT_EXECUTION_REFRESH: Duration = Duration::from_secs(30);

pub async fn run_cron_trigger(
    workflow: &Workflow,
    expr: &str,
    pipeline: Arc<ExecutionPipeline>,
    metrics: Arc<Metrics>,
    registry: Arc<WorkflowRegistry>,
    cancel: CancellationToken,
) -> Result<(), TriggerError> {
    let parsed = schedule::parse(expr).map_err(|e| TriggerError::InvalidSchedule {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;

    info!(workflow = %workflow.name, schedule = expr, "cron trigger scheduled");

    // Sibling updater keeps the projection accurate between fires. Its
    // token is a child of the workflow's, cancelled on every exit path.
    let updater_cancel = cancel.child_token();
    let updater = tokio::spawn(refresh_next_execution(
        parsed.clone(),
        workflow.name.clone(),
        registry.clone(),
        updater_cancel.clone(),
    ));

    loop {
        // Next instant is computed from now: ticks missed during a long
        // fire are dropped, not queued.
        let Some(next) = parsed.upcoming(Utc).next() else {
            debug!(workflow = %workflow.name, "schedule exhausted");
            break;
        };
        registry.set_next_execution(&workflow.name, Some(next));

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        metrics.record_trigger_fire(&workflow.name, "cron");
        debug!(workflow = %workflow.name, "cron trigger fired");
        pipeline.run(workflow, &cancel).await;
    }

    updater_cancel.cancel();
    let _ = updater.await;
    registry.set_next_execution(&workflow.name, None);
    info!(workflow = %workflow.name, "cron trigger stopped");
    Ok(())
}

async fn refresh_next_execution(
    parsed: cron::Schedule,
    name: String,
    registry: Arc<WorkflowRegistry>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(NEXT_EXECUTION_REFRESH);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                registry.set_next_execution(&name, parsed.upcoming(Utc).next());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedJitter;
    use windlass_core::parse_str;
    use windlass_storage::HistoryStore;

    async fn runtime() -> (Arc<ExecutionPipeline>, Arc<Metrics>, Arc<WorkflowRegistry>, HistoryStore)
    {
        let store = HistoryStore::in_memory().await.unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let registry = Arc::new(WorkflowRegistry::new());
        let pipeline = Arc::new(
            ExecutionPipeline::new(store.clone(), metrics.clone(), registry.clone())
                .with_jitter(Arc::new(FixedJitter(0.0))),
        );
        (pipeline, metrics, registry, store)
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_setup_error() {
        let (pipeline, metrics, registry, _store) = runtime().await;
        let workflow = parse_str(
            "name: w\ntrigger:\n  type: cron\n  schedule: '* * * * *'\nactions: [{name: a, type: bash, command: ls}]",
        )
        .unwrap()
        .workflow;

        let err = run_cron_trigger(
            &workflow,
            "not a schedule",
            pipeline,
            metrics,
            registry,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TriggerError::InvalidSchedule { .. }));
    }

    #[tokio::test]
    async fn test_fires_every_second_and_stops_on_cancel() {
        let (pipeline, metrics, registry, store) = runtime().await;
        let workflow = parse_str(
            "name: ticker\ntrigger:\n  type: cron\n  schedule: '* * * * * *'\nactions: [{name: a, type: bash, command: 'exit 0'}]",
        )
        .unwrap()
        .workflow;
        registry.register(&workflow);

        let cancel = CancellationToken::new();
        let handle = {
            let pipeline = pipeline.clone();
            let metrics = metrics.clone();
            let registry = registry.clone();
            let cancel = cancel.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move {
                run_cron_trigger(
                    &workflow,
                    "* * * * * *",
                    pipeline,
                    metrics,
                    registry,
                    cancel,
                )
                .await
            })
        };

        // Give it time for at least one per-second fire.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let fires = metrics.trigger_fire_value("ticker", "cron");
        assert!(fires >= 1, "expected at least one fire, got {fires}");

        let executions = store.recent_executions(Some("ticker"), 50).await.unwrap();
        assert_eq!(executions.len() as u64, fires, "one record per fire");
        assert!(executions.iter().all(|e| e.status == "success"));

        // Property 4: nothing fires after cancellation.
        let fires_after = metrics.trigger_fire_value("ticker", "cron");
        let records_after = store.recent_executions(Some("ticker"), 50).await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(metrics.trigger_fire_value("ticker", "cron"), fires_after);
        assert_eq!(
            store.recent_executions(Some("ticker"), 50).await.unwrap().len(),
            records_after
        );
    }

    #[tokio::test]
    async fn test_next_execution_published_to_registry() {
        let (pipeline, metrics, registry, _store) = runtime().await;
        let workflow = parse_str(
            "name: later\ntrigger:\n  type: cron\n  schedule: '0 0 1 1 *'\nactions: [{name: a, type: bash, command: ls}]",
        )
        .unwrap()
        .workflow;
        registry.register(&workflow);

        let cancel = CancellationToken::new();
        let handle = {
            let registry = registry.clone();
            let cancel = cancel.clone();
            let workflow = workflow.clone();
            tokio::spawn(async move {
                run_cron_trigger(&workflow, "0 0 1 1 *", pipeline, metrics, registry, cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        let next = registry.get("later").unwrap().next_execution;
        assert!(next.is_some());
        assert!(next.unwrap() > Utc::now());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(registry.get("later").unwrap().next_execution.is_none());
    }
}
