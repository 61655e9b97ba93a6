// `windlass run <file>` - execute one document's trigger until interrupted

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use windlass_core::Trigger;
use windlass_engine::{
    run_cron_trigger, run_filewatch_trigger, ExecutionPipeline, Metrics, WorkflowRegistry,
};
use windlass_storage::HistoryStore;

use super::{print_plan, shutdown_signal};
use crate::output::OutputFormat;
use crate::CliError;

pub async fn run(
    file: &Path,
    dry_run: bool,
    db: &Path,
    format: OutputFormat,
) -> Result<(), CliError> {
    let parsed = windlass_core::parse_file(file)
        .map_err(|e| CliError::Usage(format!("{}: {e}", file.display())))?;
    for warning in &parsed.warnings {
        eprintln!("warning: {warning}");
    }
    let workflow = parsed.workflow;

    if dry_run {
        if format.is_text() {
            print_plan(file, &workflow);
        } else {
            format.print_value(&workflow);
        }
        return Ok(());
    }

    let store = HistoryStore::open(db)
        .await
        .with_context(|| format!("failed to open history store at {}", db.display()))?;
    let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);
    let registry = Arc::new(WorkflowRegistry::new());
    registry.register(&workflow);
    let pipeline = Arc::new(ExecutionPipeline::new(
        store.clone(),
        metrics.clone(),
        registry.clone(),
    ));

    let cancel = CancellationToken::new();
    let mut trigger_task = {
        let workflow = workflow.clone();
        let (pipeline, metrics, registry) = (pipeline, metrics, registry.clone());
        let token = cancel.clone();
        tokio::spawn(async move {
            match workflow.trigger.clone() {
                Trigger::Cron { schedule } => {
                    run_cron_trigger(&workflow, &schedule, pipeline, metrics, registry, token)
                        .await
                }
                Trigger::FileWatch { path, events } => {
                    run_filewatch_trigger(
                        &workflow, &path, &events, pipeline, metrics, registry, token,
                    )
                    .await
                }
            }
        })
    };

    tracing::info!(workflow = %workflow.name, "running until interrupted (Ctrl-C to stop)");
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("signal received, stopping");
            cancel.cancel();
        }
        // Trigger setup failure (bad path, rejected schedule) ends the run
        // without waiting for a signal.
        result = &mut trigger_task => {
            store.close().await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CliError::Usage(format!("trigger failed: {e}"))),
                Err(join_error) => Err(CliError::Internal(join_error.into())),
            };
        }
    }

    let result = tokio::time::timeout(std::time::Duration::from_secs(2), trigger_task).await;
    store.close().await;

    match result {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(CliError::Usage(format!("trigger failed: {e}"))),
        Ok(Err(join_error)) => Err(CliError::Internal(join_error.into())),
        Err(_) => {
            tracing::warn!("drain deadline exceeded, abandoning in-flight execution");
            Ok(())
        }
    }
}
