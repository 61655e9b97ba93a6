// `windlass agent [dir]` - supervise every workflow in a directory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use windlass_api::ApiState;
use windlass_engine::{Agent, AgentConfig, Metrics, WorkflowRegistry};
use windlass_storage::HistoryStore;

use super::{print_plan, shutdown_signal};
use crate::output::OutputFormat;
use crate::CliError;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    dir: &Path,
    watch: bool,
    log_dir: Option<PathBuf>,
    http_port: u16,
    dry_run: bool,
    db: &Path,
    format: OutputFormat,
) -> Result<(), CliError> {
    if dry_run {
        return plan_only(dir, format);
    }

    let store = HistoryStore::open(db)
        .await
        .with_context(|| format!("failed to open history store at {}", db.display()))?;
    let metrics = Arc::new(Metrics::new().context("failed to build metrics registry")?);
    let registry = Arc::new(WorkflowRegistry::new());

    let config = AgentConfig::new(dir)
        .with_watch(watch)
        .with_log_dir(log_dir);
    let agent = Agent::new(config, store.clone(), metrics.clone(), registry.clone())
        .map_err(|e| CliError::Internal(e.into()))?;

    let report = agent
        .start()
        .await
        .map_err(|e| CliError::Internal(e.into()))?;
    tracing::info!(loaded = report.loaded, failed = report.failed, "workflows scheduled");

    let api_state = ApiState::new(agent.clone(), registry, store, metrics);
    let http_cancel = agent.cancellation_token().child_token();
    let mut serve_task = tokio::spawn(windlass_api::serve(api_state, http_port, http_cancel));

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("signal received, shutting down");
        }
        // A bind failure (or any server error) is startup-critical.
        result = &mut serve_task => {
            agent.stop().await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CliError::Internal(e)),
                Err(join_error) => Err(CliError::Internal(join_error.into())),
            };
        }
    }

    // Root cancellation drains workflows and gracefully stops the HTTP
    // surface through its child token.
    agent.stop().await;
    let _ = serve_task.await;
    Ok(())
}

fn plan_only(dir: &Path, format: OutputFormat) -> Result<(), CliError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CliError::Usage(format!("cannot read {}: {e}", dir.display())))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    let mut valid = 0usize;
    let mut invalid = 0usize;
    for path in &paths {
        match windlass_core::parse_file(path) {
            Ok(parsed) => {
                valid += 1;
                if format.is_text() {
                    print_plan(path, &parsed.workflow);
                    for warning in &parsed.warnings {
                        println!("        warning: {warning}");
                    }
                    println!();
                } else {
                    format.print_value(&parsed.workflow);
                }
            }
            Err(e) => {
                invalid += 1;
                eprintln!("{}: {e}", path.display());
            }
        }
    }
    if format.is_text() {
        println!("{valid} workflow(s) would be scheduled, {invalid} rejected");
    }
    Ok(())
}
