//! The execution pipeline
//!
//! One trigger firing produces exactly one workflow execution: open a
//! history record, run the actions strictly in declared order (each under
//! its retry policy), record per-action metrics and history, close the
//! record with the aggregate outcome. The chain does not short-circuit on
//! failure; a failing action marks the execution failed and the remaining
//! actions still run.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use windlass_core::{Action, ActionKind, Workflow};
use windlass_storage::{ActionStatus, ExecutionStatus, HistoryStore, StoreError};

use crate::execlog::ExecutionLog;
use crate::executor::{BashExecutor, HttpExecutor};
use crate::metrics::Metrics;
use crate::registry::WorkflowRegistry;
use crate::retry::{run_with_retry, JitterSource, RetryOutcome, RetryPolicy, ThreadRngJitter};

pub struct ExecutionPipeline {
    store: HistoryStore,
    metrics: Arc<Metrics>,
    registry: Arc<WorkflowRegistry>,
    bash: BashExecutor,
    http: HttpExecutor,
    jitter: Arc<dyn JitterSource>,
    exec_log: Option<ExecutionLog>,
}

struct ActionResult {
    status: ActionStatus,
    error: Option<String>,
}

impl ExecutionPipeline {
    pub fn new(
        store: HistoryStore,
        metrics: Arc<Metrics>,
        registry: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            store,
            metrics,
            registry,
            bash: BashExecutor::new(),
            http: HttpExecutor::new(),
            jitter: Arc::new(ThreadRngJitter),
            exec_log: None,
        }
    }

    /// Replace the jitter source. Tests inject a fixed one.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attach per-workflow execution log files.
    pub fn with_exec_log(mut self, exec_log: ExecutionLog) -> Self {
        self.exec_log = Some(exec_log);
        self
    }

    /// Run one execution of `workflow`. Never returns an error: failures
    /// land in history, metrics and the registry.
    pub async fn run(&self, workflow: &Workflow, cancel: &CancellationToken) {
        let trigger_type = workflow.trigger.kind();
        let started = Instant::now();

        let execution_id = match self.store.start_workflow(&workflow.name, trigger_type).await {
            Ok(id) => Some(id),
            Err(e) => {
                // The execution still runs; only its observability degrades.
                warn!(workflow = %workflow.name, "failed to open execution record: {e}");
                None
            }
        };

        info!(
            workflow = %workflow.name,
            execution_id,
            trigger = trigger_type,
            "execution started"
        );
        self.log_line(&workflow.name, "execution started").await;

        let mut aggregate = ExecutionStatus::Success;
        let mut first_error: Option<String> = None;

        for action in &workflow.actions {
            let result = self.run_action(workflow, action, execution_id, cancel).await;
            match result.status {
                ActionStatus::Failed => {
                    aggregate = ExecutionStatus::Failed;
                    if first_error.is_none() {
                        first_error = result.error;
                    }
                }
                ActionStatus::Cancelled => {
                    aggregate = ExecutionStatus::Cancelled;
                }
                ActionStatus::Success | ActionStatus::Skipped | ActionStatus::Running => {}
            }
            if aggregate == ExecutionStatus::Cancelled {
                break;
            }
        }

        let elapsed = started.elapsed();
        if let Some(id) = execution_id {
            match self
                .store
                .complete_workflow(id, aggregate, first_error.as_deref(), elapsed)
                .await
            {
                Ok(()) => {}
                Err(e @ StoreError::AlreadyCompleted(_)) => {
                    error!(workflow = %workflow.name, execution_id = id, "invariant violation: {e}");
                }
                Err(e) => {
                    warn!(workflow = %workflow.name, execution_id = id, "failed to close execution record: {e}");
                }
            }
        }

        self.metrics
            .record_execution(&workflow.name, aggregate.as_str(), elapsed.as_secs_f64());
        self.registry
            .record_execution(&workflow.name, aggregate, first_error.as_deref());

        info!(
            workflow = %workflow.name,
            execution_id,
            status = %aggregate,
            duration_ms = elapsed.as_millis() as u64,
            "execution finished"
        );
        self.log_line(
            &workflow.name,
            &format!(
                "execution finished status={aggregate} duration_ms={}",
                elapsed.as_millis()
            ),
        )
        .await;
    }

    async fn run_action(
        &self,
        workflow: &Workflow,
        action: &Action,
        execution_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> ActionResult {
        let action_type = action.type_name();
        let started = Instant::now();

        let action_record_id = match execution_id {
            Some(exec_id) => match self
                .store
                .start_action(exec_id, &action.name, action_type)
                .await
            {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(
                        workflow = %workflow.name,
                        action = %action.name,
                        "failed to open action record: {e}"
                    );
                    None
                }
            },
            None => None,
        };

        let policy = RetryPolicy::from_config(action.retry.as_ref());
        let (status, error, output) = match &action.kind {
            ActionKind::Bash(bash) => {
                let outcome = run_with_retry(&policy, cancel, &*self.jitter, |_| {
                    self.bash.execute(&action.name, bash, cancel)
                })
                .await;
                self.fold_outcome(workflow, action, outcome)
            }
            ActionKind::Http(http) => {
                let outcome = run_with_retry(&policy, cancel, &*self.jitter, |_| {
                    self.http.execute(&action.name, http, cancel)
                })
                .await;
                self.fold_outcome(workflow, action, outcome)
            }
            ActionKind::Custom(custom) => {
                // Reserved action type. Never claims success.
                info!(
                    workflow = %workflow.name,
                    action = %action.name,
                    function = %custom.function_name,
                    "custom action execution is not implemented, skipping"
                );
                (ActionStatus::Skipped, None, None)
            }
        };

        // Histogram covers the whole attempt chain, backoff included.
        let elapsed = started.elapsed();
        self.metrics.record_action(
            &workflow.name,
            &action.name,
            action_type,
            status.as_str(),
            elapsed.as_secs_f64(),
        );

        if let Some(id) = action_record_id {
            match self
                .store
                .complete_action(id, status, error.as_deref(), output.as_deref(), elapsed)
                .await
            {
                Ok(()) => {}
                Err(e @ StoreError::AlreadyCompleted(_)) => {
                    error!(action = %action.name, "invariant violation: {e}");
                }
                Err(e) => {
                    warn!(action = %action.name, "failed to close action record: {e}");
                }
            }
        }

        self.log_line(
            &workflow.name,
            &format!(
                "action {} status={status} duration_ms={}",
                action.name,
                elapsed.as_millis()
            ),
        )
        .await;

        ActionResult { status, error }
    }

    fn fold_outcome(
        &self,
        workflow: &Workflow,
        action: &Action,
        outcome: RetryOutcome,
    ) -> (ActionStatus, Option<String>, Option<String>) {
        match outcome {
            RetryOutcome::Success { output, attempts } => {
                if attempts > 1 {
                    info!(
                        workflow = %workflow.name,
                        action = %action.name,
                        attempts,
                        "action succeeded after retry"
                    );
                }
                (ActionStatus::Success, None, Some(output))
            }
            RetryOutcome::Failed { error, attempts } => {
                let text = error.to_string();
                warn!(
                    workflow = %workflow.name,
                    action = %action.name,
                    attempts,
                    "action failed: {text}"
                );
                (ActionStatus::Failed, Some(text), None)
            }
            RetryOutcome::Cancelled { attempts } => {
                info!(
                    workflow = %workflow.name,
                    action = %action.name,
                    attempts,
                    "action cancelled"
                );
                (ActionStatus::Cancelled, None, None)
            }
        }
    }

    async fn log_line(&self, workflow: &str, line: &str) {
        if let Some(log) = &self.exec_log {
            log.append(workflow, line).await;
        }
    }
}
