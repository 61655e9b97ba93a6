//! The agent supervisor
//!
//! Owns workflow lifecycles: scans a directory, starts one task per
//! accepted document, reacts to directory changes, and drains on shutdown.
//! Directory events funnel through a single consumer so cancel/start pairs
//! on the same path never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use windlass_core::{parse_file, Trigger, ValidationError, WatchEventKind, Workflow};
use windlass_storage::HistoryStore;

use crate::execlog::ExecutionLog;
use crate::metrics::Metrics;
use crate::pipeline::ExecutionPipeline;
use crate::registry::{RuntimeStatus, WorkflowRegistry};
use crate::trigger::{map_event_kind, run_cron_trigger, run_filewatch_trigger};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Directory scanned (non-recursively) for `*.yaml` / `*.yml`.
    pub workflow_dir: PathBuf,

    /// Hot-reload the directory on create/write/remove.
    pub watch: bool,

    /// Per-workflow execution log destination; `None` means the shared
    /// tracing sink only.
    pub log_dir: Option<PathBuf>,

    /// Wait after a create/write event before parsing, so partially
    /// written documents settle.
    pub settle_delay: Duration,

    /// Bound on the shutdown drain.
    pub shutdown_timeout: Duration,
}

impl AgentConfig {
    pub fn new(workflow_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflow_dir: workflow_dir.into(),
            watch: true,
            log_dir: None,
            settle_delay: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Startup counts. One document failing never aborts the run.
#[derive(Debug, Clone, Copy)]
pub struct StartReport {
    pub loaded: usize,
    pub failed: usize,
}

/// Startup-critical failures. Everything else is contained per workflow.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to scan workflow directory {path}: {source}")]
    ScanDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch workflow directory {path}: {reason}")]
    WatchDir { path: PathBuf, reason: String },

    #[error("failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-document rejection; logged and counted, never fatal.
#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("duplicate workflow name `{0}` (already loaded from another document)")]
    Duplicate(String),
}

struct WorkflowHandle {
    name: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

enum DirChange {
    /// Created or rewritten document: (re)load after the settle delay.
    Upsert(PathBuf),
    /// Removed document: cancel, do not restart.
    Removed(PathBuf),
}

/// Cheap handle to the supervisor; clones share one runtime.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    store: HistoryStore,
    metrics: Arc<Metrics>,
    registry: Arc<WorkflowRegistry>,
    pipeline: Arc<ExecutionPipeline>,
    root: CancellationToken,
    workflows: tokio::sync::Mutex<HashMap<PathBuf, WorkflowHandle>>,
    watcher_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    ready: AtomicBool,
}

impl Agent {
    /// Construct the engine: store, metrics and registry exist before the
    /// first task and are torn down after the drain.
    pub fn new(
        config: AgentConfig,
        store: HistoryStore,
        metrics: Arc<Metrics>,
        registry: Arc<WorkflowRegistry>,
    ) -> Result<Self, AgentError> {
        let mut pipeline =
            ExecutionPipeline::new(store.clone(), metrics.clone(), registry.clone());
        if let Some(log_dir) = &config.log_dir {
            let exec_log =
                ExecutionLog::new(log_dir.clone()).map_err(|source| AgentError::LogDir {
                    path: log_dir.clone(),
                    source,
                })?;
            pipeline = pipeline.with_exec_log(exec_log);
        }

        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                store,
                metrics,
                registry,
                pipeline: Arc::new(pipeline),
                root: CancellationToken::new(),
                workflows: tokio::sync::Mutex::new(HashMap::new()),
                watcher_task: std::sync::Mutex::new(None),
                ready: AtomicBool::new(false),
            }),
        })
    }

    /// Scan the directory and start a per-workflow task per accepted
    /// document. An unreadable directory is fatal; a bad document is not.
    pub async fn start(&self) -> Result<StartReport, AgentError> {
        let inner = &self.inner;
        let dir = inner.config.workflow_dir.clone();
        let mut entries =
            tokio::fs::read_dir(&dir)
                .await
                .map_err(|source| AgentError::ScanDir {
                    path: dir.clone(),
                    source,
                })?;

        let mut loaded = 0;
        let mut failed = 0;
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| AgentError::ScanDir {
                    path: dir.clone(),
                    source,
                })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if !is_workflow_document(&path) {
                continue;
            }
            match inner.load_and_spawn(&path).await {
                Ok(name) => {
                    loaded += 1;
                    info!(workflow = %name, path = %path.display(), "workflow loaded");
                }
                Err(e) => {
                    failed += 1;
                    warn!(path = %path.display(), "workflow rejected: {e}");
                }
            }
        }

        inner
            .metrics
            .set_active_workflows(inner.workflows.lock().await.len() as i64);
        inner.ready.store(true, Ordering::SeqCst);

        if inner.config.watch {
            self.spawn_dir_watcher()?;
        }

        info!(loaded, failed, dir = %dir.display(), "agent started");
        Ok(StartReport { loaded, failed })
    }

    /// Cancel the root scope, drain per-workflow tasks up to the shutdown
    /// deadline, close the store. In-flight executions past the deadline
    /// are abandoned; their history rows stay `running`.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// True once the initial directory scan finished, even with zero
    /// workflows loaded.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// The root scope; the HTTP surface hangs its graceful shutdown off
    /// a child of this.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.root.clone()
    }

    fn spawn_dir_watcher(&self) -> Result<(), AgentError> {
        let dir = self.inner.config.workflow_dir.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                if let Ok(event) = result {
                    let _ = tx.send(event);
                }
            })
            .map_err(|e| AgentError::WatchDir {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| AgentError::WatchDir {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let inner = Arc::clone(&self.inner);
        let cancel = inner.root.clone();
        let task = tokio::spawn(async move {
            // The watcher must live as long as this consumer.
            let _watcher = watcher;
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = rx.recv() => received,
                };
                let Some(event) = received else { break };
                for change in classify_dir_event(&event) {
                    inner.handle_reload(change).await;
                }
            }
            debug!("directory watcher stopped");
        });
        *self.inner.watcher_task.lock().unwrap() = Some(task);
        info!(dir = %dir.display(), "hot-reload watching workflow directory");
        Ok(())
    }
}

impl AgentInner {
    async fn load_and_spawn(&self, path: &Path) -> Result<String, LoadError> {
        let parsed = parse_file(path)?;
        for warning in &parsed.warnings {
            warn!(path = %path.display(), "{warning}");
        }
        let workflow = parsed.workflow;
        let name = workflow.name.clone();

        let mut map = self.workflows.lock().await;
        if map.values().any(|handle| handle.name == name) {
            return Err(LoadError::Duplicate(name));
        }
        let handle = self.spawn_workflow(workflow);
        map.insert(path.to_path_buf(), handle);
        Ok(name)
    }

    fn spawn_workflow(&self, workflow: Workflow) -> WorkflowHandle {
        let name = workflow.name.clone();
        let cancel = self.root.child_token();

        self.registry.register(&workflow);
        let schedule_label = match &workflow.trigger {
            Trigger::Cron { schedule } => schedule.clone(),
            Trigger::FileWatch { .. } => String::new(),
        };
        self.metrics
            .set_workflow_info(&name, workflow.trigger.kind(), &schedule_label);

        let pipeline = self.pipeline.clone();
        let metrics = self.metrics.clone();
        let registry = self.registry.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let result = match workflow.trigger.clone() {
                Trigger::Cron { schedule } => {
                    run_cron_trigger(
                        &workflow,
                        &schedule,
                        pipeline,
                        metrics,
                        registry.clone(),
                        token,
                    )
                    .await
                }
                Trigger::FileWatch { path, events } => {
                    run_filewatch_trigger(
                        &workflow,
                        &path,
                        &events,
                        pipeline,
                        metrics,
                        registry.clone(),
                        token,
                    )
                    .await
                }
            };
            match result {
                Ok(()) => {
                    registry.set_status(&workflow.name, RuntimeStatus::Stopped, None);
                }
                Err(e) => {
                    warn!(workflow = %workflow.name, "trigger failed: {e}");
                    registry.set_status(
                        &workflow.name,
                        RuntimeStatus::Error,
                        Some(e.to_string()),
                    );
                }
            }
        });

        WorkflowHandle { name, cancel, join }
    }

    /// Cancel the task loaded from `path`, wait for it to terminate, and
    /// drop its registry entry. Returns the workflow name if one was
    /// running.
    async fn cancel_workflow_at(&self, path: &Path) -> Option<String> {
        let handle = self.workflows.lock().await.remove(path)?;
        handle.cancel.cancel();
        let _ = handle.join.await;
        self.registry.remove(&handle.name);
        Some(handle.name)
    }

    async fn handle_reload(&self, change: DirChange) {
        match change {
            DirChange::Upsert(path) => {
                if let Some(name) = self.cancel_workflow_at(&path).await {
                    debug!(workflow = %name, path = %path.display(), "stopped for reload");
                }
                // Let partial writes settle before parsing.
                tokio::select! {
                    _ = self.root.cancelled() => return,
                    _ = tokio::time::sleep(self.config.settle_delay) => {}
                }
                match self.load_and_spawn(&path).await {
                    Ok(name) => {
                        info!(workflow = %name, path = %path.display(), "workflow (re)loaded");
                    }
                    Err(e) => {
                        // Old task is already gone; the slot stays empty.
                        warn!(path = %path.display(), "reload failed: {e}");
                    }
                }
            }
            DirChange::Removed(path) => {
                if let Some(name) = self.cancel_workflow_at(&path).await {
                    info!(workflow = %name, path = %path.display(), "workflow removed");
                }
            }
        }
        self.metrics
            .set_active_workflows(self.workflows.lock().await.len() as i64);
    }

    async fn stop(&self) {
        info!("agent shutting down");
        self.root.cancel();

        let handles: Vec<WorkflowHandle> = {
            let mut map = self.workflows.lock().await;
            map.drain().map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        let drain = async {
            for handle in handles {
                let _ = handle.join.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(count, "shutdown deadline exceeded, abandoning in-flight executions");
        }

        if let Some(task) = self.watcher_task.lock().unwrap().take() {
            task.abort();
        }

        self.metrics.set_active_workflows(0);
        self.store.close().await;
        info!("agent stopped");
    }
}

fn is_workflow_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn classify_dir_event(event: &notify::Event) -> Vec<DirChange> {
    let Some(kind) = map_event_kind(&event.kind) else {
        return Vec::new();
    };
    event
        .paths
        .iter()
        .filter(|path| is_workflow_document(path))
        .filter_map(|path| match kind {
            WatchEventKind::Create | WatchEventKind::Write => {
                Some(DirChange::Upsert(path.clone()))
            }
            WatchEventKind::Remove => Some(DirChange::Removed(path.clone())),
            // A rename is a removal of the old path or an arrival of the
            // new one, depending on which side we see.
            WatchEventKind::Rename => {
                if path.exists() {
                    Some(DirChange::Upsert(path.clone()))
                } else {
                    Some(DirChange::Removed(path.clone()))
                }
            }
            WatchEventKind::Chmod => None,
        })
        .collect()
}
