//! Agent supervisor end-to-end: directory scan, hot-reload, shutdown drain.

use std::sync::Arc;
use std::time::Duration;

use windlass_engine::{Agent, AgentConfig, Metrics, WorkflowRegistry};
use windlass_storage::HistoryStore;

const GOOD_CRON: &str = r#"
name: every-second
trigger:
  type: cron
  schedule: "* * * * * *"
actions:
  - name: tick
    type: bash
    command: exit 0
"#;

const BAD_DOC: &str = r#"
name: broken
trigger:
  type: cron
  schedule: "not a schedule"
actions:
  - name: a
    type: bash
    command: ls
"#;

async fn build_agent(dir: &std::path::Path, watch: bool) -> Agent {
    let store = HistoryStore::in_memory().await.unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = Arc::new(WorkflowRegistry::new());
    let config = AgentConfig::new(dir)
        .with_watch(watch)
        .with_settle_delay(Duration::from_millis(100));
    Agent::new(config, store, metrics, registry).unwrap()
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_bad_document_does_not_abort_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("good.yaml"), GOOD_CRON).unwrap();
    std::fs::write(dir.path().join("bad.yaml"), BAD_DOC).unwrap();
    std::fs::write(dir.path().join("ignored.txt"), "not a workflow").unwrap();

    let agent = build_agent(dir.path(), false).await;
    let report = agent.start().await.unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.failed, 1);
    assert!(agent.is_ready());

    agent.stop().await;
}

#[tokio::test]
async fn test_missing_directory_is_fatal() {
    let agent = build_agent(std::path::Path::new("/no/such/dir"), false).await;
    assert!(agent.start().await.is_err());
    assert!(!agent.is_ready());
}

#[tokio::test]
async fn test_duplicate_names_keep_first_document() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.yaml"), GOOD_CRON).unwrap();
    std::fs::write(dir.path().join("b.yaml"), GOOD_CRON).unwrap();

    let agent = build_agent(dir.path(), false).await;
    let report = agent.start().await.unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.failed, 1);

    agent.stop().await;
}

#[tokio::test]
async fn test_ready_with_zero_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let agent = build_agent(dir.path(), false).await;
    let report = agent.start().await.unwrap();
    assert_eq!(report.loaded, 0);
    assert!(agent.is_ready());
    agent.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_firing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("w.yaml"), GOOD_CRON).unwrap();

    // File-backed store: the agent closes its pool on stop, so post-stop
    // assertions reopen the same file.
    let db_dir = tempfile::tempdir().unwrap();
    let db_path = db_dir.path().join("history.db");
    let store = HistoryStore::open(&db_path).await.unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = Arc::new(WorkflowRegistry::new());
    let config = AgentConfig::new(dir.path()).with_watch(false);
    let agent = Agent::new(config, store.clone(), metrics.clone(), registry.clone()).unwrap();

    agent.start().await.unwrap();

    // Wait for at least one per-second fire.
    assert!(
        wait_until_records(&store, 1, Duration::from_secs(4)).await,
        "cron workflow never fired"
    );

    let shutdown_started = std::time::Instant::now();
    agent.stop().await;
    assert!(
        shutdown_started.elapsed() < Duration::from_secs(3),
        "drain must be bounded"
    );

    // Property 4: no new execution records after shutdown.
    let reopened = HistoryStore::open(&db_path).await.unwrap();
    let after_stop = store_count(&reopened).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store_count(&reopened).await, after_stop);
}

async fn store_count(store: &HistoryStore) -> usize {
    store.recent_executions(None, 100).await.unwrap().len()
}

async fn wait_until_records(store: &HistoryStore, want: usize, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if store_count(store).await >= want {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_hot_reload_create_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::in_memory().await.unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = Arc::new(WorkflowRegistry::new());
    let config = AgentConfig::new(dir.path())
        .with_watch(true)
        .with_settle_delay(Duration::from_millis(100));
    let agent = Agent::new(config, store.clone(), metrics.clone(), registry.clone()).unwrap();

    agent.start().await.unwrap();
    assert_eq!(registry.len(), 0);

    // Drop a new document in: it must get picked up.
    let path = dir.path().join("late.yaml");
    std::fs::write(
        &path,
        r#"
name: late-arrival
trigger:
  type: cron
  schedule: "0 0 1 1 *"
actions:
  - name: a
    type: bash
    command: exit 0
"#,
    )
    .unwrap();

    let reg = registry.clone();
    assert!(
        wait_for(move || reg.get("late-arrival").is_some(), Duration::from_secs(5)).await,
        "created document was not loaded"
    );

    // Remove it: the task must be cancelled and the entry dropped.
    std::fs::remove_file(&path).unwrap();
    let reg = registry.clone();
    assert!(
        wait_for(move || reg.get("late-arrival").is_none(), Duration::from_secs(5)).await,
        "removed document was not unloaded"
    );

    agent.stop().await;
}

#[tokio::test]
async fn test_hot_reload_replaces_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let store = HistoryStore::in_memory().await.unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = Arc::new(WorkflowRegistry::new());
    let config = AgentConfig::new(dir.path())
        .with_watch(true)
        .with_settle_delay(Duration::from_millis(100));
    let agent = Agent::new(config, store.clone(), metrics.clone(), registry.clone()).unwrap();

    let path = dir.path().join("w.yaml");
    std::fs::write(
        &path,
        "name: shifty\ntrigger:\n  type: cron\n  schedule: '*/5 * * * *'\nactions: [{name: a, type: bash, command: 'exit 0'}]",
    )
    .unwrap();
    agent.start().await.unwrap();
    assert_eq!(
        registry.get("shifty").unwrap().schedule.as_deref(),
        Some("*/5 * * * *")
    );

    // Rewrite with a different schedule: the replacement task must carry it.
    std::fs::write(
        &path,
        "name: shifty\ntrigger:\n  type: cron\n  schedule: '*/7 * * * *'\nactions: [{name: a, type: bash, command: 'exit 0'}]",
    )
    .unwrap();

    let reg = registry.clone();
    assert!(
        wait_for(
            move || {
                reg.get("shifty")
                    .map(|info| info.schedule.as_deref() == Some("*/7 * * * *"))
                    .unwrap_or(false)
            },
            Duration::from_secs(5)
        )
        .await,
        "rewritten document was not reloaded"
    );

    // Parse failure on rewrite leaves the slot empty.
    std::fs::write(&path, "name: shifty\ntrigger:\n  type: cron\nactions: []").unwrap();
    let reg = registry.clone();
    assert!(
        wait_for(move || reg.get("shifty").is_none(), Duration::from_secs(5)).await,
        "broken rewrite must leave the slot empty"
    );

    agent.stop().await;
}
