//! The history store
//!
//! Single writer per record, many readers. Writes are awaited through
//! SQLite before returning, so a record that `start_workflow` handed out
//! an id for is on disk even if the process dies mid-execution; it will
//! simply stay `running`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::models::{ActionRow, ActionStatus, ExecutionRow, ExecutionStatus, WorkflowStats};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No record with that id
    #[error("execution record not found: {0}")]
    NotFound(i64),

    /// Completing a record that already reached a terminal status.
    /// A programming error at the call site; callers log and continue.
    #[error("execution record {0} already completed")]
    AlreadyCompleted(i64),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_executions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_name TEXT NOT NULL,
    trigger_type  TEXT NOT NULL,
    status        TEXT NOT NULL DEFAULT 'running',
    error         TEXT,
    started_at    TEXT NOT NULL,
    completed_at  TEXT,
    duration_ms   INTEGER
);

CREATE INDEX IF NOT EXISTS idx_workflow_executions_name_started
    ON workflow_executions(workflow_name, started_at);
CREATE INDEX IF NOT EXISTS idx_workflow_executions_status
    ON workflow_executions(status);

CREATE TABLE IF NOT EXISTS action_executions (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_execution_id INTEGER NOT NULL REFERENCES workflow_executions(id),
    action_name           TEXT NOT NULL,
    action_type           TEXT NOT NULL,
    status                TEXT NOT NULL DEFAULT 'running',
    error                 TEXT,
    output                TEXT,
    started_at            TEXT NOT NULL,
    completed_at          TEXT,
    duration_ms           INTEGER
);

CREATE INDEX IF NOT EXISTS idx_action_executions_workflow
    ON action_executions(workflow_execution_id);
CREATE INDEX IF NOT EXISTS idx_action_executions_status
    ON action_executions(status);
"#;

/// Durable record of past and in-flight executions.
#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Open (creating if missing) a store at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store. Used by tests and `--dry-run`.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // One connection: each new in-memory connection would be a fresh,
        // empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Workflow execution records
    // =========================================================================

    /// Insert a `running` row and return its id.
    pub async fn start_workflow(
        &self,
        workflow_name: &str,
        trigger_type: &str,
    ) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO workflow_executions (workflow_name, trigger_type, status, started_at)
            VALUES (?, ?, 'running', ?)
            RETURNING id
            "#,
        )
        .bind(workflow_name)
        .bind(trigger_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Move a `running` row to its terminal status. At-most-once: a second
    /// completion for the same id returns `AlreadyCompleted`.
    pub async fn complete_workflow(
        &self,
        id: i64,
        status: ExecutionStatus,
        error: Option<&str>,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = ?, error = ?, completed_at = ?, duration_ms = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(duration.as_millis() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM workflow_executions WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match exists {
                Some(_) => StoreError::AlreadyCompleted(id),
                None => StoreError::NotFound(id),
            });
        }

        Ok(())
    }

    // =========================================================================
    // Action execution records
    // =========================================================================

    /// Insert a `running` action row under an execution and return its id.
    pub async fn start_action(
        &self,
        workflow_execution_id: i64,
        action_name: &str,
        action_type: &str,
    ) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO action_executions
                (workflow_execution_id, action_name, action_type, status, started_at)
            VALUES (?, ?, ?, 'running', ?)
            RETURNING id
            "#,
        )
        .bind(workflow_execution_id)
        .bind(action_name)
        .bind(action_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Close an action row. Same at-most-once contract as
    /// [`complete_workflow`](Self::complete_workflow).
    pub async fn complete_action(
        &self,
        id: i64,
        status: ActionStatus,
        error: Option<&str>,
        output: Option<&str>,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE action_executions
            SET status = ?, error = ?, output = ?, completed_at = ?, duration_ms = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(output)
        .bind(Utc::now())
        .bind(duration.as_millis() as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM action_executions WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match exists {
                Some(_) => StoreError::AlreadyCompleted(id),
                None => StoreError::NotFound(id),
            });
        }

        Ok(())
    }

    // =========================================================================
    // Read-only projections
    // =========================================================================

    /// Most recent executions, optionally filtered to one workflow.
    /// Includes `running` rows.
    pub async fn recent_executions(
        &self,
        workflow_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ExecutionRow>, StoreError> {
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query_as::<_, ExecutionRow>(
                    r#"
                    SELECT id, workflow_name, trigger_type, status, error,
                           started_at, completed_at, duration_ms
                    FROM workflow_executions
                    WHERE workflow_name = ?
                    ORDER BY started_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(name)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ExecutionRow>(
                    r#"
                    SELECT id, workflow_name, trigger_type, status, error,
                           started_at, completed_at, duration_ms
                    FROM workflow_executions
                    ORDER BY started_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Failed executions since `since`, newest first.
    pub async fn failed_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionRow>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, workflow_name, trigger_type, status, error,
                   started_at, completed_at, duration_ms
            FROM workflow_executions
            WHERE status = 'failed' AND started_at >= ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Aggregate stats for one workflow since `since`. Terminal
    /// success/failed rows only.
    pub async fn stats(
        &self,
        workflow_name: &str,
        since: DateTime<Utc>,
    ) -> Result<WorkflowStats, StoreError> {
        #[derive(sqlx::FromRow)]
        struct StatsRow {
            total: i64,
            succeeded: Option<i64>,
            failed: Option<i64>,
            avg_duration_ms: Option<f64>,
            min_duration_ms: Option<i64>,
            max_duration_ms: Option<i64>,
            last_execution: Option<DateTime<Utc>>,
        }

        let row: StatsRow = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS total,
                   SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS succeeded,
                   SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                   AVG(duration_ms) AS avg_duration_ms,
                   MIN(duration_ms) AS min_duration_ms,
                   MAX(duration_ms) AS max_duration_ms,
                   MAX(started_at) AS last_execution
            FROM workflow_executions
            WHERE workflow_name = ?
              AND started_at >= ?
              AND status IN ('success', 'failed')
            "#,
        )
        .bind(workflow_name)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let succeeded = row.succeeded.unwrap_or(0);
        let failed = row.failed.unwrap_or(0);
        let success_rate = if row.total > 0 {
            succeeded as f64 / row.total as f64
        } else {
            0.0
        };

        Ok(WorkflowStats {
            workflow_name: workflow_name.to_string(),
            total: row.total,
            succeeded,
            failed,
            success_rate,
            avg_duration_ms: row.avg_duration_ms,
            min_duration_ms: row.min_duration_ms,
            max_duration_ms: row.max_duration_ms,
            last_execution: row.last_execution,
        })
    }

    /// Per-action rows of one execution, in declared order.
    pub async fn actions_for(&self, execution_id: i64) -> Result<Vec<ActionRow>, StoreError> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r#"
            SELECT id, workflow_execution_id, action_name, action_type, status,
                   error, output, started_at, completed_at, duration_ms
            FROM action_executions
            WHERE workflow_execution_id = ?
            ORDER BY id
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> HistoryStore {
        HistoryStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_start_and_complete_workflow() {
        let store = store().await;

        let id = store.start_workflow("w", "cron").await.unwrap();
        let rows = store.recent_executions(None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "running");
        assert!(rows[0].completed_at.is_none());

        store
            .complete_workflow(id, ExecutionStatus::Success, None, Duration::from_millis(42))
            .await
            .unwrap();

        let rows = store.recent_executions(None, 10).await.unwrap();
        assert_eq!(rows[0].status, "success");
        assert_eq!(rows[0].duration_ms, Some(42));
        assert!(rows[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_double_complete_is_invariant_violation() {
        let store = store().await;
        let id = store.start_workflow("w", "cron").await.unwrap();

        store
            .complete_workflow(id, ExecutionStatus::Failed, Some("boom"), Duration::ZERO)
            .await
            .unwrap();

        let err = store
            .complete_workflow(id, ExecutionStatus::Success, None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyCompleted(i) if i == id));
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_not_found() {
        let store = store().await;
        let err = store
            .complete_workflow(999, ExecutionStatus::Success, None, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(999)));
    }

    #[tokio::test]
    async fn test_action_records_reference_execution() {
        let store = store().await;
        let exec_id = store.start_workflow("w", "filewatch").await.unwrap();

        let a1 = store.start_action(exec_id, "first", "bash").await.unwrap();
        let a2 = store.start_action(exec_id, "second", "http").await.unwrap();
        assert!(a2 > a1);

        store
            .complete_action(a1, ActionStatus::Success, None, Some("ok"), Duration::from_millis(5))
            .await
            .unwrap();
        store
            .complete_action(
                a2,
                ActionStatus::Failed,
                Some("unexpected status code 500"),
                None,
                Duration::from_millis(7),
            )
            .await
            .unwrap();

        let actions = store.actions_for(exec_id).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].action_name, "first");
        assert_eq!(actions[0].status, "success");
        assert_eq!(actions[0].output.as_deref(), Some("ok"));
        assert_eq!(actions[1].status, "failed");
    }

    #[tokio::test]
    async fn test_recent_executions_filters_by_name() {
        let store = store().await;
        store.start_workflow("alpha", "cron").await.unwrap();
        store.start_workflow("beta", "cron").await.unwrap();

        let all = store.recent_executions(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);

        let alpha = store.recent_executions(Some("alpha"), 10).await.unwrap();
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].workflow_name, "alpha");
    }

    #[tokio::test]
    async fn test_failed_since_only_reports_failures() {
        let store = store().await;
        let since = Utc::now() - chrono::Duration::hours(1);

        let ok = store.start_workflow("w", "cron").await.unwrap();
        store
            .complete_workflow(ok, ExecutionStatus::Success, None, Duration::ZERO)
            .await
            .unwrap();

        let bad = store.start_workflow("w", "cron").await.unwrap();
        store
            .complete_workflow(bad, ExecutionStatus::Failed, Some("exit code 2"), Duration::ZERO)
            .await
            .unwrap();

        // still running, must not show up
        store.start_workflow("w", "cron").await.unwrap();

        let failures = store.failed_since(since, 10).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("exit code 2"));
    }

    #[tokio::test]
    async fn test_stats_math_excludes_running_and_cancelled() {
        let store = store().await;
        let since = Utc::now() - chrono::Duration::days(1);

        for status in [
            ExecutionStatus::Success,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
        ] {
            let id = store.start_workflow("w", "cron").await.unwrap();
            store
                .complete_workflow(id, status, None, Duration::from_millis(100))
                .await
                .unwrap();
        }

        let cancelled = store.start_workflow("w", "cron").await.unwrap();
        store
            .complete_workflow(cancelled, ExecutionStatus::Cancelled, None, Duration::ZERO)
            .await
            .unwrap();
        store.start_workflow("w", "cron").await.unwrap(); // running

        let stats = store.stats("w", since).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.avg_duration_ms, Some(100.0));
    }

    #[tokio::test]
    async fn test_stats_empty_window() {
        let store = store().await;
        let stats = store.stats("ghost", Utc::now()).await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.last_execution.is_none());
    }
}
