// Read-only history store queries: history, stats, failures.

use std::path::Path;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use windlass_storage::{ExecutionRow, HistoryStore};

use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use crate::CliError;

async fn open_store(db: &Path) -> Result<HistoryStore, CliError> {
    if !db.exists() {
        return Err(CliError::Usage(format!(
            "history store not found at {} (is the agent running with a different --db?)",
            db.display()
        )));
    }
    let store = HistoryStore::open(db)
        .await
        .with_context(|| format!("failed to open history store at {}", db.display()))?;
    Ok(store)
}

const EXECUTION_COLUMNS: &[(&str, usize)] = &[
    ("ID", 6),
    ("WORKFLOW", 24),
    ("TRIGGER", 10),
    ("STATUS", 10),
    ("STARTED", 26),
    ("DURATION", 10),
    ("ERROR", 40),
];

fn print_execution_table(rows: &[ExecutionRow]) {
    print_table_header(EXECUTION_COLUMNS);
    for row in rows {
        let id = row.id.to_string();
        let started = row.started_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
        let duration = row
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        let error = row.error.as_deref().unwrap_or("");
        print_table_row(&[
            (&id, 6),
            (&row.workflow_name, 24),
            (&row.trigger_type, 10),
            (&row.status, 10),
            (&started, 26),
            (&duration, 10),
            (error, 40),
        ]);
    }
}

pub async fn history(
    workflow: Option<&str>,
    limit: i64,
    db: &Path,
    format: OutputFormat,
) -> Result<(), CliError> {
    let store = open_store(db).await?;
    let rows = store
        .recent_executions(workflow, limit.clamp(1, 1000))
        .await
        .context("history query failed")?;
    store.close().await;

    if format.is_text() {
        if rows.is_empty() {
            println!("no executions recorded");
        } else {
            print_execution_table(&rows);
        }
    } else {
        format.print_value(&rows);
    }
    Ok(())
}

pub async fn stats(name: &str, days: i64, db: &Path, format: OutputFormat) -> Result<(), CliError> {
    let store = open_store(db).await?;
    let since = Utc::now() - ChronoDuration::days(days.clamp(1, 365));
    let stats = store.stats(name, since).await.context("stats query failed")?;
    store.close().await;

    if format.is_text() {
        print_field("workflow", &stats.workflow_name);
        print_field("window", &format!("last {days} day(s)"));
        print_field("executions", &stats.total.to_string());
        print_field("succeeded", &stats.succeeded.to_string());
        print_field("failed", &stats.failed.to_string());
        print_field(
            "success_rate",
            &format!("{:.1}%", stats.success_rate * 100.0),
        );
        if let Some(avg) = stats.avg_duration_ms {
            print_field("avg_duration", &format!("{avg:.0}ms"));
        }
        if let (Some(min), Some(max)) = (stats.min_duration_ms, stats.max_duration_ms) {
            print_field("min/max", &format!("{min}ms / {max}ms"));
        }
        if let Some(last) = stats.last_execution {
            print_field("last_execution", &last.to_rfc3339());
        }
    } else {
        format.print_value(&stats);
    }
    Ok(())
}

pub async fn failures(
    hours: i64,
    limit: i64,
    db: &Path,
    format: OutputFormat,
) -> Result<(), CliError> {
    let store = open_store(db).await?;
    let since = Utc::now() - ChronoDuration::hours(hours.clamp(1, 24 * 365));
    let rows = store
        .failed_since(since, limit.clamp(1, 1000))
        .await
        .context("failures query failed")?;
    store.close().await;

    if format.is_text() {
        if rows.is_empty() {
            println!("no failures in the last {hours} hour(s)");
        } else {
            print_execution_table(&rows);
        }
    } else {
        format.print_value(&rows);
    }
    Ok(())
}
