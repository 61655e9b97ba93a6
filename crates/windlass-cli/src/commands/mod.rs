pub mod agent;
pub mod queries;
pub mod run;
pub mod validate;

use std::path::Path;

use windlass_core::{ActionKind, Trigger, Workflow};

use crate::output::print_field;

/// Wait for INT or TERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Human-readable execution plan for `--dry-run`.
pub fn print_plan(path: &Path, workflow: &Workflow) {
    println!("{}", path.display());
    print_field("workflow", &workflow.name);
    if let Some(description) = &workflow.description {
        print_field("description", description);
    }
    match &workflow.trigger {
        Trigger::Cron { schedule } => print_field("trigger", &format!("cron `{schedule}`")),
        Trigger::FileWatch { path, events } => print_field(
            "trigger",
            &format!(
                "filewatch {} on [{}]",
                path.display(),
                events
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ),
    }
    for (index, action) in workflow.actions.iter().enumerate() {
        let what = match &action.kind {
            ActionKind::Bash(bash) => format!("bash `{}`", bash.command),
            ActionKind::Http(http) => format!("http {} {}", http.method, http.url),
            ActionKind::Custom(custom) => {
                format!("custom {} (reserved, will skip)", custom.function_name)
            }
        };
        let retry = match &action.retry {
            Some(config) if config.max_attempts > 1 => {
                format!(" [retry x{}]", config.max_attempts)
            }
            _ => String::new(),
        };
        println!("  {}. {} - {}{}", index + 1, action.name, what, retry);
    }
}
