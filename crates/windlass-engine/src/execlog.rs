//! Per-workflow execution log files
//!
//! When the agent runs with `--log-dir`, each workflow gets an append-only
//! `<name>.log` with one line per execution and per action outcome. The
//! shared tracing sink stays authoritative; these files exist so operators
//! can tail a single workflow.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct ExecutionLog {
    dir: PathBuf,
}

impl ExecutionLog {
    /// Create the destination directory if needed.
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Append one line to the workflow's file. Failures degrade to a
    /// warning; execution is never blocked on the log.
    pub async fn append(&self, workflow: &str, line: &str) {
        let path = self.dir.join(format!("{}.log", sanitize(workflow)));
        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(
                format!("{} {}\n", chrono::Utc::now().to_rfc3339(), line).as_bytes(),
            )
            .await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(workflow, path = %path.display(), "execution log write failed: {e}");
        }
    }
}

/// Workflow names come from documents; keep the file name boring.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
