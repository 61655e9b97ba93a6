//! Shell command executor

use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use windlass_core::BashAction;

use super::{truncate_output, ActionError};

/// How much captured stdout+stderr survives into the history row.
const DEFAULT_MAX_OUTPUT: usize = 4096;

/// Runs one command through `sh -c`, capturing stdout and stderr.
///
/// Success iff the exit status is zero. The subprocess is killed when the
/// workflow's scope is cancelled mid-run.
#[derive(Debug, Clone)]
pub struct BashExecutor {
    max_output: usize,
}

impl Default for BashExecutor {
    fn default() -> Self {
        Self {
            max_output: DEFAULT_MAX_OUTPUT,
        }
    }
}

impl BashExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap on stored output, in bytes.
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    pub async fn execute(
        &self,
        action_name: &str,
        bash: &BashAction,
        cancel: &CancellationToken,
    ) -> Result<String, ActionError> {
        if bash.command.trim().is_empty() {
            return Err(ActionError::InvalidArgument {
                action: action_name.to_string(),
                reason: "empty command".to_string(),
            });
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&bash.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ActionError::Cancelled {
                    action: action_name.to_string(),
                });
            }
            result = command.output() => result.map_err(|source| ActionError::Spawn {
                action: action_name.to_string(),
                source,
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.is_empty() {
            stdout.into_owned()
        } else if stdout.is_empty() {
            stderr.into_owned()
        } else {
            format!("{stdout}\n{stderr}")
        };
        let captured = truncate_output(combined.trim_end(), self.max_output);

        if output.status.success() {
            tracing::debug!(action = action_name, "command succeeded");
            Ok(captured)
        } else {
            match output.status.code() {
                Some(code) => {
                    tracing::debug!(action = action_name, code, "command failed");
                    Err(ActionError::CommandFailed {
                        action: action_name.to_string(),
                        code,
                        output: captured,
                    })
                }
                None => Err(ActionError::CommandKilled {
                    action: action_name.to_string(),
                }),
            }
        }
    }
}
