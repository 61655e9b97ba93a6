//! Action executors
//!
//! One executor per action kind. Executors return the captured output on
//! success; on failure the error's `Display` text is what the retry
//! predicates classify, so the wording of each variant is part of the
//! contract (`timeout`, `network`, `status code <N>`, `exit code <N>`).

mod bash;
mod http;

pub use bash::BashExecutor;
pub use http::{HttpExecutor, DEFAULT_HTTP_TIMEOUT, HTTP_BODY_SNIPPET_LIMIT};

use std::time::Duration;

/// Failure of a single action attempt.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// Precondition violation; never retried usefully
    #[error("action `{action}`: invalid argument: {reason}")]
    InvalidArgument { action: String, reason: String },

    /// The shell itself could not be started
    #[error("action `{action}`: failed to spawn shell: {source}")]
    Spawn {
        action: String,
        #[source]
        source: std::io::Error,
    },

    /// Subprocess ran and exited non-zero
    #[error("action `{action}`: command failed with exit code {code}")]
    CommandFailed {
        action: String,
        code: i32,
        /// Captured, truncated stdout+stderr; not part of the Display text
        output: String,
    },

    /// Subprocess was terminated by a signal, no exit code
    #[error("action `{action}`: command terminated by signal")]
    CommandKilled { action: String },

    /// Request deadline elapsed before the response body finished
    #[error("action `{action}`: http request timeout after {timeout:?}")]
    HttpTimeout { action: String, timeout: Duration },

    /// Connection, DNS or transport failure
    #[error("action `{action}`: network error sending request: {reason}")]
    HttpNetwork { action: String, reason: String },

    /// Response arrived with a status outside `expect_status`
    #[error("action `{action}`: unexpected status code {status} (expected {expected})")]
    HttpStatus {
        action: String,
        status: u16,
        expected: String,
    },

    /// Response body does not contain `expect_body_contains`
    #[error("action `{action}`: response body does not contain `{needle}`")]
    HttpBodyMismatch { action: String, needle: String },

    /// The workflow's scope was cancelled mid-attempt
    #[error("action `{action}`: cancelled")]
    Cancelled { action: String },
}

impl ActionError {
    /// Cancellation is an outcome, not a failure; it is never retried and
    /// never counted for alerting.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Clip captured output to `limit` bytes on a char boundary, appending a
/// marker when anything was dropped.
pub fn truncate_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_output("hello", 100), "hello");
    }

    #[test]
    fn test_truncate_clips_and_marks() {
        let out = truncate_output(&"x".repeat(300), 200);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(100); // two bytes each
        let out = truncate_output(&text, 3);
        assert!(out.starts_with('é'));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn test_error_text_is_classifiable() {
        let timeout = ActionError::HttpTimeout {
            action: "ping".into(),
            timeout: Duration::from_secs(5),
        };
        assert!(timeout.to_string().contains("timeout"));

        let status = ActionError::HttpStatus {
            action: "ping".into(),
            status: 503,
            expected: "200".into(),
        };
        assert!(status.to_string().contains("status code 503"));

        let network = ActionError::HttpNetwork {
            action: "ping".into(),
            reason: "refused".into(),
        };
        assert!(network.to_string().contains("network"));

        let exit = ActionError::CommandFailed {
            action: "job".into(),
            code: 2,
            output: String::new(),
        };
        assert!(exit.to_string().contains("exit code 2"));
    }
}
