//! HTTP request executor

use std::time::Duration;

use reqwest::Method;
use tokio_util::sync::CancellationToken;
use windlass_core::HttpAction;

use super::{truncate_output, ActionError};

/// Bound on the request when the document does not set one. There is no
/// unbounded wait.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Response bodies are clipped to this many bytes for log and history.
pub const HTTP_BODY_SNIPPET_LIMIT: usize = 200;

/// Sends one request and validates the response.
///
/// Validation order: `expect_status`, then `expect_body_contains`; success
/// is the conjunction. The timeout is a deadline on the request itself,
/// covering connect through body read.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn execute(
        &self,
        action_name: &str,
        http: &HttpAction,
        cancel: &CancellationToken,
    ) -> Result<String, ActionError> {
        if http.url.trim().is_empty() || http.method.trim().is_empty() {
            return Err(ActionError::InvalidArgument {
                action: action_name.to_string(),
                reason: "url and method are required".to_string(),
            });
        }

        let method = Method::from_bytes(http.method.to_uppercase().as_bytes()).map_err(|_| {
            ActionError::InvalidArgument {
                action: action_name.to_string(),
                reason: format!("invalid method `{}`", http.method),
            }
        })?;

        let timeout = http.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let mut request = self.client.request(method, &http.url).timeout(timeout);
        for (name, value) in &http.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &http.body {
            request = request.body(body.clone());
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ActionError::Cancelled {
                    action: action_name.to_string(),
                });
            }
            result = request.send() => {
                result.map_err(|e| self.classify(action_name, timeout, e))?
            }
        };

        let status = response.status().as_u16();

        // Read the whole body before validating anything; the request
        // deadline still applies here.
        let body = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ActionError::Cancelled {
                    action: action_name.to_string(),
                });
            }
            result = response.text() => {
                result.map_err(|e| self.classify(action_name, timeout, e))?
            }
        };

        if let Some(expect) = &http.expect_status {
            if !expect.matches(status) {
                return Err(ActionError::HttpStatus {
                    action: action_name.to_string(),
                    status,
                    expected: expect.describe(),
                });
            }
        }

        if let Some(needle) = &http.expect_body_contains {
            if !body.contains(needle.as_str()) {
                return Err(ActionError::HttpBodyMismatch {
                    action: action_name.to_string(),
                    needle: needle.clone(),
                });
            }
        }

        tracing::debug!(action = action_name, status, "http request succeeded");
        Ok(truncate_output(&body, HTTP_BODY_SNIPPET_LIMIT))
    }

    fn classify(&self, action_name: &str, timeout: Duration, error: reqwest::Error) -> ActionError {
        if error.is_timeout() {
            ActionError::HttpTimeout {
                action: action_name.to_string(),
                timeout,
            }
        } else if error.is_builder() {
            ActionError::InvalidArgument {
                action: action_name.to_string(),
                reason: error.to_string(),
            }
        } else {
            ActionError::HttpNetwork {
                action: action_name.to_string(),
                reason: error.to_string(),
            }
        }
    }
}
