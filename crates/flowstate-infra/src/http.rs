//! HTTP task invocation.
//!
//! [`HttpTaskInvoker`] POSTs the task payload as JSON to an endpoint and
//! classifies the response into a result or a [`ClassifiedError`]:
//!
//! - 2xx with a JSON (or empty) body: the result.
//! - 429: `ThrottlingError`.
//! - 5xx: `TransientServiceError`.
//! - other 4xx: `InvalidInput`.
//! - request timeout: `States.Timeout`.
//!
//! A body carrying a Lambda-style `errorType` overrides the status mapping.

use std::time::Duration;

use flowstate_core::repository::ParameterStore;
use flowstate_core::workflow::{BoxTaskInvoker, Invocation, TaskInvoker, TaskRegistry};
use flowstate_types::config::EngineConfig;
use flowstate_types::error::ClassifiedError;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Longest response body excerpt kept in an error cause.
const MAX_CAUSE_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    /// The endpoint reported a failure in its body.
    #[error("{error_type}: {message}")]
    Remote { error_type: String, message: String },
}

impl From<reqwest::Error> for InvokerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            InvokerError::Timeout(error.to_string())
        } else {
            InvokerError::Transport(error.to_string())
        }
    }
}

impl From<InvokerError> for ClassifiedError {
    fn from(error: InvokerError) -> Self {
        match error {
            InvokerError::Timeout(cause) => ClassifiedError::timeout(cause),
            // Connection resets and refused connections are worth retrying.
            InvokerError::Transport(cause) => ClassifiedError::transient(cause),
            InvokerError::Status { status, body } => {
                let cause = format!("HTTP {status}: {body}");
                match status {
                    429 => ClassifiedError::throttling(cause),
                    500..=599 => ClassifiedError::transient(cause),
                    400..=499 => ClassifiedError::invalid_input(cause),
                    _ => ClassifiedError::unknown(cause),
                }
            }
            InvokerError::Decode(cause) => ClassifiedError::unknown(cause),
            InvokerError::Remote {
                error_type,
                message,
            } => ClassifiedError::named(error_type, message),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpTaskInvoker
// ---------------------------------------------------------------------------

/// A task backed by one HTTP endpoint.
///
/// The bearer token, if any, is only exposed when building the request.
pub struct HttpTaskInvoker {
    client: reqwest::Client,
    url: String,
    bearer: Option<SecretString>,
}

impl HttpTaskInvoker {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: SecretString) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, invocation: &Invocation) -> Result<Value, InvokerError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(invocation.timeout)
            .json(&invocation.payload);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        classify_response(status.as_u16(), &body)
    }
}

impl std::fmt::Debug for HttpTaskInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTaskInvoker")
            .field("url", &self.url)
            .field("bearer", &self.bearer.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl TaskInvoker for HttpTaskInvoker {
    async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
        tracing::debug!(resource = %invocation.resource, url = %self.url, "invoking HTTP task");
        self.call(invocation).await.map_err(|e| {
            tracing::debug!(resource = %invocation.resource, error = %e, "HTTP task failed");
            ClassifiedError::from(e)
        })
    }
}

/// Turn a status code and body into a result.
pub fn classify_response(status: u16, body: &str) -> Result<Value, InvokerError> {
    let parsed = if body.trim().is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_str::<Value>(body).ok()
    };

    if let Some(remote) = parsed.as_ref().and_then(remote_error) {
        return Err(remote);
    }
    if (200..300).contains(&status) {
        return parsed.ok_or_else(|| InvokerError::Decode(excerpt(body)));
    }
    Err(InvokerError::Status {
        status,
        body: excerpt(body),
    })
}

/// `{"errorType": "...", "errorMessage": "..."}` as returned by Lambda-style
/// handlers.
fn remote_error(body: &Value) -> Option<InvokerError> {
    let error_type = body.get("errorType")?.as_str()?;
    let message = body
        .get("errorMessage")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(InvokerError::Remote {
        error_type: error_type.to_string(),
        message: message.to_string(),
    })
}

fn excerpt(body: &str) -> String {
    if body.len() <= MAX_CAUSE_LEN {
        return body.to_string();
    }
    let mut end = MAX_CAUSE_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

// ---------------------------------------------------------------------------
// Registry construction
// ---------------------------------------------------------------------------

/// Build a [`TaskRegistry`] from the `[tasks.<name>]` config tables.
///
/// Bearer secrets are resolved through `params` once, at startup.
pub async fn build_task_registry(
    config: &EngineConfig,
    params: &impl ParameterStore,
) -> Result<TaskRegistry, ConfigError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))?;

    let mut registry = TaskRegistry::new();
    for (name, endpoint) in &config.tasks {
        let mut invoker = HttpTaskInvoker::new(client.clone(), endpoint.url.clone());
        if let Some(parameter) = &endpoint.bearer_secret {
            let token = params
                .get(parameter)
                .await
                .map_err(|e| ConfigError::Parameter(e.to_string()))?
                .ok_or_else(|| ConfigError::MissingParameter {
                    task: name.clone(),
                    parameter: parameter.clone(),
                })?;
            invoker = invoker.with_bearer(token);
        }
        tracing::debug!(task = %name, url = %endpoint.url, "registered HTTP task");
        registry.register(name.clone(), EndpointTimeout::wrap(invoker, endpoint.timeout_secs));
    }
    Ok(registry)
}

/// Applies a per-endpoint timeout that overrides the state's.
struct EndpointTimeout {
    inner: HttpTaskInvoker,
    timeout: Option<Duration>,
}

impl EndpointTimeout {
    fn wrap(inner: HttpTaskInvoker, timeout_secs: Option<u64>) -> BoxTaskInvoker {
        BoxTaskInvoker::new(Self {
            inner,
            timeout: timeout_secs.map(Duration::from_secs),
        })
    }
}

impl TaskInvoker for EndpointTimeout {
    async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
        match self.timeout {
            Some(timeout) if timeout < invocation.timeout => {
                let narrowed = Invocation {
                    timeout,
                    ..invocation.clone()
                };
                self.inner.invoke(&narrowed).await
            }
            _ => self.inner.invoke(invocation).await,
        }
    }
}
