//! Execution records and trace events.
//!
//! `ExecutionRecord` is what callers of the async entry point retrieve later;
//! `TraceEvent` is one entry of the append-only execution trace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "timed_out" => Ok(ExecutionStatus::TimedOut),
            "aborted" => Ok(ExecutionStatus::Aborted),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Structured failure surfaced to callers: `{ "error", "cause" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl Failure {
    pub fn new(error: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            error: error.into(),
            cause,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.error, cause),
            None => f.write_str(&self.error),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// One run of a workflow, as stored by the execution repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh record in the `Running` state.
    pub fn running(id: Uuid, workflow_name: impl Into<String>, input: Value) -> Self {
        Self {
            id,
            workflow_name: workflow_name.into(),
            status: ExecutionStatus::Running,
            input,
            output: None,
            failure: None,
            started_at: Utc::now(),
            stopped_at: None,
        }
    }

    /// Terminal output or structured failure.
    ///
    /// A record that is still running yields a failure describing that.
    pub fn into_result(self) -> Result<Value, Failure> {
        match self.status {
            ExecutionStatus::Succeeded => Ok(self.output.unwrap_or(Value::Null)),
            ExecutionStatus::Running => Err(Failure::new(
                "ExecutionRunning",
                Some(format!("execution {} has not finished", self.id)),
            )),
            _ => Err(self
                .failure
                .unwrap_or_else(|| Failure::new(self.status.as_str(), None))),
        }
    }
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// What a traced state (or Task attempt) produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceOutcome {
    Output { output: Value },
    Error { error: String, cause: String },
}

/// One entry of the append-only execution trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub execution_id: Uuid,
    /// Position in the trace, assigned on append.
    pub sequence: u64,
    /// Location of the graph the state belongs to, e.g. `Map[1]/Parallel[0]`.
    /// Empty for the top-level graph.
    pub path: String,
    pub state_name: String,
    pub state_type: String,
    /// 1-based invocation attempt for Task states, 1 for everything else.
    pub attempt: u32,
    pub input: Value,
    pub outcome: TraceOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
