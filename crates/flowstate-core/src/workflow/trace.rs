//! Append-only execution trace.
//!
//! Every traced event is also emitted as a `tracing` event on the
//! `flowstate::trace` target so that log pipelines can follow executions
//! live.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use flowstate_types::error::ClassifiedError;
use flowstate_types::execution::{TraceEvent, TraceOutcome};
use serde_json::Value;
use uuid::Uuid;

/// Shared trace buffer for one execution. Clones append to the same trace.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    execution_id: Uuid,
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

/// Fields of an event before it gets its sequence number.
#[derive(Debug, Clone)]
pub struct TraceEntry<'a> {
    pub path: &'a str,
    pub state_name: &'a str,
    pub state_type: &'a str,
    pub attempt: u32,
    pub input: Value,
    pub started_at: DateTime<Utc>,
}

impl ExecutionTrace {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn record_output(&self, entry: TraceEntry<'_>, output: &Value) {
        self.append(entry, TraceOutcome::Output {
            output: output.clone(),
        });
    }

    pub fn record_error(&self, entry: TraceEntry<'_>, error: &ClassifiedError) {
        self.append(entry, TraceOutcome::Error {
            error: error.name.clone(),
            cause: error.cause.clone(),
        });
    }

    fn append(&self, entry: TraceEntry<'_>, outcome: TraceOutcome) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let event = TraceEvent {
            execution_id: self.execution_id,
            sequence: events.len() as u64,
            path: entry.path.to_string(),
            state_name: entry.state_name.to_string(),
            state_type: entry.state_type.to_string(),
            attempt: entry.attempt,
            input: entry.input,
            outcome,
            started_at: entry.started_at,
            finished_at: Utc::now(),
        };

        match &event.outcome {
            TraceOutcome::Output { .. } => tracing::debug!(
                target: "flowstate::trace",
                execution_id = %self.execution_id,
                sequence = event.sequence,
                path = %event.path,
                state = %event.state_name,
                state_type = %event.state_type,
                attempt = event.attempt,
                "state completed"
            ),
            TraceOutcome::Error { error, cause } => tracing::debug!(
                target: "flowstate::trace",
                execution_id = %self.execution_id,
                sequence = event.sequence,
                path = %event.path,
                state = %event.state_name,
                state_type = %event.state_type,
                attempt = event.attempt,
                error = %error,
                cause = %cause,
                "state failed"
            ),
        }

        events.push(event);
    }

    /// Copy of all events recorded so far, in append order.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry<'a>(state: &'a str) -> TraceEntry<'a> {
        TraceEntry {
            path: "",
            state_name: state,
            state_type: "Task",
            attempt: 1,
            input: json!({}),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_sequences_follow_append_order() {
        let trace = ExecutionTrace::new(Uuid::nil());
        let clone = trace.clone();
        trace.record_output(entry("A"), &json!(1));
        clone.record_error(entry("B"), &ClassifiedError::throttling("slow down"));

        let events = trace.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[0].state_name, "A");
        assert_eq!(events[1].sequence, 1);
        assert_eq!(
            events[1].outcome,
            TraceOutcome::Error {
                error: "ThrottlingError".into(),
                cause: "slow down".into()
            }
        );
    }
}
