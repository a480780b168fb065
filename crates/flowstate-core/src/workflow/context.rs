//! Per-graph execution context.
//!
//! Each running graph (the top-level workflow, a Parallel branch, a Map item)
//! owns one `ExecutionContext`. Children are created with
//! [`ExecutionContext::fork_branch`] / [`ExecutionContext::fork_item`], which
//! copy the variable scope so nothing a child does is visible upward.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::expression::Bindings;
use super::scope::VariableScope;

/// Map item a context is processing.
#[derive(Debug, Clone, PartialEq)]
pub struct MapItem {
    pub index: usize,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub execution_started: DateTime<Utc>,
    /// Location of this graph, e.g. `Map[1]/Parallel[0]`; empty at top level.
    pub path: String,
    /// Parallel/Map nesting depth; 0 at top level.
    pub depth: u32,
    /// Input of the state about to run.
    pub input: Value,
    pub scope: VariableScope,
    pub map_item: Option<MapItem>,
}

impl ExecutionContext {
    pub fn root(execution_id: Uuid, execution_started: DateTime<Utc>, input: Value) -> Self {
        Self {
            execution_id,
            execution_started,
            path: String::new(),
            depth: 0,
            input,
            scope: VariableScope::new(),
            map_item: None,
        }
    }

    /// Context for branch `index` of Parallel state `state_name`.
    pub fn fork_branch(&self, state_name: &str, index: usize, input: Value) -> Self {
        Self {
            execution_id: self.execution_id,
            execution_started: self.execution_started,
            path: self.child_path(state_name, index),
            depth: self.depth + 1,
            input,
            scope: self.scope.fork(),
            map_item: None,
        }
    }

    /// Context for item `index` of Map state `state_name`.
    pub fn fork_item(&self, state_name: &str, index: usize, item: Value) -> Self {
        Self {
            execution_id: self.execution_id,
            execution_started: self.execution_started,
            path: self.child_path(state_name, index),
            depth: self.depth + 1,
            input: item.clone(),
            scope: self.scope.fork(),
            map_item: Some(MapItem { index, value: item }),
        }
    }

    fn child_path(&self, state_name: &str, index: usize) -> String {
        if self.path.is_empty() {
            format!("{state_name}[{index}]")
        } else {
            format!("{}/{state_name}[{index}]", self.path)
        }
    }

    /// The `$states.context` object for `state_name`.
    pub fn context_object(&self, state_name: &str, retry_count: u32) -> Value {
        let mut context = json!({
            "Execution": {
                "Id": self.execution_id.to_string(),
                "StartTime": self.execution_started.to_rfc3339(),
            },
            "State": {
                "Name": state_name,
                "RetryCount": retry_count,
            },
        });
        if let Some(item) = &self.map_item {
            context["Map"] = json!({
                "Item": {"Index": item.index, "Value": item.value},
            });
        }
        context
    }

    /// The `$states` object seen by expressions of `state_name`.
    pub fn states_object(&self, state_name: &str) -> StatesObject {
        StatesObject(json!({
            "input": self.input,
            "context": self.context_object(state_name, 0),
        }))
    }

    pub fn bindings<'a>(&'a self, states: &'a StatesObject) -> Bindings<'a> {
        Bindings {
            context: &self.input,
            states: &states.0,
            variables: &self.scope,
        }
    }
}

/// `$states` value under construction for one state.
#[derive(Debug, Clone)]
pub struct StatesObject(Value);

impl StatesObject {
    pub fn with_result(mut self, result: Value) -> Self {
        self.0["result"] = result;
        self
    }

    pub fn with_error_output(mut self, error: Value) -> Self {
        self.0["errorOutput"] = error;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.0["context"]["State"]["RetryCount"] = json!(retry_count);
        self
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}
