//! Workflow definition model.
//!
//! Mirrors the state-machine documents the pipelines are written in: a
//! `StartAt` state name and a map of named states. Every state is one variant
//! of the closed [`StateNode`] sum type so that validation can be exhaustive.
//!
//! Expression-bearing fields (`Arguments`, `Output`, `Assign`, `Items`,
//! `Condition`) are kept as raw JSON templates here; the engine compiles them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorClass;

/// Name of a state, unique within one graph.
pub type StateName = String;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A graph of states with an entry point.
///
/// Used for the top-level workflow, each `Parallel` branch and each `Map`
/// item processor. State names are scoped to the graph they are declared in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub start_at: StateName,
    pub states: BTreeMap<StateName, StateNode>,
    /// Only `JSONata` is supported; kept so documents round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_language: Option<String>,
    /// Overall execution deadline. Only meaningful on the top-level graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl WorkflowDefinition {
    pub fn state(&self, name: &str) -> Option<&StateNode> {
        self.states.get(name)
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// One node of the graph, tagged by its `Type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum StateNode {
    Task(TaskState),
    Choice(ChoiceState),
    Pass(PassState),
    Parallel(ParallelState),
    Map(MapState),
    Fail(FailState),
    Succeed(SucceedState),
}

/// Where a non-terminal state goes after it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<'a> {
    Next(&'a str),
    End,
}

impl StateNode {
    /// The `Type` tag of this state.
    pub fn kind(&self) -> &'static str {
        match self {
            StateNode::Task(_) => "Task",
            StateNode::Choice(_) => "Choice",
            StateNode::Pass(_) => "Pass",
            StateNode::Parallel(_) => "Parallel",
            StateNode::Map(_) => "Map",
            StateNode::Fail(_) => "Fail",
            StateNode::Succeed(_) => "Succeed",
        }
    }

    /// The `Next`/`End` pair for states that carry one.
    ///
    /// Choice, Fail and Succeed return `None`.
    pub fn next_end(&self) -> Option<(Option<&str>, bool)> {
        match self {
            StateNode::Task(s) => Some((s.next.as_deref(), s.end)),
            StateNode::Pass(s) => Some((s.next.as_deref(), s.end)),
            StateNode::Parallel(s) => Some((s.next.as_deref(), s.end)),
            StateNode::Map(s) => Some((s.next.as_deref(), s.end)),
            StateNode::Choice(_) | StateNode::Fail(_) | StateNode::Succeed(_) => None,
        }
    }

    /// Resolve the transition of a validated non-terminal state.
    ///
    /// `End` wins when both are set; validation rejects that combination.
    pub fn transition(&self) -> Option<Transition<'_>> {
        let (next, end) = self.next_end()?;
        if end {
            return Some(Transition::End);
        }
        next.map(Transition::Next)
    }

    /// Catch rules of states that support them.
    pub fn catchers(&self) -> &[CatchRule] {
        match self {
            StateNode::Task(s) => &s.catch,
            StateNode::Parallel(s) => &s.catch,
            StateNode::Map(s) => &s.catch,
            _ => &[],
        }
    }

    /// Every state name this state can transition to, in declaration order.
    pub fn successors(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some((Some(next), _)) = self.next_end() {
            out.push(next);
        }
        if let StateNode::Choice(choice) = self {
            out.extend(choice.choices.iter().map(|c| c.next.as_str()));
            if let Some(default) = &choice.default {
                out.push(default.as_str());
            }
        }
        out.extend(self.catchers().iter().map(|c| c.next.as_str()));
        out
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateNode::Fail(_) | StateNode::Succeed(_))
    }
}

/// Invoke an external compute unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Registry name of the task to invoke.
    pub resource: String,
    /// Payload template; defaults to the state input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Output template; defaults to the invocation result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
    /// Per-invocation timeout handed to the task client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StateName>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

/// Branch on conditions evaluated in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub choices: Vec<ChoiceRule>,
    /// Required; validation rejects a Choice without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<StateName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRule {
    /// `{% expr %}` evaluated for truthiness.
    pub condition: String,
    pub next: StateName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
}

/// Reshape data without calling anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StateName>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

/// Run every branch concurrently and join their outputs in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParallelState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub branches: Vec<WorkflowDefinition>,
    /// Input handed to every branch; defaults to the state input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StateName>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

/// Run the item processor once per item with bounded concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Inline array (elements may be templates) or a `{% expr %}` yielding an array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Pull items from an external items source instead of `Items`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_reader: Option<ItemReader>,
    /// 0 or absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    pub item_processor: ItemProcessor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<StateName>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemReader {
    /// Items source name (e.g. `directory`).
    pub resource: String,
    /// Query template, e.g. `{"Prefix": "{% $states.input.folder %}"}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemProcessor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_config: Option<ProcessorConfig>,
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessorConfig {
    /// Only `INLINE` is executed by this engine.
    #[serde(default = "default_processor_mode")]
    pub mode: String,
}

fn default_processor_mode() -> String {
    "INLINE".to_string()
}

/// Terminate the graph as failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FailState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Terminate the graph successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SucceedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

// ---------------------------------------------------------------------------
// Retry / Catch
// ---------------------------------------------------------------------------

/// Retry configuration for one family of errors on one Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    pub error_equals: Vec<ErrorClass>,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    /// Total invocation attempts under this policy, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
    /// Upper bound for a single computed delay, before jitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<f64>,
}

fn default_interval_seconds() -> f64 {
    1.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_rate() -> f64 {
    2.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JitterStrategy {
    #[default]
    None,
    Full,
}

/// Fallback transition for an unrecovered error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CatchRule {
    pub error_equals: Vec<ErrorClass>,
    pub next: StateName,
    /// Transform producing the value handed to `next`; defaults to the error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign: Option<Map<String, Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLISH: &str = r#"{
        "StartAt": "otp verify",
        "QueryLanguage": "JSONata",
        "States": {
            "otp verify": {
                "Type": "Task",
                "Resource": "otp-verify",
                "Output": "{% $states.input %}",
                "Retry": [{
                    "ErrorEquals": ["Lambda.TooManyRequestsException"],
                    "IntervalSeconds": 1,
                    "MaxAttempts": 3,
                    "BackoffRate": 2,
                    "JitterStrategy": "FULL"
                }],
                "Next": "ValidOtpCheck"
            },
            "ValidOtpCheck": {
                "Type": "Choice",
                "Choices": [{"Next": "Map", "Condition": "{% $states.input.valid = true %}"}],
                "Default": "Invalid OTP"
            },
            "Invalid OTP": {"Type": "Fail", "Error": "Invalid OTP", "Cause": "bad pair"},
            "Map": {
                "Type": "Map",
                "Items": [{"suffix": "square"}],
                "MaxConcurrency": 2,
                "ItemProcessor": {
                    "ProcessorConfig": {"Mode": "INLINE"},
                    "StartAt": "Publish",
                    "States": {"Publish": {"Type": "Task", "Resource": "publish", "End": true}}
                },
                "End": true
            }
        }
    }"#;

    #[test]
    fn parses_state_machine_document() {
        let def: WorkflowDefinition = serde_json::from_str(PUBLISH).unwrap();
        assert_eq!(def.start_at, "otp verify");
        assert_eq!(def.states.len(), 4);
        assert_eq!(def.query_language.as_deref(), Some("JSONata"));

        let StateNode::Task(task) = def.state("otp verify").unwrap() else {
            panic!("expected task");
        };
        assert_eq!(task.resource, "otp-verify");
        assert_eq!(task.retry[0].error_equals, vec![ErrorClass::Throttling]);
        assert_eq!(task.retry[0].jitter_strategy, JitterStrategy::Full);

        let StateNode::Map(map) = def.state("Map").unwrap() else {
            panic!("expected map");
        };
        assert_eq!(map.max_concurrency, Some(2));
        assert_eq!(map.item_processor.definition.start_at, "Publish");
        assert_eq!(
            map.item_processor.processor_config.as_ref().unwrap().mode,
            "INLINE"
        );
    }

    #[test]
    fn retry_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"ErrorEquals": ["States.ALL"]}"#).unwrap();
        assert_eq!(policy.interval_seconds, 1.0);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_rate, 2.0);
        assert_eq!(policy.jitter_strategy, JitterStrategy::None);
        assert!(policy.max_delay_seconds.is_none());
    }

    #[test]
    fn successors_in_declaration_order() {
        let def: WorkflowDefinition = serde_json::from_str(PUBLISH).unwrap();
        let choice = def.state("ValidOtpCheck").unwrap();
        assert_eq!(choice.successors(), vec!["Map", "Invalid OTP"]);
        assert!(choice.transition().is_none());

        let task = def.state("otp verify").unwrap();
        assert_eq!(task.transition(), Some(Transition::Next("ValidOtpCheck")));
        assert!(def.state("Invalid OTP").unwrap().is_terminal());
    }

    #[test]
    fn yaml_documents_parse() {
        let yaml = r#"
StartAt: Hello
States:
  Hello:
    Type: Pass
    Output:
      greeting: hi
    End: true
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.state("Hello").unwrap().kind(), "Pass");
    }
}
