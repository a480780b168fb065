//! Workflow engine core: definition loading, expression evaluation and
//! graph execution.
//!
//! - `definition` -- JSON/YAML parsing, load-time validation, discovery
//! - `compiled` -- templates and conditions compiled once per definition
//! - `graph` -- transition graph and reachability
//! - `expression` / `template` -- JSONata-subset evaluator and `{% %}` templates
//! - `scope` / `context` -- variable scope and per-graph execution context
//! - `invoker` / `items` -- task invocation and items-source ports
//! - `retry` -- retry policy engine with backoff and jitter
//! - `interpreter` / `state_runner` / `coordinator` -- the state machine
//! - `trace` -- append-only execution trace
//! - `engine` -- public entry points and execution registry

mod coordinator;
mod state_runner;

pub mod compiled;
pub mod context;
pub mod definition;
pub mod engine;
pub mod expression;
pub mod graph;
pub mod interpreter;
pub mod invoker;
pub mod items;
pub mod retry;
pub mod scope;
pub mod template;
pub mod trace;

pub use definition::{discover_workflows, DefinitionError, Workflow};
pub use engine::{EngineError, StartedExecution, WorkflowEngine};
pub use invoker::{BoxTaskInvoker, FnTask, Invocation, TaskInvoker, TaskRegistry};
pub use items::{ItemStream, ItemsSource, ItemsSourceRegistry, StaticItems};
