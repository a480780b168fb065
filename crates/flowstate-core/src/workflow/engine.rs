//! Workflow engine: the public entry points for running workflows.
//!
//! `start_execution` records a `Running` execution and drives it on a
//! background task; `start_sync_execution` drives it inline and returns the
//! terminal output or a structured failure. Either way the terminal outcome
//! and the execution trace end up in the [`ExecutionRepository`].
//!
//! # Execution flow
//!
//! 1. Optionally inject a job identifier into the input.
//! 2. Create a `Running` record and register a cancellation token.
//! 3. Walk the graph under the execution deadline.
//! 4. Map the outcome to a terminal status, persist the trace and the record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowstate_types::config::EngineConfig;
use flowstate_types::error::RepositoryError;
use flowstate_types::execution::{ExecutionRecord, ExecutionStatus, Failure, TraceEvent};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::repository::ExecutionRepository;

use super::context::ExecutionContext;
use super::definition::Workflow;
use super::interpreter::{ExecutionError, GraphOutcome, Interpreter, Services};
use super::invoker::BoxTaskInvoker;
use super::items::ItemsSourceRegistry;
use super::trace::ExecutionTrace;

/// Failure name reported when the execution deadline passes.
pub const EXECUTION_TIMEOUT_ERROR: &str = "ExecutionTimeout";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("execution not found: {0}")]
    NotFound(Uuid),

    /// The execution exists but has already reached a terminal status.
    #[error("execution is not running: {0}")]
    NotRunning(Uuid),
}

/// Identifiers handed back by [`WorkflowEngine::start_execution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedExecution {
    pub execution_id: Uuid,
    /// Set when job-id injection is enabled and the input was an object.
    pub job_id: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs validated workflows against a task invoker and items sources.
///
/// Generic over `R: ExecutionRepository` for storage flexibility. Cheap to
/// clone; clones share running executions.
pub struct WorkflowEngine<R: ExecutionRepository> {
    inner: Arc<EngineInner<R>>,
}

struct EngineInner<R> {
    services: Arc<Services>,
    repository: R,
    /// Cancellation tokens keyed by execution id.
    running: DashMap<Uuid, CancellationToken>,
}

impl<R: ExecutionRepository> Clone for WorkflowEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ExecutionRepository> WorkflowEngine<R> {
    pub fn new(
        config: EngineConfig,
        invoker: BoxTaskInvoker,
        items: ItemsSourceRegistry,
        repository: R,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services: Arc::new(Services {
                    config,
                    invoker,
                    items,
                }),
                repository,
                running: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.services.config
    }

    pub fn repository(&self) -> &R {
        &self.inner.repository
    }

    /// Start an execution in the background and return its identifiers.
    pub async fn start_execution(
        &self,
        workflow: &Workflow,
        input: Value,
    ) -> Result<StartedExecution, EngineError> {
        let (record, job_id, cancel) = self.begin(workflow, input).await?;
        let started = StartedExecution {
            execution_id: record.id,
            job_id,
        };

        let engine = self.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.drive(&workflow, record, cancel).await {
                tracing::error!(error = %e, "failed to record execution outcome");
            }
        });
        Ok(started)
    }

    /// Run an execution to completion and return its terminal record.
    pub async fn run_execution(
        &self,
        workflow: &Workflow,
        input: Value,
    ) -> Result<ExecutionRecord, EngineError> {
        let (record, _, cancel) = self.begin(workflow, input).await?;
        self.drive(workflow, record, cancel).await
    }

    /// Run an execution to completion and return its output or failure.
    ///
    /// Persistence problems are reported as an `InternalError` failure.
    pub async fn start_sync_execution(
        &self,
        workflow: &Workflow,
        input: Value,
    ) -> Result<Value, Failure> {
        match self.run_execution(workflow, input).await {
            Ok(record) => record.into_result(),
            Err(e) => Err(Failure::new("InternalError", Some(e.to_string()))),
        }
    }

    pub async fn describe_execution(&self, id: &Uuid) -> Result<ExecutionRecord, EngineError> {
        self.inner
            .repository
            .get_execution(id)
            .await?
            .ok_or(EngineError::NotFound(*id))
    }

    pub async fn get_execution_trace(&self, id: &Uuid) -> Result<Vec<TraceEvent>, EngineError> {
        self.describe_execution(id).await?;
        Ok(self.inner.repository.get_trace(id).await?)
    }

    pub async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.inner.repository.list_executions(limit).await?)
    }

    /// Cancel a running execution. It finishes as `Aborted` once in-flight
    /// states notice the cancellation.
    pub async fn stop_execution(&self, id: &Uuid) -> Result<(), EngineError> {
        let token = self.inner.running.get(id).map(|t| t.clone());
        if let Some(token) = token {
            tracing::info!(execution_id = %id, "stopping execution");
            token.cancel();
            return Ok(());
        }
        match self.inner.repository.get_execution(id).await? {
            Some(_) => Err(EngineError::NotRunning(*id)),
            None => Err(EngineError::NotFound(*id)),
        }
    }

    /// Number of executions currently being driven by this engine.
    pub fn running_count(&self) -> usize {
        self.inner.running.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn begin(
        &self,
        workflow: &Workflow,
        mut input: Value,
    ) -> Result<(ExecutionRecord, Option<String>, CancellationToken), EngineError> {
        let job_id = self.inject_job_id(&mut input);
        let record = ExecutionRecord::running(Uuid::now_v7(), workflow.name(), input);
        self.inner.repository.create_execution(&record).await?;

        let cancel = CancellationToken::new();
        self.inner.running.insert(record.id, cancel.clone());
        tracing::info!(
            execution_id = %record.id,
            workflow = workflow.name(),
            job_id = job_id.as_deref().unwrap_or(""),
            "execution started"
        );
        Ok((record, job_id, cancel))
    }

    fn inject_job_id(&self, input: &mut Value) -> Option<String> {
        let settings = &self.config().job_id;
        if !settings.inject {
            return None;
        }
        let Value::Object(fields) = input else {
            return None;
        };
        let job_id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(settings.length)
            .map(char::from)
            .collect();
        fields.insert(settings.key.clone(), Value::String(job_id.clone()));
        Some(job_id)
    }

    async fn drive(
        &self,
        workflow: &Workflow,
        mut record: ExecutionRecord,
        cancel: CancellationToken,
    ) -> Result<ExecutionRecord, EngineError> {
        let span = tracing::info_span!(
            "execution",
            execution_id = %record.id,
            workflow = workflow.name()
        );
        let (status, output, failure, events) = self
            .walk(workflow, &record, cancel)
            .instrument(span)
            .await;

        // A lost trace must not leave the record stuck in `Running`.
        let repository = &self.inner.repository;
        if let Err(e) = repository.append_trace(&events).await {
            tracing::error!(execution_id = %record.id, error = %e, "failed to persist execution trace");
        }
        let finished = repository
            .finish_execution(&record.id, status, output.as_ref(), failure.as_ref())
            .await;
        self.inner.running.remove(&record.id);
        finished?;

        match &failure {
            Some(failure) => tracing::info!(
                execution_id = %record.id,
                status = %status,
                error = %failure,
                "execution finished"
            ),
            None => tracing::info!(execution_id = %record.id, status = %status, "execution finished"),
        }

        record.status = status;
        record.output = output;
        record.failure = failure;
        record.stopped_at = Some(Utc::now());
        Ok(record)
    }

    async fn walk(
        &self,
        workflow: &Workflow,
        record: &ExecutionRecord,
        cancel: CancellationToken,
    ) -> (ExecutionStatus, Option<Value>, Option<Failure>, Vec<TraceEvent>) {
        let trace = ExecutionTrace::new(record.id);
        let interpreter = Interpreter::new(
            Arc::clone(&self.inner.services),
            trace.clone(),
            cancel.clone(),
        );
        let ctx = ExecutionContext::root(record.id, record.started_at, record.input.clone());

        let deadline_secs = workflow
            .definition()
            .timeout_seconds
            .unwrap_or(self.config().execution_timeout_secs);
        let run = interpreter.run_graph(Arc::clone(workflow.graph()), ctx);

        let (status, output, failure) =
            match tokio::time::timeout(Duration::from_secs(deadline_secs), run).await {
                Ok(Ok(GraphOutcome::Succeeded(output))) => {
                    (ExecutionStatus::Succeeded, Some(output), None)
                }
                Ok(Ok(GraphOutcome::Failed(error))) => (
                    ExecutionStatus::Failed,
                    None,
                    Some(Failure::new(error.name, Some(error.cause))),
                ),
                Ok(Err(ExecutionError::Aborted)) => (
                    ExecutionStatus::Aborted,
                    None,
                    Some(Failure::new(
                        ExecutionError::Aborted.error_name(),
                        Some("execution was stopped".to_string()),
                    )),
                ),
                Ok(Err(error)) => {
                    tracing::warn!(error = %error, "execution failed with a fatal error");
                    (
                        ExecutionStatus::Failed,
                        None,
                        Some(Failure::new(error.error_name(), Some(error.to_string()))),
                    )
                }
                Err(_) => {
                    cancel.cancel();
                    tracing::warn!(deadline_secs, "execution deadline exceeded");
                    (
                        ExecutionStatus::TimedOut,
                        None,
                        Some(Failure::new(
                            EXECUTION_TIMEOUT_ERROR,
                            Some(format!("execution exceeded {deadline_secs} seconds")),
                        )),
                    )
                }
            };
        (status, output, failure, trace.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryExecutionRepository;
    use crate::workflow::invoker::{FnTask, Invocation, TaskInvoker, TaskRegistry};
    use crate::workflow::items::StaticItems;
    use flowstate_types::config::FailureMode;
    use flowstate_types::error::ClassifiedError;
    use flowstate_types::execution::TraceOutcome;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Engine = WorkflowEngine<MemoryExecutionRepository>;

    fn engine(tasks: TaskRegistry) -> Engine {
        engine_with(EngineConfig::default(), tasks, ItemsSourceRegistry::new())
    }

    fn engine_with(config: EngineConfig, tasks: TaskRegistry, items: ItemsSourceRegistry) -> Engine {
        WorkflowEngine::new(
            config,
            BoxTaskInvoker::new(tasks),
            items,
            MemoryExecutionRepository::new(),
        )
    }

    fn workflow(doc: Value) -> Workflow {
        Workflow::parse("test", &doc.to_string()).unwrap()
    }

    /// Fails with throttling `failures` times, then succeeds.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TaskInvoker for Flaky {
        async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(ClassifiedError::throttling("rate exceeded"))
            } else {
                Ok(json!({"copied": invocation.payload["bucket"]}))
            }
        }
    }

    /// Sleeps `delay_ms` from the payload and tracks peak concurrency.
    #[derive(Default)]
    struct Tracker {
        current: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<Value>>,
    }

    impl TaskInvoker for Arc<Tracker> {
        async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(invocation.payload.clone());
            let delay = invocation.payload["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            if invocation.payload["fail"] == json!(true) {
                let name = invocation.payload["error"].as_str().unwrap_or("ItemError");
                return Err(ClassifiedError::named(name, "bad item"));
            }
            Ok(invocation.payload["id"].clone())
        }
    }

    fn copy_in_workflow(max_attempts: u32) -> Workflow {
        workflow(json!({
            "StartAt": "CopyIn",
            "States": {
                "CopyIn": {
                    "Type": "Task",
                    "Resource": "copy-in",
                    "Retry": [{
                        "ErrorEquals": ["ThrottlingError"],
                        "IntervalSeconds": 1,
                        "MaxAttempts": max_attempts,
                        "BackoffRate": 2
                    }],
                    "Catch": [{
                        "ErrorEquals": ["States.ALL"],
                        "Next": "Recover",
                        "Output": {"failed": "{% $states.errorOutput.Error %}"}
                    }],
                    "Next": "Done"
                },
                "Recover": {"Type": "Pass", "End": true},
                "Done": {"Type": "Succeed"}
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_in_succeeds_on_third_attempt() {
        let engine = engine(TaskRegistry::new().with("copy-in", Flaky::new(2)));
        let record = engine
            .run_execution(&copy_in_workflow(3), json!({"bucket": "raw"}))
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.output, Some(json!({"copied": "raw"})));
        let trace = engine.get_execution_trace(&record.id).await.unwrap();
        let attempts: Vec<u32> = trace
            .iter()
            .filter(|e| e.state_name == "CopyIn")
            .map(|e| e.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_in_exhausted_follows_catch() {
        let engine = engine(TaskRegistry::new().with("copy-in", Flaky::new(2)));
        let output = engine
            .start_sync_execution(&copy_in_workflow(2), json!({"bucket": "raw"}))
            .await
            .unwrap();
        assert_eq!(output, json!({"failed": "ThrottlingError"}));
    }

    #[tokio::test]
    async fn test_uncaught_task_error_fails_execution() {
        let wf = workflow(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Task", "Resource": "boom", "End": true}}
        }));
        let engine = engine(TaskRegistry::new().with(
            "boom",
            FnTask::new(|_| async { Err::<Value, _>(ClassifiedError::invalid_input("missing key")) }),
        ));
        let failure = engine.start_sync_execution(&wf, json!({})).await.unwrap_err();
        assert_eq!(failure, Failure::new("InvalidInput", Some("missing key".into())));
    }

    fn delivery_workflow() -> Workflow {
        workflow(json!({
            "StartAt": "Route",
            "States": {
                "Route": {
                    "Type": "Choice",
                    "Choices": [{
                        "Condition": "{% $states.input.deliveryWorkflow = 'googleSpreadsheet' %}",
                        "Next": "Deliver"
                    }],
                    "Default": "Deliver param Fail"
                },
                "Deliver": {"Type": "Succeed", "Output": {"delivered": true}},
                "Deliver param Fail": {
                    "Type": "Fail",
                    "Error": "InvalidDeliveryWorkflow",
                    "Cause": "unsupported delivery workflow"
                }
            }
        }))
    }

    #[tokio::test]
    async fn test_choice_routes_delivery_workflow() {
        let engine = engine(TaskRegistry::new());
        let wf = delivery_workflow();

        let output = engine
            .start_sync_execution(&wf, json!({"deliveryWorkflow": "googleSpreadsheet"}))
            .await
            .unwrap();
        assert_eq!(output, json!({"delivered": true}));

        let failure = engine
            .start_sync_execution(&wf, json!({"deliveryWorkflow": "email"}))
            .await
            .unwrap_err();
        assert_eq!(failure.error, "InvalidDeliveryWorkflow");
        assert_eq!(failure.cause.as_deref(), Some("unsupported delivery workflow"));
    }

    #[tokio::test]
    async fn test_choice_takes_first_truthy_rule() {
        let wf = workflow(json!({
            "StartAt": "Pick",
            "States": {
                "Pick": {
                    "Type": "Choice",
                    "Choices": [
                        {"Condition": "{% $states.input.n > 10 %}", "Next": "Big"},
                        {"Condition": "{% $states.input.n > 0 %}", "Next": "Positive"}
                    ],
                    "Default": "Other"
                },
                "Big": {"Type": "Succeed", "Output": "big"},
                "Positive": {"Type": "Succeed", "Output": "positive"},
                "Other": {"Type": "Succeed", "Output": "other"}
            }
        }));
        let engine = engine(TaskRegistry::new());
        for (n, expected) in [(50, "big"), (5, "positive"), (-1, "other")] {
            let output = engine.start_sync_execution(&wf, json!({"n": n})).await.unwrap();
            assert_eq!(output, json!(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_respects_concurrency_and_order() {
        let tracker = Arc::new(Tracker::default());
        let wf = workflow(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "MaxConcurrency": 2,
                    "ItemProcessor": {
                        "StartAt": "Work",
                        "States": {"Work": {"Type": "Task", "Resource": "work", "End": true}}
                    },
                    "End": true
                }
            }
        }));
        let items = json!([
            {"id": 1, "delay_ms": 300},
            {"id": 2, "delay_ms": 10},
            {"id": 3, "delay_ms": 50},
            {"id": 4, "delay_ms": 5},
            {"id": 5, "delay_ms": 1}
        ]);
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let output = engine.start_sync_execution(&wf, items).await.unwrap();

        assert_eq!(output, json!([1, 2, 3, 4, 5]));
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(tracker.seen.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_reads_items_source_and_context() {
        let wf = workflow(json!({
            "StartAt": "Each",
            "States": {
                "Each": {
                    "Type": "Map",
                    "ItemReader": {"Resource": "objects", "Arguments": {"prefix": "in/"}},
                    "ItemProcessor": {
                        "StartAt": "Tag",
                        "States": {"Tag": {
                            "Type": "Pass",
                            "Output": "{% $states.context.Map.Item.Index & ':' & $states.input.key %}",
                            "End": true
                        }}
                    },
                    "End": true
                }
            }
        }));
        let items = ItemsSourceRegistry::new().with(
            "objects",
            StaticItems::new(vec![json!({"key": "a"}), json!({"key": "b"})]),
        );
        let engine = engine_with(EngineConfig::default(), TaskRegistry::new(), items);
        let output = engine.start_sync_execution(&wf, json!({})).await.unwrap();
        assert_eq!(output, json!(["0:a", "1:b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_item_failure_is_caught() {
        let tracker = Arc::new(Tracker::default());
        let wf = workflow(json!({
            "StartAt": "Fan",
            "States": {
                "Fan": {
                    "Type": "Map",
                    "ItemProcessor": {
                        "StartAt": "Work",
                        "States": {"Work": {"Type": "Task", "Resource": "work", "End": true}}
                    },
                    "Catch": [{"ErrorEquals": ["ItemError"], "Next": "Failed"}],
                    "End": true
                },
                "Failed": {"Type": "Pass", "Output": "{% $states.input.Error %}", "End": true}
            }
        }));
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let output = engine
            .start_sync_execution(&wf, json!([{"id": 1}, {"id": 2, "fail": true}]))
            .await
            .unwrap();
        assert_eq!(output, json!("ItemError"));
    }

    fn parallel_workflow() -> Workflow {
        workflow(json!({
            "StartAt": "Both",
            "States": {
                "Both": {
                    "Type": "Parallel",
                    "Branches": [
                        {
                            "StartAt": "A",
                            "States": {"A": {"Type": "Task", "Resource": "work", "End": true}},
                            "QueryLanguage": "JSONata"
                        },
                        {
                            "StartAt": "B",
                            "States": {"B": {
                                "Type": "Task",
                                "Resource": "work",
                                "Arguments": {"id": "b", "delay_ms": 10, "fail": true},
                                "End": true
                            }}
                        }
                    ],
                    "Arguments": {"id": "a", "delay_ms": 100},
                    "Catch": [{
                        "ErrorEquals": ["ItemError"],
                        "Next": "Handled",
                        "Output": "{% $states.errorOutput %}"
                    }],
                    "Next": "Joined"
                },
                "Joined": {"Type": "Succeed"},
                "Handled": {"Type": "Succeed"}
            }
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_runs_all_branches_and_reports_failure() {
        let tracker = Arc::new(Tracker::default());
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let output = engine
            .start_sync_execution(&parallel_workflow(), json!({}))
            .await
            .unwrap();

        assert_eq!(output, json!({"Error": "ItemError", "Cause": "bad item"}));
        // Branch A ran to completion even though B failed first.
        let seen = tracker.seen.lock().unwrap();
        assert!(seen.iter().any(|p| p["id"] == json!("a")));
        assert_eq!(tracker.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_siblings() {
        let tracker = Arc::new(Tracker::default());
        let config = EngineConfig {
            parallel_failure_mode: FailureMode::FailFast,
            ..EngineConfig::default()
        };
        let engine = engine_with(
            config,
            TaskRegistry::new().with("work", Arc::clone(&tracker)),
            ItemsSourceRegistry::new(),
        );
        let record = engine
            .run_execution(&parallel_workflow(), json!({}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.output.unwrap()["Error"], "ItemError");
        // Branch A was interrupted mid-sleep.
        assert_eq!(tracker.current.load(Ordering::SeqCst), 1);
    }

    fn failing_branch(delay_ms: u64, error: &str) -> Value {
        json!({
            "StartAt": "W",
            "States": {"W": {
                "Type": "Task",
                "Resource": "work",
                "Arguments": {"delay_ms": delay_ms, "fail": true, "error": error},
                "End": true
            }}
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_lowest_index_failure_wins() {
        let wf = workflow(json!({
            "StartAt": "Both",
            "States": {"Both": {
                "Type": "Parallel",
                "Branches": [failing_branch(100, "SlowError"), failing_branch(10, "FastError")],
                "End": true
            }}
        }));
        let tracker = Arc::new(Tracker::default());
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let failure = engine.start_sync_execution(&wf, json!({})).await.unwrap_err();

        assert_eq!(failure.error, "SlowError");
        assert_eq!(tracker.seen.lock().unwrap().len(), 2);
    }

    fn map_workflow(max_concurrency: u32) -> Workflow {
        workflow(json!({
            "StartAt": "Fan",
            "States": {"Fan": {
                "Type": "Map",
                "MaxConcurrency": max_concurrency,
                "ItemProcessor": {
                    "StartAt": "Work",
                    "States": {"Work": {"Type": "Task", "Resource": "work", "End": true}}
                },
                "End": true
            }}
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_lowest_index_failure_wins() {
        let tracker = Arc::new(Tracker::default());
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let items = json!([
            {"id": 1, "delay_ms": 50, "fail": true, "error": "SlowError"},
            {"id": 2, "delay_ms": 10, "fail": true, "error": "FastError"}
        ]);
        let failure = engine
            .start_sync_execution(&map_workflow(2), items)
            .await
            .unwrap_err();
        assert_eq!(failure.error, "SlowError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_map_stops_dispatching_after_first_failure() {
        let tracker = Arc::new(Tracker::default());
        let engine = engine(TaskRegistry::new().with("work", Arc::clone(&tracker)));
        let items = json!([
            {"id": 1, "fail": true},
            {"id": 2},
            {"id": 3}
        ]);
        let failure = engine
            .start_sync_execution(&map_workflow(1), items)
            .await
            .unwrap_err();

        assert_eq!(failure.error, "ItemError");
        let seen = tracker.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["id"], 1);
    }

    fn throttled_workflow(catch: Value) -> Workflow {
        workflow(json!({
            "StartAt": "Call",
            "States": {
                "Call": {"Type": "Task", "Resource": "throttled", "Catch": catch, "End": true},
                "A": {"Type": "Succeed", "Output": "a"},
                "B": {"Type": "Succeed", "Output": "b"}
            }
        }))
    }

    #[tokio::test]
    async fn test_first_matching_catch_rule_wins() {
        let engine = engine(TaskRegistry::new().with(
            "throttled",
            FnTask::new(|_| async { Err::<Value, _>(ClassifiedError::throttling("slow down")) }),
        ));
        let specific_first = throttled_workflow(json!([
            {"ErrorEquals": ["ThrottlingError"], "Next": "A"},
            {"ErrorEquals": ["States.ALL"], "Next": "B"}
        ]));
        let wildcard_first = throttled_workflow(json!([
            {"ErrorEquals": ["States.ALL"], "Next": "B"},
            {"ErrorEquals": ["ThrottlingError"], "Next": "A"}
        ]));

        let output = engine.start_sync_execution(&specific_first, json!({})).await.unwrap();
        assert_eq!(output, json!("a"));
        let output = engine.start_sync_execution(&wildcard_first, json!({})).await.unwrap();
        assert_eq!(output, json!("b"));
    }

    #[tokio::test]
    async fn test_aliased_error_keeps_raised_name() {
        let engine = engine(TaskRegistry::new());
        let wf = workflow(json!({
            "StartAt": "P",
            "States": {
                "P": {
                    "Type": "Parallel",
                    "Branches": [{"StartAt": "F", "States": {
                        "F": {"Type": "Fail", "Error": "Lambda.ServiceException", "Cause": "cold"}
                    }}],
                    "Catch": [{
                        "ErrorEquals": ["TransientServiceError"],
                        "Next": "Caught",
                        "Output": "{% $states.errorOutput.Error %}"
                    }],
                    "End": true
                },
                "Caught": {"Type": "Succeed"}
            }
        }));
        let output = engine.start_sync_execution(&wf, json!({})).await.unwrap();
        assert_eq!(output, json!("Lambda.ServiceException"));

        let wf = workflow(json!({
            "StartAt": "F",
            "States": {"F": {"Type": "Fail", "Error": "Lambda.ServiceException"}}
        }));
        let failure = engine.start_sync_execution(&wf, json!({})).await.unwrap_err();
        assert_eq!(failure.error, "Lambda.ServiceException");
    }

    #[tokio::test]
    async fn test_parallel_outputs_follow_declaration_order() {
        let wf = workflow(json!({
            "StartAt": "P",
            "States": {
                "P": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "X", "States": {"X": {"Type": "Pass", "Output": "x", "End": true}}},
                        {"StartAt": "Y", "States": {"Y": {"Type": "Pass", "Output": "y", "End": true}}}
                    ],
                    "End": true
                }
            }
        }));
        let engine = engine(TaskRegistry::new());
        let output = engine.start_sync_execution(&wf, json!({})).await.unwrap();
        assert_eq!(output, json!(["x", "y"]));
    }

    #[tokio::test]
    async fn test_pass_reprojection_is_idempotent() {
        let wf = workflow(json!({
            "StartAt": "Same",
            "States": {"Same": {"Type": "Pass", "Output": "{% $states.input %}", "End": true}}
        }));
        let engine = engine(TaskRegistry::new());
        let input = json!({"a": [1, 2], "b": {"c": null}});
        let first = engine.start_sync_execution(&wf, input.clone()).await.unwrap();
        let second = engine.start_sync_execution(&wf, first.clone()).await.unwrap();
        assert_eq!(first, input);
        assert_eq!(second, input);
    }

    #[tokio::test]
    async fn test_branch_assignments_do_not_leak() {
        let wf = workflow(json!({
            "StartAt": "Init",
            "States": {
                "Init": {"Type": "Pass", "Assign": {"label": "outer"}, "Next": "P"},
                "P": {
                    "Type": "Parallel",
                    "Branches": [
                        {"StartAt": "Set", "States": {
                            "Set": {"Type": "Pass", "Assign": {"label": "inner"}, "Next": "Read"},
                            "Read": {"Type": "Pass", "Output": "{% $label %}", "End": true}
                        }},
                        {"StartAt": "Read", "States": {
                            "Read": {"Type": "Pass", "Output": "{% $label %}", "End": true}
                        }}
                    ],
                    "Next": "After"
                },
                "After": {"Type": "Pass", "Output": "{% [$states.input, $label] %}", "End": true}
            }
        }));
        let engine = engine(TaskRegistry::new());
        let output = engine.start_sync_execution(&wf, json!({})).await.unwrap();
        assert_eq!(output, json!([["inner", "outer"], "outer"]));
    }

    #[tokio::test]
    async fn test_expression_error_is_not_caught() {
        let wf = workflow(json!({
            "StartAt": "Bad",
            "States": {
                "Bad": {
                    "Type": "Task",
                    "Resource": "echo",
                    "Arguments": "{% $missing %}",
                    "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "Caught"}],
                    "End": true
                },
                "Caught": {"Type": "Succeed"}
            }
        }));
        let engine = engine(
            TaskRegistry::new().with("echo", FnTask::new(|v| async move { Ok::<_, ClassifiedError>(v) })),
        );
        let failure = engine.start_sync_execution(&wf, json!({})).await.unwrap_err();
        assert_eq!(failure.error, "ExpressionError");
    }

    #[tokio::test]
    async fn test_fail_inside_branch_is_caught_by_parent() {
        let wf = workflow(json!({
            "StartAt": "P",
            "States": {
                "P": {
                    "Type": "Parallel",
                    "Branches": [{"StartAt": "F", "States": {
                        "F": {"Type": "Fail", "Error": "Invalid OTP", "Cause": "expired"}
                    }}],
                    "Catch": [{"ErrorEquals": ["Invalid OTP"], "Next": "Recovered"}],
                    "End": true
                },
                "Recovered": {"Type": "Pass", "End": true}
            }
        }));
        let engine = engine(TaskRegistry::new());
        let output = engine.start_sync_execution(&wf, json!({})).await.unwrap();
        assert_eq!(output, json!({"Error": "Invalid OTP", "Cause": "expired"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_deadline_times_out() {
        let wf = workflow(json!({
            "StartAt": "Slow",
            "TimeoutSeconds": 5,
            "States": {"Slow": {"Type": "Task", "Resource": "slow", "End": true}}
        }));
        let engine = engine(TaskRegistry::new().with(
            "slow",
            FnTask::new(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ClassifiedError>(json!(null))
            }),
        ));
        let record = engine.run_execution(&wf, json!({})).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::TimedOut);
        assert_eq!(record.failure.unwrap().error, EXECUTION_TIMEOUT_ERROR);
        assert_eq!(engine.running_count(), 0);
    }

    #[tokio::test]
    async fn test_depth_limit_is_fatal() {
        let wf = workflow(json!({
            "StartAt": "Outer",
            "States": {"Outer": {
                "Type": "Parallel",
                "Branches": [{"StartAt": "Inner", "States": {"Inner": {
                    "Type": "Parallel",
                    "Branches": [{"StartAt": "Leaf", "States": {"Leaf": {"Type": "Succeed"}}}],
                    "End": true
                }}}],
                "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "Caught"}],
                "End": true
            },
            "Caught": {"Type": "Succeed"}}
        }));
        let config = EngineConfig {
            max_depth: 1,
            ..EngineConfig::default()
        };
        let engine = engine_with(config, TaskRegistry::new(), ItemsSourceRegistry::new());
        let failure = engine.start_sync_execution(&wf, json!({})).await.unwrap_err();
        assert_eq!(failure.error, "DefinitionError");
    }

    #[tokio::test]
    async fn test_job_id_is_injected_into_object_input() {
        let mut config = EngineConfig::default();
        config.job_id.inject = true;
        config.job_id.length = 8;
        let engine = engine_with(config, TaskRegistry::new(), ItemsSourceRegistry::new());
        let wf = workflow(json!({
            "StartAt": "Echo",
            "States": {"Echo": {"Type": "Pass", "End": true}}
        }));

        let output = engine.start_sync_execution(&wf, json!({"a": 1})).await.unwrap();
        let job_id = output["jobId"].as_str().unwrap();
        assert_eq!(job_id.len(), 8);
        assert!(job_id.chars().all(|c| c.is_ascii_alphanumeric()));

        let output = engine.start_sync_execution(&wf, json!([1])).await.unwrap();
        assert_eq!(output, json!([1]));
    }

    #[tokio::test]
    async fn test_async_start_then_describe() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(tokio::sync::Mutex::new(Some(rx)));
        let engine = engine(TaskRegistry::new().with(
            "wait",
            FnTask::new(move |v| {
                let gate = Arc::clone(&gate);
                async move {
                    if let Some(rx) = gate.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok::<_, ClassifiedError>(v)
                }
            }),
        ));
        let wf = workflow(json!({
            "StartAt": "Wait",
            "States": {"Wait": {"Type": "Task", "Resource": "wait", "End": true}}
        }));

        let started = engine.start_execution(&wf, json!({"x": 1})).await.unwrap();
        assert_eq!(started.job_id, None);
        let record = engine.describe_execution(&started.execution_id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Running);

        tx.send(()).unwrap();
        let record = loop {
            let record = engine.describe_execution(&started.execution_id).await.unwrap();
            if record.status.is_terminal() {
                break record;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(record.output, Some(json!({"x": 1})));

        let trace = engine.get_execution_trace(&started.execution_id).await.unwrap();
        assert_eq!(trace.len(), 1);
        assert!(matches!(trace[0].outcome, TraceOutcome::Output { .. }));
        assert!(matches!(
            engine.stop_execution(&started.execution_id).await,
            Err(EngineError::NotRunning(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_execution_aborts() {
        let engine = engine(TaskRegistry::new().with(
            "slow",
            FnTask::new(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ClassifiedError>(json!(null))
            }),
        ));
        let wf = workflow(json!({
            "StartAt": "Slow",
            "States": {"Slow": {"Type": "Task", "Resource": "slow", "End": true}}
        }));
        let started = engine.start_execution(&wf, json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        engine.stop_execution(&started.execution_id).await.unwrap();

        let record = loop {
            let record = engine.describe_execution(&started.execution_id).await.unwrap();
            if record.status.is_terminal() {
                break record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(record.status, ExecutionStatus::Aborted);
        assert_eq!(record.failure.unwrap().error, "ExecutionAborted");
        assert!(matches!(
            engine.stop_execution(&Uuid::now_v7()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    /// Stores records but rejects every trace write.
    #[derive(Default)]
    struct TraceOutage(MemoryExecutionRepository);

    impl ExecutionRepository for TraceOutage {
        async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
            self.0.create_execution(record).await
        }

        async fn finish_execution(
            &self,
            id: &Uuid,
            status: ExecutionStatus,
            output: Option<&Value>,
            failure: Option<&Failure>,
        ) -> Result<(), RepositoryError> {
            self.0.finish_execution(id, status, output, failure).await
        }

        async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
            self.0.get_execution(id).await
        }

        async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
            self.0.list_executions(limit).await
        }

        async fn append_trace(&self, _events: &[TraceEvent]) -> Result<(), RepositoryError> {
            Err(RepositoryError::Query("disk full".to_string()))
        }

        async fn get_trace(&self, execution_id: &Uuid) -> Result<Vec<TraceEvent>, RepositoryError> {
            self.0.get_trace(execution_id).await
        }
    }

    #[tokio::test]
    async fn test_trace_write_failure_still_finishes_record() {
        let engine = WorkflowEngine::new(
            EngineConfig::default(),
            BoxTaskInvoker::new(TaskRegistry::new()),
            ItemsSourceRegistry::new(),
            TraceOutage::default(),
        );
        let wf = workflow(json!({
            "StartAt": "Echo",
            "States": {"Echo": {"Type": "Pass", "End": true}}
        }));

        let record = engine.run_execution(&wf, json!({"x": 1})).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);

        let started = engine.start_execution(&wf, json!({"x": 2})).await.unwrap();
        let stored = loop {
            let stored = engine.describe_execution(&started.execution_id).await.unwrap();
            if stored.status.is_terminal() {
                break stored;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert_eq!(stored.output, Some(json!({"x": 2})));
        assert_eq!(engine.running_count(), 0);
        assert!(engine.get_execution_trace(&started.execution_id).await.unwrap().is_empty());
        assert!(matches!(
            engine.stop_execution(&started.execution_id).await,
            Err(EngineError::NotRunning(_))
        ));
    }
}
