//! Parallel and Map coordination.
//!
//! Children run on a `JoinSet` under a child cancellation token. Outputs are
//! joined by declaration/item index, never by completion order. When several
//! children fail, the lowest index wins. Map concurrency is bounded with a
//! semaphore whose permit is held for the whole item, and no new item is
//! dispatched after the first failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowstate_types::config::FailureMode;
use flowstate_types::definition::MapState;
use flowstate_types::error::ClassifiedError;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::compiled::{CompiledGraph, CompiledState};
use super::context::ExecutionContext;
use super::expression::ExpressionError;
use super::interpreter::{ExecutionError, GraphOutcome, Interpreter};
use super::items::ItemStream;

type ChildResult = (usize, Result<GraphOutcome, ExecutionError>);

impl Interpreter {
    pub(super) async fn run_parallel(
        &self,
        name: &str,
        branches: &[Arc<CompiledGraph>],
        ctx: &ExecutionContext,
        input: Value,
    ) -> Result<Result<Value, ClassifiedError>, ExecutionError> {
        self.check_depth(ctx)?;
        let siblings = self.cancel.child_token();
        let child = self.with_cancel(siblings.clone());
        let mut results = ChildResults::new(
            branches.len(),
            siblings,
            self.config().parallel_failure_mode,
        );

        let mut join_set: JoinSet<ChildResult> = JoinSet::new();
        for (index, branch) in branches.iter().enumerate() {
            let graph = Arc::clone(branch);
            let branch_ctx = ctx.fork_branch(name, index, input.clone());
            let runner = child.clone();
            join_set.spawn(async move { (index, runner.run_graph(graph, branch_ctx).await) });
        }
        tracing::debug!(path = %ctx.path, state = name, branches = branches.len(), "parallel started");

        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.map_err(join_error)?;
            results.record(&self.cancel, index, result)?;
        }

        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Aborted);
        }
        Ok(results.finish())
    }

    pub(super) async fn run_map(
        &self,
        name: &str,
        map: &MapState,
        compiled: &CompiledState,
        ctx: &ExecutionContext,
    ) -> Result<Result<Value, ClassifiedError>, ExecutionError> {
        self.check_depth(ctx)?;
        let processor = compiled
            .children
            .first()
            .cloned()
            .ok_or_else(|| ExecutionError::Definition {
                state: name.to_string(),
                message: "Map has no item processor".to_string(),
            })?;
        let mut items = match self.map_items(name, map, compiled, ctx)? {
            Ok(items) => items,
            Err(error) => return Ok(Err(error)),
        };

        let limit = map
            .max_concurrency
            .filter(|&c| c > 0)
            .map(|c| Arc::new(Semaphore::new(c as usize)));
        let siblings = self.cancel.child_token();
        let child = self.with_cancel(siblings.clone());
        let mut results = ChildResults::new(0, siblings.clone(), self.config().parallel_failure_mode);

        let mut join_set: JoinSet<ChildResult> = JoinSet::new();
        let mut next_index = 0usize;
        let mut exhausted = false;
        let mut source_error = None;

        loop {
            let dispatching = !exhausted && !results.has_failures() && !siblings.is_cancelled();
            if !dispatching && join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    let (index, result) = joined.map_err(join_error)?;
                    results.record(&self.cancel, index, result)?;
                }
                permit = acquire(limit.clone()), if dispatching => {
                    let permit = permit?;
                    match items.next().await {
                        Some(Ok(item)) => {
                            let index = next_index;
                            next_index += 1;
                            results.push_slot();
                            let item_ctx = ctx.fork_item(name, index, item);
                            let runner = child.clone();
                            let graph = Arc::clone(&processor);
                            join_set.spawn(async move {
                                let _permit = permit;
                                (index, runner.run_graph(graph, item_ctx).await)
                            });
                        }
                        Some(Err(error)) => {
                            tracing::warn!(path = %ctx.path, state = name, error = %error, "items source failed");
                            source_error = Some(error);
                            exhausted = true;
                        }
                        None => exhausted = true,
                    }
                }
                else => break,
            }
        }
        tracing::debug!(path = %ctx.path, state = name, items = next_index, "map finished");

        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Aborted);
        }
        match (results.finish(), source_error) {
            (Ok(_), Some(error)) => Ok(Err(error)),
            (joined, _) => Ok(joined),
        }
    }

    /// Resolve the item stream: `ItemReader`, then `Items`, then the state
    /// input itself.
    fn map_items(
        &self,
        name: &str,
        map: &MapState,
        compiled: &CompiledState,
        ctx: &ExecutionContext,
    ) -> Result<Result<ItemStream, ClassifiedError>, ExecutionError> {
        let states = ctx.states_object(name);
        let env = ctx.bindings(&states);

        if let Some(reader) = &map.item_reader {
            let query = match &compiled.arguments {
                Some(template) => template.render(&env).map_err(ExecutionError::expression(name))?,
                None => Value::Null,
            };
            return Ok(match self.services.items.get(&reader.resource) {
                Some(source) => Ok(source.list(&query)),
                None => Err(ClassifiedError::invalid_input(format!(
                    "no items source registered as '{}'",
                    reader.resource
                ))),
            });
        }

        let items = match &compiled.items {
            Some(template) => template.render(&env).map_err(ExecutionError::expression(name))?,
            None => ctx.input.clone(),
        };
        match items {
            Value::Array(items) => Ok(Ok(futures_util::stream::iter(items.into_iter().map(Ok)).boxed())),
            other => Err(ExecutionError::Expression {
                state: name.to_string(),
                source: ExpressionError::TypeMismatch(format!(
                    "Map items must be an array, got {}",
                    kind_of(&other)
                )),
            }),
        }
    }

    fn check_depth(&self, ctx: &ExecutionContext) -> Result<(), ExecutionError> {
        let depth = ctx.depth + 1;
        let max = self.config().max_depth;
        if depth > max {
            return Err(ExecutionError::DepthExceeded { depth, max });
        }
        Ok(())
    }
}

async fn acquire(
    limit: Option<Arc<Semaphore>>,
) -> Result<Option<OwnedSemaphorePermit>, ExecutionError> {
    match limit {
        Some(semaphore) => semaphore
            .acquire_owned()
            .await
            .map(Some)
            .map_err(|e| ExecutionError::Internal(format!("map semaphore closed: {e}"))),
        None => Ok(None),
    }
}

fn join_error(error: JoinError) -> ExecutionError {
    ExecutionError::Internal(format!("task join error: {error}"))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Join bookkeeping
// ---------------------------------------------------------------------------

struct ChildResults {
    outputs: Vec<Option<Value>>,
    failures: BTreeMap<usize, ClassifiedError>,
    siblings: CancellationToken,
    mode: FailureMode,
}

impl ChildResults {
    fn new(slots: usize, siblings: CancellationToken, mode: FailureMode) -> Self {
        Self {
            outputs: vec![None; slots],
            failures: BTreeMap::new(),
            siblings,
            mode,
        }
    }

    fn push_slot(&mut self) {
        self.outputs.push(None);
    }

    fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Record one finished child. Fatal errors cancel the siblings and are
    /// returned; aborts caused by our own fail-fast cancellation are ignored.
    fn record(
        &mut self,
        parent: &CancellationToken,
        index: usize,
        result: Result<GraphOutcome, ExecutionError>,
    ) -> Result<(), ExecutionError> {
        match result {
            Ok(GraphOutcome::Succeeded(output)) => {
                if let Some(slot) = self.outputs.get_mut(index) {
                    *slot = Some(output);
                }
            }
            Ok(GraphOutcome::Failed(error)) => {
                tracing::debug!(index, error = %error.class, "child failed");
                self.failures.insert(index, error);
                if self.mode == FailureMode::FailFast {
                    self.siblings.cancel();
                }
            }
            Err(ExecutionError::Aborted) if self.siblings.is_cancelled() && !parent.is_cancelled() => {}
            Err(error) => {
                self.siblings.cancel();
                return Err(error);
            }
        }
        Ok(())
    }

    /// Outputs in index order, or the lowest-index failure.
    fn finish(self) -> Result<Value, ClassifiedError> {
        if let Some((_, error)) = self.failures.into_iter().next() {
            return Err(error);
        }
        Ok(Value::Array(
            self.outputs
                .into_iter()
                .map(|o| o.unwrap_or(Value::Null))
                .collect(),
        ))
    }
}
