//! Graph driver shared by the top-level workflow, Parallel branches and Map
//! items.
//!
//! An [`Interpreter`] is cheap to clone: it carries the shared services, the
//! execution's trace buffer and the cancellation token of the graph it is
//! driving. Nested graphs are spawned onto a `JoinSet` with a child token.

use std::sync::Arc;

use flowstate_types::config::EngineConfig;
use flowstate_types::error::ClassifiedError;
use futures_util::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::compiled::CompiledGraph;
use super::context::ExecutionContext;
use super::expression::ExpressionError;
use super::invoker::BoxTaskInvoker;
use super::items::ItemsSourceRegistry;
use super::trace::ExecutionTrace;

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Fatal execution errors. None of these can be matched by `Retry` or
/// `Catch`; they end the whole execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("expression error in state '{state}': {source}")]
    Expression {
        state: String,
        #[source]
        source: ExpressionError,
    },

    /// A definition problem only detectable at run time.
    #[error("state '{state}': {message}")]
    Definition { state: String, message: String },

    #[error("nesting depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },

    #[error("execution aborted")]
    Aborted,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Error name reported in the execution's failure.
    pub fn error_name(&self) -> &'static str {
        match self {
            ExecutionError::Expression { .. } => "ExpressionError",
            ExecutionError::Definition { .. } | ExecutionError::DepthExceeded { .. } => {
                "DefinitionError"
            }
            ExecutionError::Aborted => "ExecutionAborted",
            ExecutionError::Internal(_) => "InternalError",
        }
    }

    pub(crate) fn expression(state: &str) -> impl FnOnce(ExpressionError) -> Self + '_ {
        move |source| ExecutionError::Expression {
            state: state.to_string(),
            source,
        }
    }
}

/// How a graph ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOutcome {
    Succeeded(Value),
    /// An uncaught task error or a `Fail` state.
    Failed(ClassifiedError),
}

/// Result of running one state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StateOutcome {
    Next { next: String, output: Value },
    End { output: Value },
    Failed(ClassifiedError),
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Collaborators shared by every execution of an engine.
pub(crate) struct Services {
    pub config: EngineConfig,
    pub invoker: BoxTaskInvoker,
    pub items: ItemsSourceRegistry,
}

#[derive(Clone)]
pub(crate) struct Interpreter {
    pub(super) services: Arc<Services>,
    pub(super) trace: ExecutionTrace,
    pub(super) cancel: CancellationToken,
}

impl Interpreter {
    pub fn new(services: Arc<Services>, trace: ExecutionTrace, cancel: CancellationToken) -> Self {
        Self {
            services,
            trace,
            cancel,
        }
    }

    /// Same execution, different cancellation scope.
    pub(super) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self {
            services: Arc::clone(&self.services),
            trace: self.trace.clone(),
            cancel,
        }
    }

    pub(super) fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Drive `graph` from `StartAt` until a terminal outcome.
    ///
    /// Boxed so that nested graphs can be spawned from inside a state.
    pub fn run_graph(
        &self,
        graph: Arc<CompiledGraph>,
        ctx: ExecutionContext,
    ) -> BoxFuture<'static, Result<GraphOutcome, ExecutionError>> {
        let this = self.clone();
        Box::pin(async move { this.walk(&graph, ctx).await })
    }

    async fn walk(
        &self,
        graph: &CompiledGraph,
        mut ctx: ExecutionContext,
    ) -> Result<GraphOutcome, ExecutionError> {
        let mut current = graph.start_at().to_string();
        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Aborted);
            }
            let (state, compiled) = graph
                .state(&current)
                .ok_or_else(|| ExecutionError::Definition {
                    state: current.clone(),
                    message: "state is not defined".to_string(),
                })?;

            match self.run_state(&current, state, compiled, &mut ctx).await? {
                StateOutcome::Next { next, output } => {
                    tracing::trace!(path = %ctx.path, from = %current, to = %next, "transition");
                    ctx.input = output;
                    current = next;
                }
                StateOutcome::End { output } => return Ok(GraphOutcome::Succeeded(output)),
                StateOutcome::Failed(error) => return Ok(GraphOutcome::Failed(error)),
            }
        }
    }
}
