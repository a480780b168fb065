//! Per-state execution for all seven state types.
//!
//! Every state follows the same shape: build `$states`, do the state's work,
//! render `Output` (falling back to the state's natural result), evaluate
//! `Assign` against the pre-state scope, then pick the transition.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowstate_types::definition::{
    CatchRule, ChoiceState, StateNode, TaskState, Transition,
};
use flowstate_types::error::{ClassifiedError, ErrorClass};
use serde_json::Value;

use super::compiled::{Assignments, CompiledState, Transforms};
use super::context::{ExecutionContext, StatesObject};
use super::interpreter::{ExecutionError, Interpreter, StateOutcome};
use super::invoker::Invocation;
use super::retry::{RetryError, RetryHandler};
use super::template::Template;
use super::trace::TraceEntry;

/// Error name raised by a `Fail` state without `Error`.
const DEFAULT_FAIL_ERROR: &str = "States.Fail";

impl Interpreter {
    pub(super) async fn run_state(
        &self,
        name: &str,
        state: &StateNode,
        compiled: &CompiledState,
        ctx: &mut ExecutionContext,
    ) -> Result<StateOutcome, ExecutionError> {
        if self.cancel.is_cancelled() {
            return Err(ExecutionError::Aborted);
        }
        tracing::debug!(path = %ctx.path, state = name, kind = state.kind(), "entering state");
        let started_at = Utc::now();

        match state {
            StateNode::Task(task) => self.run_task(name, state, task, compiled, ctx).await,

            StateNode::Choice(choice) => self.run_choice(name, choice, compiled, ctx, started_at),

            StateNode::Pass(_) => {
                let states = ctx.states_object(name);
                let input = ctx.input.clone();
                let output = self.apply_transforms(
                    name,
                    compiled.transforms.output.as_ref(),
                    compiled.transforms.assign.as_ref(),
                    ctx,
                    &states,
                    input,
                )?;
                self.record_output(name, state, ctx, started_at, &output);
                Ok(transition(state, output))
            }

            StateNode::Parallel(_) => {
                let branch_input = {
                    let states = ctx.states_object(name);
                    let env = ctx.bindings(&states);
                    match &compiled.arguments {
                        Some(template) => template.render(&env).map_err(ExecutionError::expression(name))?,
                        None => ctx.input.clone(),
                    }
                };
                let joined = self.run_parallel(name, &compiled.children, ctx, branch_input).await?;
                self.finish_join(name, state, compiled, joined, ctx, started_at)
            }

            StateNode::Map(map) => {
                let joined = self.run_map(name, map, compiled, ctx).await?;
                self.finish_join(name, state, compiled, joined, ctx, started_at)
            }

            StateNode::Fail(fail) => {
                let error = ClassifiedError::named(
                    fail.error.as_deref().unwrap_or(DEFAULT_FAIL_ERROR),
                    fail.cause.clone().unwrap_or_default(),
                );
                self.trace.record_error(self.entry(name, state, ctx, 1, started_at), &error);
                tracing::info!(path = %ctx.path, state = name, error = %error.name, "fail state reached");
                Ok(StateOutcome::Failed(error))
            }

            StateNode::Succeed(_) => {
                let output = match &compiled.transforms.output {
                    Some(template) => {
                        let states = ctx.states_object(name);
                        template
                            .render(&ctx.bindings(&states))
                            .map_err(ExecutionError::expression(name))?
                    }
                    None => ctx.input.clone(),
                };
                self.record_output(name, state, ctx, started_at, &output);
                Ok(StateOutcome::End { output })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Task
    // -----------------------------------------------------------------------

    async fn run_task(
        &self,
        name: &str,
        state: &StateNode,
        task: &TaskState,
        compiled: &CompiledState,
        ctx: &mut ExecutionContext,
    ) -> Result<StateOutcome, ExecutionError> {
        let payload = {
            let states = ctx.states_object(name);
            let env = ctx.bindings(&states);
            match &compiled.arguments {
                Some(template) => template.render(&env).map_err(ExecutionError::expression(name))?,
                None => ctx.input.clone(),
            }
        };
        let timeout_secs = task
            .timeout_seconds
            .unwrap_or(self.config().task_timeout_secs);
        let invocation = Invocation {
            resource: task.resource.clone(),
            payload,
            timeout: Duration::from_secs(timeout_secs),
        };

        let path = ctx.path.clone();
        let attempts = AtomicU32::new(1);
        let result = RetryHandler::run_with_retry(&task.retry, &self.cancel, |attempt| {
            attempts.store(attempt, Ordering::Relaxed);
            self.invoke_attempt(name, &path, &invocation, attempt)
        })
        .await;
        let last_attempt = attempts.into_inner();

        match result {
            Ok(raw) => {
                let states = ctx
                    .states_object(name)
                    .with_retry_count(last_attempt - 1)
                    .with_result(raw.clone());
                let output = self.apply_transforms(
                    name,
                    compiled.transforms.output.as_ref(),
                    compiled.transforms.assign.as_ref(),
                    ctx,
                    &states,
                    raw,
                )?;
                Ok(transition(state, output))
            }
            Err(RetryError::Cancelled) => Err(ExecutionError::Aborted),
            Err(RetryError::Exhausted(_)) if self.cancel.is_cancelled() => {
                Err(ExecutionError::Aborted)
            }
            Err(RetryError::Exhausted(error)) => {
                tracing::info!(
                    path = %ctx.path,
                    state = name,
                    attempts = last_attempt,
                    error = %error.class,
                    "task failed"
                );
                self.route_error(name, state.catchers(), &compiled.catchers, error, ctx)
            }
        }
    }

    async fn invoke_attempt(
        &self,
        name: &str,
        path: &str,
        invocation: &Invocation,
        attempt: u32,
    ) -> Result<Value, ClassifiedError> {
        let started_at = Utc::now();
        let result = tokio::select! {
            result = self.services.invoker.invoke(invocation) => result,
            _ = self.cancel.cancelled() => {
                return Err(ClassifiedError::unknown("invocation cancelled"));
            }
        };

        let entry = TraceEntry {
            path,
            state_name: name,
            state_type: "Task",
            attempt,
            input: invocation.payload.clone(),
            started_at,
        };
        match &result {
            Ok(output) => self.trace.record_output(entry, output),
            Err(error) => self.trace.record_error(entry, error),
        }
        result
    }

    // -----------------------------------------------------------------------
    // Choice
    // -----------------------------------------------------------------------

    fn run_choice(
        &self,
        name: &str,
        choice: &ChoiceState,
        compiled: &CompiledState,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
    ) -> Result<StateOutcome, ExecutionError> {
        let states = ctx.states_object(name);
        let fallback = &compiled.transforms;
        let mut selected = None;
        {
            let env = ctx.bindings(&states);
            for (rule, (condition, transforms)) in choice.choices.iter().zip(&compiled.choices) {
                if condition.holds(&env).map_err(ExecutionError::expression(name))? {
                    selected = Some((rule, transforms));
                    break;
                }
            }
        }

        let input = ctx.input.clone();
        let (next, output) = match selected {
            Some((rule, transforms)) => {
                let output = self.apply_transforms(
                    name,
                    transforms.output.as_ref().or(fallback.output.as_ref()),
                    transforms.assign.as_ref().or(fallback.assign.as_ref()),
                    ctx,
                    &states,
                    input,
                )?;
                (rule.next.clone(), output)
            }
            None => {
                let default = choice.default.clone().ok_or_else(|| ExecutionError::Definition {
                    state: name.to_string(),
                    message: "no choice matched and Default is missing".to_string(),
                })?;
                let output = self.apply_transforms(
                    name,
                    fallback.output.as_ref(),
                    fallback.assign.as_ref(),
                    ctx,
                    &states,
                    input,
                )?;
                (default, output)
            }
        };

        tracing::debug!(path = %ctx.path, state = name, next = %next, "choice taken");
        self.trace.record_output(
            TraceEntry {
                path: &ctx.path,
                state_name: name,
                state_type: "Choice",
                attempt: 1,
                input: ctx.input.clone(),
                started_at,
            },
            &output,
        );
        Ok(StateOutcome::Next { next, output })
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// Handle the joined result of a Parallel or Map state.
    fn finish_join(
        &self,
        name: &str,
        state: &StateNode,
        compiled: &CompiledState,
        joined: Result<Value, ClassifiedError>,
        ctx: &mut ExecutionContext,
        started_at: DateTime<Utc>,
    ) -> Result<StateOutcome, ExecutionError> {
        match joined {
            Ok(results) => {
                let states = ctx.states_object(name).with_result(results.clone());
                let output = self.apply_transforms(
                    name,
                    compiled.transforms.output.as_ref(),
                    compiled.transforms.assign.as_ref(),
                    ctx,
                    &states,
                    results,
                )?;
                self.record_output(name, state, ctx, started_at, &output);
                Ok(transition(state, output))
            }
            Err(error) => {
                self.trace
                    .record_error(self.entry(name, state, ctx, 1, started_at), &error);
                self.route_error(name, state.catchers(), &compiled.catchers, error, ctx)
            }
        }
    }

    /// Send `error` to the first matching Catch rule, or fail the graph.
    fn route_error(
        &self,
        name: &str,
        rules: &[CatchRule],
        compiled: &[Transforms],
        error: ClassifiedError,
        ctx: &mut ExecutionContext,
    ) -> Result<StateOutcome, ExecutionError> {
        let Some((rule, transforms)) = rules
            .iter()
            .zip(compiled)
            .find(|(rule, _)| ErrorClass::any_matches(&rule.error_equals, &error.class))
        else {
            return Ok(StateOutcome::Failed(error));
        };

        tracing::info!(
            path = %ctx.path,
            state = name,
            error = %error.class,
            next = %rule.next,
            "error caught"
        );
        let payload = error.to_payload();
        let states = ctx.states_object(name).with_error_output(payload.clone());
        let output = self.apply_transforms(
            name,
            transforms.output.as_ref(),
            transforms.assign.as_ref(),
            ctx,
            &states,
            payload,
        )?;
        Ok(StateOutcome::Next {
            next: rule.next.clone(),
            output,
        })
    }

    /// Render `Output` (or use `default`) and apply `Assign`.
    ///
    /// Both are evaluated against the scope as it was before the state, then
    /// the assignments are applied together.
    fn apply_transforms(
        &self,
        name: &str,
        output: Option<&Template>,
        assign: Option<&Assignments>,
        ctx: &mut ExecutionContext,
        states: &StatesObject,
        default: Value,
    ) -> Result<Value, ExecutionError> {
        let (output, assignments) = {
            let env = ctx.bindings(states);
            let output = match output {
                Some(template) => template.render(&env).map_err(ExecutionError::expression(name))?,
                None => default,
            };
            let mut assignments = Vec::new();
            for (variable, template) in assign.into_iter().flatten() {
                let value = template.render(&env).map_err(ExecutionError::expression(name))?;
                assignments.push((variable.clone(), value));
            }
            (output, assignments)
        };

        if !assignments.is_empty() {
            ctx.scope
                .assign_all(assignments)
                .map_err(|e| ExecutionError::Definition {
                    state: name.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(output)
    }

    fn entry<'a>(
        &self,
        name: &'a str,
        state: &StateNode,
        ctx: &'a ExecutionContext,
        attempt: u32,
        started_at: DateTime<Utc>,
    ) -> TraceEntry<'a> {
        TraceEntry {
            path: &ctx.path,
            state_name: name,
            state_type: state.kind(),
            attempt,
            input: ctx.input.clone(),
            started_at,
        }
    }

    fn record_output(
        &self,
        name: &str,
        state: &StateNode,
        ctx: &ExecutionContext,
        started_at: DateTime<Utc>,
        output: &Value,
    ) {
        self.trace
            .record_output(self.entry(name, state, ctx, 1, started_at), output);
    }
}

fn transition(state: &StateNode, output: Value) -> StateOutcome {
    match state.transition() {
        Some(Transition::Next(next)) => StateOutcome::Next {
            next: next.to_string(),
            output,
        },
        Some(Transition::End) | None => StateOutcome::End { output },
    }
}
