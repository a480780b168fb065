//! Workflow definition parsing, validation, and filesystem discovery.
//!
//! Definitions are accepted as JSON or YAML. Everything that can be checked
//! statically is checked here, before any execution starts: state references,
//! `Next`/`End` exclusivity, Choice defaults, retry parameters, reachability
//! and the syntax of every embedded expression. Validation and compilation
//! are one pass, so a loaded [`Workflow`] never parses an expression again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowstate_types::definition::{
    CatchRule, MapState, RetryPolicy, StateNode, WorkflowDefinition,
};
use flowstate_types::error::ErrorClass;
use serde_json::{Map, Value};
use thiserror::Error;

use super::compiled::{Assignments, CompiledGraph, CompiledState, Transforms};
use super::expression::ExpressionError;
use super::graph::unreachable_states;
use super::scope::is_valid_name;
use super::template::{expression_source, Condition, Template};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors detected while loading a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// JSON/YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// A transition names a state that does not exist.
    #[error("unknown state: {0}")]
    UnknownState(String),

    /// A state can never be entered.
    #[error("unreachable state: {0}")]
    Unreachable(String),

    /// An embedded expression does not parse.
    #[error("expression error in {location}: {source}")]
    Expression {
        location: String,
        #[source]
        source: ExpressionError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Validated workflow
// ---------------------------------------------------------------------------

/// A named definition that passed validation, with its templates compiled.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    graph: Arc<CompiledGraph>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Result<Self, DefinitionError> {
        let name = name.into();
        validate_workflow_name(&name)?;
        let graph = compile_definition(definition)?;
        Ok(Self {
            name,
            graph: Arc::new(graph),
        })
    }

    /// Parse and validate a JSON or YAML document.
    pub fn parse(name: impl Into<String>, content: &str) -> Result<Self, DefinitionError> {
        Self::new(name, parse_definition(content)?)
    }

    /// Load from disk; the workflow is named after the file stem.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(workflow_name_from_path(path), &content)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        self.graph.definition()
    }

    pub(crate) fn graph(&self) -> &Arc<CompiledGraph> {
        &self.graph
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a document without validating it. JSON is detected by a leading
/// `{`; anything else is read as YAML.
pub fn parse_definition(content: &str) -> Result<WorkflowDefinition, DefinitionError> {
    if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))
    } else {
        serde_yaml_ng::from_str(content).map_err(|e| DefinitionError::Parse(e.to_string()))
    }
}

fn workflow_name_from_path(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".asl.json", ".json", ".yaml", ".yml"] {
        if let Some(stem) = file.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    file
}

fn validate_workflow_name(name: &str) -> Result<(), DefinitionError> {
    if name.is_empty() {
        return Err(DefinitionError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DefinitionError::Validation(format!(
            "workflow name '{name}' contains invalid characters (only alphanumeric, '-' and '_' allowed)"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate and compile a definition, nested branch and item processor
/// graphs included.
pub fn compile_definition(def: WorkflowDefinition) -> Result<CompiledGraph, DefinitionError> {
    if def.timeout_seconds == Some(0) {
        return Err(DefinitionError::Validation(
            "TimeoutSeconds must be > 0".to_string(),
        ));
    }
    compile_graph(Arc::new(def), "")
}

fn compile_graph(
    def: Arc<WorkflowDefinition>,
    location: &str,
) -> Result<CompiledGraph, DefinitionError> {
    let graph_label = if location.is_empty() {
        "workflow".to_string()
    } else {
        location.to_string()
    };
    let at = |name: &str| {
        if location.is_empty() {
            format!("state '{name}'")
        } else {
            format!("{location} > state '{name}'")
        }
    };

    if def.states.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "{graph_label} has no states"
        )));
    }
    if !def.states.contains_key(&def.start_at) {
        return Err(DefinitionError::UnknownState(format!(
            "StartAt '{}' of {graph_label} is not defined",
            def.start_at
        )));
    }
    if let Some(language) = &def.query_language {
        if language != "JSONata" {
            return Err(DefinitionError::Validation(format!(
                "{graph_label}: unsupported QueryLanguage '{language}'"
            )));
        }
    }

    let mut compiled = HashMap::with_capacity(def.states.len());
    for (name, state) in &def.states {
        let here = at(name);

        for target in state.successors() {
            if !def.states.contains_key(target) {
                return Err(DefinitionError::UnknownState(format!(
                    "{here} transitions to unknown state '{target}'"
                )));
            }
        }

        if let Some((next, end)) = state.next_end() {
            match (next, end) {
                (Some(_), true) => {
                    return Err(DefinitionError::Validation(format!(
                        "{here} sets both Next and End"
                    )));
                }
                (None, false) => {
                    return Err(DefinitionError::Validation(format!(
                        "{here} must set either Next or End"
                    )));
                }
                _ => {}
            }
        }

        let parts = match state {
            StateNode::Task(task) => {
                if task.resource.trim().is_empty() {
                    return Err(DefinitionError::Validation(format!(
                        "{here} has an empty Resource"
                    )));
                }
                if task.timeout_seconds == Some(0) {
                    return Err(DefinitionError::Validation(format!(
                        "{here}: TimeoutSeconds must be > 0"
                    )));
                }
                for (i, policy) in task.retry.iter().enumerate() {
                    validate_retry(policy, &format!("{here} Retry[{i}]"))?;
                }
                CompiledState {
                    arguments: compile_template(&task.arguments, &here, "Arguments")?,
                    transforms: compile_transforms(&task.output, &task.assign, &here)?,
                    catchers: compile_catch(&task.catch, &here)?,
                    ..CompiledState::default()
                }
            }
            StateNode::Choice(choice) => {
                if choice.choices.is_empty() {
                    return Err(DefinitionError::Validation(format!(
                        "{here} has no Choices"
                    )));
                }
                if choice.default.is_none() {
                    return Err(DefinitionError::Validation(format!(
                        "{here} has no Default"
                    )));
                }
                let mut choices = Vec::with_capacity(choice.choices.len());
                for (i, rule) in choice.choices.iter().enumerate() {
                    let rule_at = format!("{here} Choices[{i}]");
                    let condition = Condition::compile(&rule.condition).map_err(|source| {
                        DefinitionError::Expression {
                            location: format!("{rule_at} Condition"),
                            source,
                        }
                    })?;
                    choices.push((condition, compile_transforms(&rule.output, &rule.assign, &rule_at)?));
                }
                CompiledState {
                    transforms: compile_transforms(&choice.output, &choice.assign, &here)?,
                    choices,
                    ..CompiledState::default()
                }
            }
            StateNode::Pass(pass) => CompiledState {
                transforms: compile_transforms(&pass.output, &pass.assign, &here)?,
                ..CompiledState::default()
            },
            StateNode::Parallel(parallel) => {
                if parallel.branches.is_empty() {
                    return Err(DefinitionError::Validation(format!(
                        "{here} has no Branches"
                    )));
                }
                let mut children = Vec::with_capacity(parallel.branches.len());
                for (i, branch) in parallel.branches.iter().enumerate() {
                    let branch = compile_graph(Arc::new(branch.clone()), &format!("{here} > branch {i}"))?;
                    children.push(Arc::new(branch));
                }
                CompiledState {
                    arguments: compile_template(&parallel.arguments, &here, "Arguments")?,
                    transforms: compile_transforms(&parallel.output, &parallel.assign, &here)?,
                    catchers: compile_catch(&parallel.catch, &here)?,
                    children,
                    ..CompiledState::default()
                }
            }
            StateNode::Map(map) => compile_map(map, &here)?,
            StateNode::Fail(fail) => {
                if let Some(error) = &fail.error {
                    if ErrorClass::from(error.as_str()) == ErrorClass::All {
                        return Err(DefinitionError::Validation(format!(
                            "{here} cannot raise the wildcard error '{error}'"
                        )));
                    }
                }
                CompiledState::default()
            }
            StateNode::Succeed(succeed) => CompiledState {
                transforms: Transforms {
                    output: compile_template(&succeed.output, &here, "Output")?,
                    assign: None,
                },
                ..CompiledState::default()
            },
        };
        compiled.insert(name.clone(), parts);
    }

    let unreachable = unreachable_states(&def);
    if !unreachable.is_empty() {
        return Err(DefinitionError::Unreachable(format!(
            "{graph_label}: {}",
            unreachable
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(CompiledGraph::new(def, compiled))
}

fn compile_map(map: &MapState, here: &str) -> Result<CompiledState, DefinitionError> {
    if map.items.is_some() && map.item_reader.is_some() {
        return Err(DefinitionError::Validation(format!(
            "{here} sets both Items and ItemReader"
        )));
    }
    if let Some(items) = &map.items {
        let is_expression = items.as_str().is_some_and(|s| expression_source(s).is_some());
        if !items.is_array() && !is_expression {
            return Err(DefinitionError::Validation(format!(
                "{here}: Items must be an array or a '{{% ... %}}' expression"
            )));
        }
    }
    let items = compile_template(&map.items, here, "Items")?;
    let mut arguments = None;
    if let Some(reader) = &map.item_reader {
        if reader.resource.trim().is_empty() {
            return Err(DefinitionError::Validation(format!(
                "{here} has an ItemReader without Resource"
            )));
        }
        arguments = compile_template(&reader.arguments, here, "ItemReader.Arguments")?;
    }
    if let Some(config) = &map.item_processor.processor_config {
        if config.mode != "INLINE" {
            return Err(DefinitionError::Validation(format!(
                "{here}: unsupported ProcessorConfig mode '{}'",
                config.mode
            )));
        }
    }
    let processor = compile_graph(
        Arc::new(map.item_processor.definition.clone()),
        &format!("{here} > item processor"),
    )?;
    Ok(CompiledState {
        arguments,
        items,
        transforms: compile_transforms(&map.output, &map.assign, here)?,
        catchers: compile_catch(&map.catch, here)?,
        children: vec![Arc::new(processor)],
        ..CompiledState::default()
    })
}

fn validate_retry(policy: &RetryPolicy, here: &str) -> Result<(), DefinitionError> {
    if policy.error_equals.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "{here} has empty ErrorEquals"
        )));
    }
    if policy.max_attempts < 1 {
        return Err(DefinitionError::Validation(format!(
            "{here}: MaxAttempts must be >= 1"
        )));
    }
    if !policy.backoff_rate.is_finite() || policy.backoff_rate < 1.0 {
        return Err(DefinitionError::Validation(format!(
            "{here}: BackoffRate must be >= 1.0"
        )));
    }
    if !policy.interval_seconds.is_finite() || policy.interval_seconds < 0.0 {
        return Err(DefinitionError::Validation(format!(
            "{here}: IntervalSeconds must be >= 0"
        )));
    }
    if let Some(max) = policy.max_delay_seconds {
        if !max.is_finite() || max <= 0.0 {
            return Err(DefinitionError::Validation(format!(
                "{here}: MaxDelaySeconds must be > 0"
            )));
        }
    }
    Ok(())
}

fn compile_catch(rules: &[CatchRule], here: &str) -> Result<Vec<Transforms>, DefinitionError> {
    let mut compiled = Vec::with_capacity(rules.len());
    for (i, rule) in rules.iter().enumerate() {
        let rule_at = format!("{here} Catch[{i}]");
        if rule.error_equals.is_empty() {
            return Err(DefinitionError::Validation(format!(
                "{rule_at} has empty ErrorEquals"
            )));
        }
        compiled.push(compile_transforms(&rule.output, &rule.assign, &rule_at)?);
    }
    Ok(compiled)
}

fn compile_transforms(
    output: &Option<Value>,
    assign: &Option<Map<String, Value>>,
    here: &str,
) -> Result<Transforms, DefinitionError> {
    Ok(Transforms {
        output: compile_template(output, here, "Output")?,
        assign: compile_assign(assign, here)?,
    })
}

fn compile_template(
    value: &Option<Value>,
    here: &str,
    field: &str,
) -> Result<Option<Template>, DefinitionError> {
    value
        .as_ref()
        .map(|value| {
            Template::compile(value).map_err(|source| DefinitionError::Expression {
                location: format!("{here} {field}"),
                source,
            })
        })
        .transpose()
}

fn compile_assign(
    assign: &Option<Map<String, Value>>,
    here: &str,
) -> Result<Option<Assignments>, DefinitionError> {
    let Some(assign) = assign else {
        return Ok(None);
    };
    let mut compiled = Vec::with_capacity(assign.len());
    for (name, value) in assign {
        if !is_valid_name(name) {
            return Err(DefinitionError::Validation(format!(
                "{here}: '{name}' is not a valid variable name"
            )));
        }
        let template = Template::compile(value).map_err(|source| DefinitionError::Expression {
            location: format!("{here} Assign.{name}"),
            source,
        })?;
        compiled.push((name.clone(), template));
    }
    Ok(Some(compiled))
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Discover workflow documents (`.json`, `.yaml`, `.yml`) under `base_dir`.
///
/// Files that fail to load are skipped with a warning.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.1.name().cmp(b.1.name()));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, Workflow)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_definition = path
            .extension()
            .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml");
        if !is_definition {
            continue;
        }
        match Workflow::load(&path) {
            Ok(workflow) => results.push((path, workflow)),
            Err(error) => {
                tracing::warn!(?path, %error, "skipping invalid workflow file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
