//! Load-time compiled form of a workflow graph.
//!
//! Every template and Choice condition is parsed once, when the definition is
//! loaded. The declared structure stays in the [`WorkflowDefinition`]; the
//! compiled parts sit next to it keyed by state name, and Parallel branches
//! and Map item processors are compiled into their own graphs.

use std::collections::HashMap;
use std::sync::Arc;

use flowstate_types::definition::{StateNode, WorkflowDefinition};

use super::template::{Condition, Template};

/// A compiled `Assign` block, in declaration order.
pub type Assignments = Vec<(String, Template)>;

#[derive(Debug)]
pub struct CompiledGraph {
    definition: Arc<WorkflowDefinition>,
    states: HashMap<String, CompiledState>,
}

impl CompiledGraph {
    pub(crate) fn new(
        definition: Arc<WorkflowDefinition>,
        states: HashMap<String, CompiledState>,
    ) -> Self {
        Self { definition, states }
    }

    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    pub fn start_at(&self) -> &str {
        &self.definition.start_at
    }

    /// The declared state and its compiled parts.
    pub fn state(&self, name: &str) -> Option<(&StateNode, &CompiledState)> {
        Some((self.definition.state(name)?, self.states.get(name)?))
    }
}

/// `Output` and `Assign` of a state, a Choice rule or a Catch rule.
#[derive(Debug, Default)]
pub struct Transforms {
    pub output: Option<Template>,
    pub assign: Option<Assignments>,
}

#[derive(Debug, Default)]
pub struct CompiledState {
    /// Task or Parallel `Arguments`; Map `ItemReader.Arguments`.
    pub arguments: Option<Template>,
    /// Map `Items`.
    pub items: Option<Template>,
    pub transforms: Transforms,
    pub choices: Vec<(Condition, Transforms)>,
    /// Same order as the state's `Catch`.
    pub catchers: Vec<Transforms>,
    /// Parallel branches, or the single Map item processor.
    pub children: Vec<Arc<CompiledGraph>>,
}
