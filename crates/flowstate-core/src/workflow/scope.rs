//! Workflow variables written by `Assign`.
//!
//! A scope is a plain map that is cloned when a Parallel branch or Map item
//! starts. Children see every variable of their parent at fork time, and
//! nothing a child assigns is ever visible to the parent or to siblings.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScopeError {
    #[error("variable '${0}' is not defined")]
    NotFound(String),

    #[error("'{0}' is not a valid variable name")]
    InvalidName(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    vars: HashMap<String, Value>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this scope for a child execution context.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn assign(&mut self, name: impl Into<String>, value: Value) -> Result<(), ScopeError> {
        let name = name.into();
        if !is_valid_name(&name) {
            return Err(ScopeError::InvalidName(name));
        }
        self.vars.insert(name, value);
        Ok(())
    }

    /// Apply a batch of assignments that were all evaluated against the
    /// scope as it was before any of them.
    pub fn assign_all(&mut self, values: Vec<(String, Value)>) -> Result<(), ScopeError> {
        if let Some((bad, _)) = values.iter().find(|(name, _)| !is_valid_name(name)) {
            return Err(ScopeError::InvalidName(bad.clone()));
        }
        self.vars.extend(values);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Value, ScopeError> {
        self.vars
            .get(name)
            .ok_or_else(|| ScopeError::NotFound(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }
}

/// Identifier rules for variable names; `states` is reserved.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && name != "states"
}
