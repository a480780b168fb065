//! JSON templates with embedded `{% expr %}` strings.
//!
//! A string whose trimmed form starts with `{%` and ends with `%}` is an
//! expression; everything else is literal. Objects and arrays are walked
//! recursively. Object fields and array elements whose expression evaluates to
//! undefined are dropped; a template that is itself undefined renders as
//! `null`.

use serde_json::{Map, Value};

use super::expression::{evaluate, parse, truthy, Bindings, Expr, ExpressionError};

#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    Literal(Value),
    Expr(Expr),
    Array(Vec<Template>),
    Object(Vec<(String, Template)>),
}

/// Inner source of a `{% ... %}` string, if `s` is one.
pub fn expression_source(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    trimmed
        .strip_prefix("{%")
        .and_then(|rest| rest.strip_suffix("%}"))
        .map(str::trim)
}

impl Template {
    pub fn compile(value: &Value) -> Result<Self, ExpressionError> {
        Ok(match value {
            Value::String(s) => match expression_source(s) {
                Some(src) => Template::Expr(parse(src)?),
                None => Template::Literal(value.clone()),
            },
            Value::Array(items) => Template::Array(
                items
                    .iter()
                    .map(Template::compile)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Template::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Template::compile(v)?)))
                    .collect::<Result<_, ExpressionError>>()?,
            ),
            other => Template::Literal(other.clone()),
        })
    }

    /// Render to a value; top-level undefined becomes `null`.
    pub fn render(&self, env: &Bindings<'_>) -> Result<Value, ExpressionError> {
        Ok(self.render_inner(env)?.unwrap_or(Value::Null))
    }

    /// Render, keeping undefined distinct from `null`.
    pub fn render_inner(&self, env: &Bindings<'_>) -> Result<Option<Value>, ExpressionError> {
        match self {
            Template::Literal(value) => Ok(Some(value.clone())),
            Template::Expr(expr) => evaluate(expr, env),
            Template::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = item.render_inner(env)? {
                        out.push(value);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Template::Object(fields) => {
                let mut out = Map::new();
                for (key, template) in fields {
                    if let Some(value) = template.render_inner(env)? {
                        out.insert(key.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
        }
    }
}

/// A Choice condition: must be a single `{% expr %}` string.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition(Expr);

impl Condition {
    pub fn compile(src: &str) -> Result<Self, ExpressionError> {
        let inner = expression_source(src).ok_or_else(|| ExpressionError::Syntax {
            offset: 0,
            message: "condition must be a '{% ... %}' expression".to_string(),
        })?;
        Ok(Condition(parse(inner)?))
    }

    pub fn holds(&self, env: &Bindings<'_>) -> Result<bool, ExpressionError> {
        Ok(truthy(evaluate(&self.0, env)?.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::scope::VariableScope;
    use serde_json::json;

    fn with_env<T>(input: &Value, scope: &VariableScope, f: impl FnOnce(&Bindings<'_>) -> T) -> T {
        let states = json!({"input": input});
        let env = Bindings {
            context: input,
            states: &states,
            variables: scope,
        };
        f(&env)
    }

    fn render(value: &Value, env: &Bindings<'_>) -> Result<Value, ExpressionError> {
        Template::compile(value)?.render(env)
    }

    #[test]
    fn renders_nested_templates() {
        let mut scope = VariableScope::new();
        scope.assign("jobId", json!("j1")).unwrap();
        let template = json!({
            "s3": {
                "bucket": "{% $states.input.bucket %}",
                "key": "{% 'dmq/' & $jobId & '/request' %}"
            },
            "static": [1, "two"]
        });
        let input = json!({"bucket": "media"});
        let out = with_env(&input, &scope, |env| render(&template, env)).unwrap();
        assert_eq!(
            out,
            json!({
                "s3": {"bucket": "media", "key": "dmq/j1/request"},
                "static": [1, "two"]
            })
        );
    }

    #[test]
    fn undefined_fields_are_omitted() {
        let scope = VariableScope::new();
        let template = json!({
            "present": "{% $states.input.a %}",
            "absent": "{% $states.input.missing %}"
        });
        let input = json!({"a": 1});
        let out = with_env(&input, &scope, |env| render(&template, env)).unwrap();
        assert_eq!(out, json!({"present": 1}));

        let top = json!("{% $states.input.missing %}");
        let out = with_env(&input, &scope, |env| render(&top, env)).unwrap();
        assert_eq!(out, Value::Null);
    }

    #[test]
    fn plain_strings_stay_literal() {
        let scope = VariableScope::new();
        let input = json!({});
        let template = json!("{ not an expression }");
        let out = with_env(&input, &scope, |env| render(&template, env)).unwrap();
        assert_eq!(out, template);
    }

    #[test]
    fn compile_reports_syntax_errors() {
        let err = Template::compile(&json!({"a": ["{% 1 + %}"]})).unwrap_err();
        assert!(matches!(err, ExpressionError::Syntax { .. }));
    }

    #[test]
    fn conditions_require_expression_syntax() {
        assert!(Condition::compile("$states.input.valid").is_err());
        let condition = Condition::compile("{% ($states.input.valid) = (true) %}").unwrap();
        let scope = VariableScope::new();
        let valid = json!({"valid": true});
        let invalid = json!({"valid": false});
        assert!(with_env(&valid, &scope, |env| condition.holds(env)).unwrap());
        assert!(!with_env(&invalid, &scope, |env| condition.holds(env)).unwrap());
    }
}
