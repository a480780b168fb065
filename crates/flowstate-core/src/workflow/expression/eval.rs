//! Tree-walking evaluator.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::functions;
use super::parser::{number_literal, BinaryOp, Expr};
use super::ExpressionError;
use crate::workflow::scope::VariableScope;

/// Everything an expression can read.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    /// The context value `$` and the root of bare field paths.
    pub context: &'a Value,
    /// The `$states` object (`input`, `context`, and `result` or
    /// `errorOutput` where applicable).
    pub states: &'a Value,
    pub variables: &'a VariableScope,
}

type Evaluated<'a> = Option<Cow<'a, Value>>;

/// Evaluate `expr`. `Ok(None)` means the result is undefined.
pub fn evaluate(expr: &Expr, env: &Bindings<'_>) -> Result<Option<Value>, ExpressionError> {
    Ok(eval(expr, env)?.map(Cow::into_owned))
}

fn eval<'a>(expr: &'a Expr, env: &Bindings<'a>) -> Result<Evaluated<'a>, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(Some(Cow::Borrowed(value))),

        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(value) = eval(item, env)? {
                    out.push(value.into_owned());
                }
            }
            Ok(Some(Cow::Owned(Value::Array(out))))
        }

        Expr::Object(fields) => {
            let mut out = Map::new();
            for (key, value) in fields {
                if let Some(value) = eval(value, env)? {
                    out.insert(key.clone(), value.into_owned());
                }
            }
            Ok(Some(Cow::Owned(Value::Object(out))))
        }

        Expr::Variable(name) => match name.as_str() {
            "" => Ok(Some(Cow::Borrowed(env.context))),
            "states" => Ok(Some(Cow::Borrowed(env.states))),
            _ => env
                .variables
                .lookup(name)
                .map(|v| Some(Cow::Borrowed(v)))
                .ok_or_else(|| ExpressionError::UnknownVariable(name.clone())),
        },

        Expr::Field(name) => Ok(field(Cow::Borrowed(env.context), name)),

        Expr::Path(base, name) => Ok(eval(base, env)?.and_then(|base| field(base, name))),

        Expr::Index(base, index) => {
            let Some(base) = eval(base, env)? else {
                return Ok(None);
            };
            let index = eval(index, env)?.ok_or_else(|| ExpressionError::Undefined("[]".into()))?;
            match index.as_ref() {
                Value::Number(n) => {
                    let position = n.as_f64().unwrap_or_default();
                    if position.fract() != 0.0 {
                        return Err(ExpressionError::TypeMismatch(format!(
                            "array index must be an integer, got {position}"
                        )));
                    }
                    Ok(element(base, position as i64))
                }
                Value::String(key) => Ok(field(base, key)),
                other => Err(ExpressionError::TypeMismatch(format!(
                    "cannot index with {}",
                    type_name(other)
                ))),
            }
        }

        Expr::Negate(operand) => {
            let value = eval(operand, env)?.ok_or_else(|| ExpressionError::Undefined("-".into()))?;
            match value.as_ref() {
                Value::Number(n) => number(-n.as_f64().unwrap_or_default()).map(|v| Some(Cow::Owned(v))),
                other => Err(ExpressionError::TypeMismatch(format!(
                    "cannot negate {}",
                    type_name(other)
                ))),
            }
        }

        Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, env),

        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            let condition = eval(condition, env)?;
            if truthy(condition.as_deref()) {
                eval(then, env)
            } else {
                match otherwise {
                    Some(otherwise) => eval(otherwise, env),
                    None => Ok(None),
                }
            }
        }

        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, env)?.map(Cow::into_owned));
            }
            Ok(functions::call(name, values)?.map(Cow::Owned))
        }
    }
}

fn binary<'a>(
    op: BinaryOp,
    lhs: &'a Expr,
    rhs: &'a Expr,
    env: &Bindings<'a>,
) -> Result<Evaluated<'a>, ExpressionError> {
    let boolean =
        |b: bool| -> Result<Evaluated<'a>, ExpressionError> { Ok(Some(Cow::Owned(Value::Bool(b)))) };

    match op {
        BinaryOp::And => {
            if !truthy(eval(lhs, env)?.as_deref()) {
                return boolean(false);
            }
            boolean(truthy(eval(rhs, env)?.as_deref()))
        }
        BinaryOp::Or => {
            if truthy(eval(lhs, env)?.as_deref()) {
                return boolean(true);
            }
            boolean(truthy(eval(rhs, env)?.as_deref()))
        }
        _ => {
            let left = eval(lhs, env)?;
            let right = eval(rhs, env)?;
            match op {
                BinaryOp::Eq | BinaryOp::Ne => {
                    let equal = match (left.as_deref(), right.as_deref()) {
                        (Some(a), Some(b)) => values_equal(a, b),
                        _ => false,
                    };
                    boolean(if op == BinaryOp::Eq { equal } else { !equal })
                }
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let ordering = order(op, left.as_deref(), right.as_deref())?;
                    boolean(match op {
                        BinaryOp::Lt => ordering == Ordering::Less,
                        BinaryOp::Le => ordering != Ordering::Greater,
                        BinaryOp::Gt => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    })
                }
                BinaryOp::Concat => {
                    let (Some(a), Some(b)) = (left, right) else {
                        return Err(ExpressionError::Undefined(op.symbol().into()));
                    };
                    let mut joined = stringify(&a);
                    joined.push_str(&stringify(&b));
                    Ok(Some(Cow::Owned(Value::String(joined))))
                }
                _ => {
                    let (a, b) = numeric_operands(op, left.as_deref(), right.as_deref())?;
                    let result = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        BinaryOp::Mul => a * b,
                        BinaryOp::Div if b == 0.0 => {
                            return Err(ExpressionError::Arithmetic("division by zero".into()));
                        }
                        BinaryOp::Div => a / b,
                        BinaryOp::Mod if b == 0.0 => {
                            return Err(ExpressionError::Arithmetic("modulo by zero".into()));
                        }
                        _ => a % b,
                    };
                    number(result).map(|v| Some(Cow::Owned(v)))
                }
            }
        }
    }
}

fn numeric_operands(
    op: BinaryOp,
    left: Option<&Value>,
    right: Option<&Value>,
) -> Result<(f64, f64), ExpressionError> {
    let (Some(a), Some(b)) = (left, right) else {
        return Err(ExpressionError::Undefined(op.symbol().into()));
    };
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ExpressionError::TypeMismatch(format!(
            "'{}' needs two numbers, got {} and {}",
            op.symbol(),
            type_name(a),
            type_name(b)
        ))),
    }
}

fn order(op: BinaryOp, left: Option<&Value>, right: Option<&Value>) -> Result<Ordering, ExpressionError> {
    let (Some(a), Some(b)) = (left, right) else {
        return Err(ExpressionError::Undefined(op.symbol().into()));
    };
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .ok_or_else(|| ExpressionError::Arithmetic("unordered numbers".into())),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExpressionError::TypeMismatch(format!(
            "'{}' needs two numbers or two strings, got {} and {}",
            op.symbol(),
            type_name(a),
            type_name(b)
        ))),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn field<'a>(base: Cow<'a, Value>, name: &str) -> Evaluated<'a> {
    match base {
        Cow::Borrowed(Value::Object(map)) => map.get(name).map(Cow::Borrowed),
        Cow::Borrowed(Value::Array(items)) => map_field(items, name).map(Cow::Owned),
        Cow::Owned(Value::Object(mut map)) => map.remove(name).map(Cow::Owned),
        Cow::Owned(Value::Array(items)) => map_field(&items, name).map(Cow::Owned),
        _ => None,
    }
}

/// `array.name` collects `name` from every object element that has it.
fn map_field(items: &[Value], name: &str) -> Option<Value> {
    let values: Vec<Value> = items
        .iter()
        .filter_map(|item| item.as_object().and_then(|m| m.get(name)).cloned())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(Value::Array(values))
    }
}

fn element(base: Cow<'_, Value>, position: i64) -> Evaluated<'_> {
    let len = match base.as_ref() {
        Value::Array(items) => items.len() as i64,
        _ => return None,
    };
    let resolved = if position < 0 { len + position } else { position };
    if resolved < 0 || resolved >= len {
        return None;
    }
    let resolved = resolved as usize;
    match base {
        Cow::Borrowed(Value::Array(items)) => items.get(resolved).map(Cow::Borrowed),
        Cow::Owned(Value::Array(items)) => items.into_iter().nth(resolved).map(Cow::Owned),
        _ => None,
    }
}

pub(super) fn number(n: f64) -> Result<Value, ExpressionError> {
    if !n.is_finite() {
        return Err(ExpressionError::Arithmetic(format!("result {n} is not a finite number")));
    }
    Ok(number_literal(n))
}

/// JSONata truthiness: undefined, `null`, `false`, `0`, `""`, `[]` and `{}`
/// are false.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// String form used by `&` and `$string`: strings are unquoted, everything
/// else is rendered as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;
    use serde_json::json;

    fn eval_with(src: &str, context: Value, scope: &VariableScope) -> Result<Option<Value>, ExpressionError> {
        let states = json!({"input": context.clone(), "context": {"State": {"Name": "S"}}});
        let env = Bindings {
            context: &context,
            states: &states,
            variables: scope,
        };
        evaluate(&parse(src).unwrap(), &env)
    }

    fn eval_str(src: &str, context: Value) -> Result<Option<Value>, ExpressionError> {
        eval_with(src, context, &VariableScope::new())
    }

    #[test]
    fn reads_states_input_paths() {
        let input = json!({"s3": {"bucket": "b", "keys": ["k1", "k2"]}});
        assert_eq!(eval_str("$states.input.s3.bucket", input.clone()).unwrap(), Some(json!("b")));
        assert_eq!(eval_str("$states.input.s3.keys[1]", input.clone()).unwrap(), Some(json!("k2")));
        assert_eq!(eval_str("$states.input.s3.keys[-1]", input.clone()).unwrap(), Some(json!("k2")));
        assert_eq!(eval_str("s3.bucket", input.clone()).unwrap(), Some(json!("b")));
        assert_eq!(eval_str("$.s3.bucket", input).unwrap(), Some(json!("b")));
    }

    #[test]
    fn missing_fields_are_undefined_not_null() {
        let input = json!({"present": null});
        assert_eq!(eval_str("$states.input.missing", input.clone()).unwrap(), None);
        assert_eq!(eval_str("$states.input.present", input.clone()).unwrap(), Some(Value::Null));
        assert_eq!(eval_str("$exists($states.input.present)", input.clone()).unwrap(), Some(json!(true)));
        assert_eq!(eval_str("$exists($states.input.missing)", input).unwrap(), Some(json!(false)));
    }

    #[test]
    fn concatenation_builds_object_keys() {
        let mut scope = VariableScope::new();
        scope.assign("jobId", json!("abc123")).unwrap();
        let out = eval_with("'dmq/' & $jobId & '/request'", json!({}), &scope).unwrap();
        assert_eq!(out, Some(json!("dmq/abc123/request")));

        let out = eval_with("'n=' & 3", json!({}), &scope).unwrap();
        assert_eq!(out, Some(json!("n=3")));
    }

    #[test]
    fn concatenation_with_undefined_fails() {
        let err = eval_str("'a' & $states.input.nope", json!({})).unwrap_err();
        assert!(matches!(err, ExpressionError::Undefined(_)));
    }

    #[test]
    fn unknown_variable_fails() {
        let err = eval_str("$nope", json!({})).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownVariable("nope".into()));
    }

    #[test]
    fn arithmetic_normalizes_integers() {
        assert_eq!(eval_str("1 + 2 * 3", json!({})).unwrap(), Some(json!(7)));
        assert_eq!(eval_str("7 / 2", json!({})).unwrap(), Some(json!(3.5)));
        assert_eq!(eval_str("7 % 4", json!({})).unwrap(), Some(json!(3)));
        assert!(matches!(
            eval_str("1 / 0", json!({})).unwrap_err(),
            ExpressionError::Arithmetic(_)
        ));
        assert!(matches!(
            eval_str("1 + 'a'", json!({})).unwrap_err(),
            ExpressionError::TypeMismatch(_)
        ));
    }

    #[test]
    fn comparisons() {
        let input = json!({"valid": true, "count": 3, "name": "b"});
        assert_eq!(eval_str("($states.input.valid) = (true)", input.clone()).unwrap(), Some(json!(true)));
        assert_eq!(eval_str("count >= 3 and name < 'c'", input.clone()).unwrap(), Some(json!(true)));
        assert_eq!(eval_str("count = 3.0", input.clone()).unwrap(), Some(json!(true)));
        assert_eq!(eval_str("missing = null", input.clone()).unwrap(), Some(json!(false)));
        assert_eq!(eval_str("missing != 1", input.clone()).unwrap(), Some(json!(true)));
        assert!(matches!(
            eval_str("count < 'x'", input).unwrap_err(),
            ExpressionError::TypeMismatch(_)
        ));
    }

    #[test]
    fn and_or_short_circuit() {
        assert_eq!(eval_str("false and $nope", json!({})).unwrap(), Some(json!(false)));
        assert_eq!(eval_str("true or $nope", json!({})).unwrap(), Some(json!(true)));
    }

    #[test]
    fn ternary_selects_branch() {
        let input = json!({"googleSpreadsheet": {"id": "x"}});
        let src = "$exists($states.input.googleSpreadsheet) ? 'sheet' : 'fail'";
        assert_eq!(eval_str(src, input).unwrap(), Some(json!("sheet")));
        assert_eq!(eval_str(src, json!({})).unwrap(), Some(json!("fail")));
        assert_eq!(eval_str("false ? 1", json!({})).unwrap(), None);
    }

    #[test]
    fn constructors_drop_undefined_members() {
        let out = eval_str("{'a': 1, 'b': missing, 'c': [1, missing, 2]}", json!({})).unwrap();
        assert_eq!(out, Some(json!({"a": 1, "c": [1, 2]})));
    }

    #[test]
    fn array_paths_collect_fields() {
        let input = json!({"fonts": [{"name": "a"}, {"size": 1}, {"name": "b"}]});
        assert_eq!(eval_str("fonts.name", input).unwrap(), Some(json!(["a", "b"])));
    }

    #[test]
    fn truthiness_table() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(!truthy(Some(&json!([]))));
        assert!(truthy(Some(&json!("x"))));
        assert!(truthy(Some(&json!([0]))));
        assert!(truthy(Some(&json!({"a": 1}))));
    }
}
