//! Built-in `$functions`.

use serde_json::Value;

use super::eval::{number, stringify, truthy, type_name};
use super::ExpressionError;

/// Apply built-in `name` to already evaluated arguments.
pub(super) fn call(name: &str, args: Vec<Option<Value>>) -> Result<Option<Value>, ExpressionError> {
    match name {
        "exists" => {
            arity(name, &args, 1, 1)?;
            Ok(Some(Value::Bool(args[0].is_some())))
        }
        "lookup" => {
            arity(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let object = args.next().flatten();
            let key = string_arg(name, args.next().flatten())?;
            let Some(key) = key else {
                return Ok(None);
            };
            Ok(match object {
                Some(Value::Object(mut map)) => map.remove(&key),
                Some(Value::Array(items)) => {
                    let found: Vec<Value> = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(mut map) => map.remove(&key),
                            _ => None,
                        })
                        .collect();
                    (!found.is_empty()).then_some(Value::Array(found))
                }
                _ => None,
            })
        }
        "string" => {
            arity(name, &args, 1, 1)?;
            Ok(first(args).map(|v| match v {
                Value::String(s) => Value::String(s),
                other => Value::String(stringify(&other)),
            }))
        }
        "number" => {
            arity(name, &args, 1, 1)?;
            match first(args) {
                None => Ok(None),
                Some(Value::Number(n)) => Ok(Some(Value::Number(n))),
                Some(Value::String(s)) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        ExpressionError::TypeMismatch(format!("$number cannot convert '{s}'"))
                    })?;
                    number(parsed).map(Some)
                }
                Some(Value::Bool(b)) => Ok(Some(Value::from(u8::from(b)))),
                Some(other) => Err(ExpressionError::TypeMismatch(format!(
                    "$number cannot convert {}",
                    type_name(&other)
                ))),
            }
        }
        "boolean" => {
            arity(name, &args, 1, 1)?;
            Ok(first(args).map(|v| Value::Bool(truthy(Some(&v)))))
        }
        "not" => {
            arity(name, &args, 1, 1)?;
            Ok(Some(Value::Bool(!truthy(first(args).as_ref()))))
        }
        "count" => {
            arity(name, &args, 1, 1)?;
            let count = match first(args) {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            };
            Ok(Some(Value::from(count)))
        }
        "length" => {
            arity(name, &args, 1, 1)?;
            Ok(string_arg(name, first(args))?.map(|s| Value::from(s.chars().count())))
        }
        "uppercase" | "lowercase" | "trim" => {
            arity(name, &args, 1, 1)?;
            Ok(string_arg(name, first(args))?.map(|s| {
                Value::String(match name {
                    "uppercase" => s.to_uppercase(),
                    "lowercase" => s.to_lowercase(),
                    _ => s.trim().to_string(),
                })
            }))
        }
        "contains" => {
            arity(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let haystack = string_arg(name, args.next().flatten())?;
            let needle = string_arg(name, args.next().flatten())?;
            Ok(match (haystack, needle) {
                (Some(h), Some(n)) => Some(Value::Bool(h.contains(&n))),
                _ => None,
            })
        }
        "split" => {
            arity(name, &args, 2, 2)?;
            let mut args = args.into_iter();
            let text = string_arg(name, args.next().flatten())?;
            let separator = string_arg(name, args.next().flatten())?;
            let (Some(text), Some(separator)) = (text, separator) else {
                return Ok(None);
            };
            let parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(separator.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Some(Value::Array(parts)))
        }
        "join" => {
            arity(name, &args, 1, 2)?;
            let mut args = args.into_iter();
            let items = args.next().flatten();
            let separator = string_arg(name, args.next().flatten())?.unwrap_or_default();
            let items = match items {
                None => return Ok(None),
                Some(Value::String(s)) => return Ok(Some(Value::String(s))),
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(ExpressionError::TypeMismatch(format!(
                        "$join expects an array of strings, got {}",
                        type_name(&other)
                    )));
                }
            };
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s),
                    other => {
                        return Err(ExpressionError::TypeMismatch(format!(
                            "$join expects an array of strings, found {}",
                            type_name(&other)
                        )));
                    }
                }
            }
            Ok(Some(Value::String(parts.join(&separator))))
        }
        other => Err(ExpressionError::Syntax {
            offset: 0,
            message: format!("unknown function '${other}'"),
        }),
    }
}

fn arity(name: &str, args: &[Option<Value>], min: usize, max: usize) -> Result<(), ExpressionError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        min.to_string()
    } else {
        format!("{min}-{max}")
    };
    Err(ExpressionError::Arity {
        function: name.to_string(),
        expected,
        got: args.len(),
    })
}

fn first(args: Vec<Option<Value>>) -> Option<Value> {
    args.into_iter().next().flatten()
}

/// Undefined passes through as `None`; any non-string is a type error.
fn string_arg(name: &str, value: Option<Value>) -> Result<Option<String>, ExpressionError> {
    match value {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ExpressionError::TypeMismatch(format!(
            "${name} expects a string, got {}",
            type_name(&other)
        ))),
    }
}
