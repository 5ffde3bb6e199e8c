//! Native filter evaluation
//!
//! Evaluates store-dialect filter expressions against JSON documents, the
//! way the store would. Used by [`MemoryStore`](super::memory::MemoryStore)
//! for queries and for change-feed filters over event envelopes.
//!
//! Comparison operators only compare values of the same type; a string is
//! never greater than a number. Array fields match when the array itself or
//! any of its elements satisfies the condition.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::errors::{LiveError, LiveResult};
use super::filter::NativeFilter;
use super::query::{compare_values, lookup_path};

/// Whether `document` satisfies `filter`
pub fn matches(document: &Value, filter: &NativeFilter) -> LiveResult<bool> {
    match filter.as_value() {
        Value::Object(expr) => matches_expr(document, expr),
        other => Err(LiveError::invalid_filter(format!("filter must be an object, got {}", other))),
    }
}

fn matches_expr(document: &Value, expr: &Map<String, Value>) -> LiveResult<bool> {
    for (key, condition) in expr {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in operands(key, condition)? {
                    if !matches_expr(document, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_match(document, key, condition)?,
            "$nor" => !any_match(document, key, condition)?,
            op if op.starts_with('$') => {
                return Err(LiveError::invalid_filter(format!("unsupported top-level operator {}", op)))
            }
            path => matches_condition(lookup_path(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_match(document: &Value, op: &str, condition: &Value) -> LiveResult<bool> {
    for sub in operands(op, condition)? {
        if matches_expr(document, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn operands<'a>(op: &str, condition: &'a Value) -> LiveResult<Vec<&'a Map<String, Value>>> {
    let items = condition
        .as_array()
        .ok_or_else(|| LiveError::invalid_filter(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| LiveError::invalid_filter(format!("{} operands must be objects", op)))
        })
        .collect()
}

/// An object whose keys are all operators, e.g. `{"$gt": 1, "$lt": 5}`
fn as_operator_doc(condition: &Value) -> Option<&Map<String, Value>> {
    condition
        .as_object()
        .filter(|map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn matches_condition(field: Option<&Value>, condition: &Value) -> LiveResult<bool> {
    let Some(ops) = as_operator_doc(condition) else {
        return Ok(equals(field, condition));
    };
    for (op, operand) in ops {
        if !apply_operator(field, op, operand)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_operator(field: Option<&Value>, op: &str, operand: &Value) -> LiveResult<bool> {
    let result = match op {
        "$eq" => equals(field, operand),
        "$ne" => !equals(field, operand),
        "$gt" => compares(field, operand, |o| o == Ordering::Greater),
        "$gte" => compares(field, operand, |o| o != Ordering::Less),
        "$lt" => compares(field, operand, |o| o == Ordering::Less),
        "$lte" => compares(field, operand, |o| o != Ordering::Greater),
        "$in" => in_list(field, op, operand)?,
        "$nin" => !in_list(field, op, operand)?,
        "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
        "$elemMatch" => elem_match(field, operand)?,
        other => return Err(LiveError::invalid_filter(format!("unsupported operator {}", other))),
    };
    Ok(result)
}

/// Equality; `null` also matches a missing field
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(actual) if actual == expected => true,
        Some(Value::Array(items)) => items.contains(expected),
        Some(_) => false,
    }
}

fn compares(field: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| {
        same_type(value, bound) && accept(compare_values(Some(value), Some(bound)))
    };
    match field {
        None => false,
        Some(Value::Array(items)) if !bound.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn same_type(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn in_list(field: Option<&Value>, op: &str, operand: &Value) -> LiveResult<bool> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| LiveError::invalid_filter(format!("{} expects an array", op)))?;
    Ok(candidates.iter().any(|candidate| equals(field, candidate)))
}

fn elem_match(field: Option<&Value>, operand: &Value) -> LiveResult<bool> {
    let Some(Value::Array(items)) = field else {
        return Ok(false);
    };
    let inner = operand
        .as_object()
        .ok_or_else(|| LiveError::invalid_filter("$elemMatch expects an object"))?;

    for item in items {
        let matched = if as_operator_doc(operand).is_some() {
            matches_condition(Some(item), operand)?
        } else {
            matches_expr(item, inner)?
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}
