//! # Filters
//!
//! Typed filter predicates and their translation into the store's native
//! (MongoDB dialect) JSON filter expressions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{LiveError, LiveResult};

/// Logical operators whose operand is an array of sub-filters
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// A predicate over document fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Matches every document
    All,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, exists: bool },
    /// At least one array element matches `filter` (fields are element-relative)
    ElemMatch { field: String, filter: Box<Filter> },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Nor { filters: Vec<Filter> },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.into(),
            values,
        }
    }

    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Nin {
            field: field.into(),
            values,
        }
    }

    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Filter::Exists {
            field: field.into(),
            exists,
        }
    }

    pub fn elem_match(field: impl Into<String>, filter: Filter) -> Self {
        Filter::ElemMatch {
            field: field.into(),
            filter: Box::new(filter),
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    pub fn nor(filters: Vec<Filter>) -> Self {
        Filter::Nor { filters }
    }
}

/// A filter expression in the store's native dialect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeFilter(Value);

impl NativeFilter {
    /// Wrap a native expression; must be a JSON object
    pub fn new(value: Value) -> LiveResult<Self> {
        if !value.is_object() {
            return Err(LiveError::invalid_filter(format!(
                "native filter must be an object, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// The empty filter, matching everything
    pub fn match_all() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn is_match_all(&self) -> bool {
        self.0.as_object().map(|m| m.is_empty()).unwrap_or(false)
    }
}

impl fmt::Display for NativeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Translate a typed filter into the store dialect
pub fn translate(filter: &Filter) -> LiveResult<NativeFilter> {
    translate_value(filter).map(NativeFilter)
}

fn translate_value(filter: &Filter) -> LiveResult<Value> {
    let expr = match filter {
        Filter::All => Value::Object(Map::new()),
        Filter::Eq { field, value } => field_op(field, "$eq", value.clone())?,
        Filter::Ne { field, value } => field_op(field, "$ne", value.clone())?,
        Filter::Gt { field, value } => field_op(field, "$gt", value.clone())?,
        Filter::Gte { field, value } => field_op(field, "$gte", value.clone())?,
        Filter::Lt { field, value } => field_op(field, "$lt", value.clone())?,
        Filter::Lte { field, value } => field_op(field, "$lte", value.clone())?,
        Filter::In { field, values } => field_op(field, "$in", Value::Array(values.clone()))?,
        Filter::Nin { field, values } => field_op(field, "$nin", Value::Array(values.clone()))?,
        Filter::Exists { field, exists } => field_op(field, "$exists", Value::Bool(*exists))?,
        Filter::ElemMatch { field, filter } => {
            field_op(field, "$elemMatch", translate_value(filter)?)?
        }
        Filter::And { filters } => logical("$and", filters)?,
        Filter::Or { filters } => logical("$or", filters)?,
        Filter::Nor { filters } => logical("$nor", filters)?,
    };
    Ok(expr)
}

fn field_op(field: &str, op: &str, operand: Value) -> LiveResult<Value> {
    validate_field(field)?;
    let mut inner = Map::new();
    inner.insert(op.to_string(), operand);
    let mut outer = Map::new();
    outer.insert(field.to_string(), Value::Object(inner));
    Ok(Value::Object(outer))
}

fn logical(op: &str, filters: &[Filter]) -> LiveResult<Value> {
    if filters.is_empty() {
        return Err(LiveError::invalid_filter(format!("{} requires at least one filter", op)));
    }
    let operands = filters.iter().map(translate_value).collect::<LiveResult<Vec<_>>>()?;
    let mut expr = Map::new();
    expr.insert(op.to_string(), Value::Array(operands));
    Ok(Value::Object(expr))
}

fn validate_field(field: &str) -> LiveResult<()> {
    if field.is_empty() {
        return Err(LiveError::invalid_filter("empty field name"));
    }
    if field.starts_with('$') {
        return Err(LiveError::invalid_filter(format!("field name cannot start with '$': {}", field)));
    }
    if field.split('.').any(str::is_empty) {
        return Err(LiveError::invalid_filter(format!("malformed field path: {}", field)));
    }
    Ok(())
}

/// Prefix every field reference in a native filter with `prefix`.
///
/// Field references are the non-operator keys at every level reachable
/// through `$and` / `$or` / `$nor`. Operator keys are kept as-is, and
/// `$elemMatch` bodies stay element-relative.
pub fn prefix_fields(filter: &NativeFilter, prefix: &str) -> NativeFilter {
    NativeFilter(prefix_value(&filter.0, prefix))
}

fn prefix_value(expr: &Value, prefix: &str) -> Value {
    let Value::Object(map) = expr else {
        return expr.clone();
    };

    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        if LOGICAL_OPERATORS.contains(&key.as_str()) {
            let operands = match value {
                Value::Array(items) => {
                    Value::Array(items.iter().map(|item| prefix_value(item, prefix)).collect())
                }
                other => prefix_value(other, prefix),
            };
            out.insert(key.clone(), operands);
        } else if key.starts_with('$') {
            out.insert(key.clone(), value.clone());
        } else {
            out.insert(format!("{}{}", prefix, key), value.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_translate_eq() {
        let native = translate(&Filter::eq("status", "published")).unwrap();
        assert_eq!(native.as_value(), &json!({"status": {"$eq": "published"}}));
    }

    #[test]
    fn test_translate_all_is_empty() {
        let native = translate(&Filter::All).unwrap();
        assert!(native.is_match_all());
    }

    #[test]
    fn test_translate_nested_logical() {
        let filter = Filter::and(vec![
            Filter::gte("age", 18),
            Filter::or(vec![Filter::eq("role", "admin"), Filter::in_list("team", vec![json!("a")])]),
        ]);
        let native = translate(&filter).unwrap();
        assert_eq!(
            native.as_value(),
            &json!({"$and": [
                {"age": {"$gte": 18}},
                {"$or": [{"role": {"$eq": "admin"}}, {"team": {"$in": ["a"]}}]}
            ]})
        );
    }

    #[test]
    fn test_translate_rejects_bad_fields() {
        assert!(translate(&Filter::eq("", 1)).is_err());
        assert!(translate(&Filter::eq("$where", 1)).is_err());
        assert!(translate(&Filter::eq("a..b", 1)).is_err());
        assert!(translate(&Filter::and(vec![])).is_err());
    }

    #[test]
    fn test_prefix_top_level() {
        let native = translate(&Filter::eq("status", "x")).unwrap();
        let prefixed = prefix_fields(&native, "fullDocument.");
        assert_eq!(prefixed.as_value(), &json!({"fullDocument.status": {"$eq": "x"}}));
    }

    #[test]
    fn test_prefix_recurses_into_logical_arrays() {
        let filter = Filter::or(vec![
            Filter::eq("a", 1),
            Filter::and(vec![Filter::eq("b.c", 2), Filter::nor(vec![Filter::exists("d", true)])]),
        ]);
        let prefixed = prefix_fields(&translate(&filter).unwrap(), "fullDocument.");
        assert_eq!(
            prefixed.as_value(),
            &json!({"$or": [
                {"fullDocument.a": {"$eq": 1}},
                {"$and": [
                    {"fullDocument.b.c": {"$eq": 2}},
                    {"$nor": [{"fullDocument.d": {"$exists": true}}]}
                ]}
            ]})
        );
    }

    #[test]
    fn test_prefix_leaves_elem_match_relative() {
        let filter = Filter::elem_match("items", Filter::gt("qty", 5));
        let prefixed = prefix_fields(&translate(&filter).unwrap(), "fullDocument.");
        assert_eq!(
            prefixed.as_value(),
            &json!({"fullDocument.items": {"$elemMatch": {"qty": {"$gt": 5}}}})
        );
    }

    #[test]
    fn test_prefix_does_not_touch_values() {
        let filter = Filter::eq("address", json!({"city": "Oslo"}));
        let prefixed = prefix_fields(&translate(&filter).unwrap(), "p.");
        assert_eq!(prefixed.as_value(), &json!({"p.address": {"$eq": {"city": "Oslo"}}}));
    }

    #[test]
    fn test_filter_deserializes_from_tagged_json() {
        let filter: Filter =
            serde_json::from_value(json!({"op": "eq", "field": "status", "value": "open"})).unwrap();
        assert_eq!(filter, Filter::eq("status", "open"));
    }
}
