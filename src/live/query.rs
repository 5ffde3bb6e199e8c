//! # Query Context
//!
//! Sorting, paging and the running total for one live query. Sorting and
//! paging are fixed for the lifetime of a subscription; changing either
//! means opening a new subscription.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    /// Field to sort on (dotted paths allowed)
    pub field: String,
    /// Direction
    pub direction: SortDirection,
}

impl Sorting {
    /// Ascending sort on `field`
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort on `field`
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Extract this sort's key from a document
    pub fn key_of<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        lookup_path(document, &self.field)
    }

    /// Compare two documents under this sort
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        self.compare_keys(self.key_of(a), self.key_of(b))
    }

    /// Compare two already-extracted sort keys under this sort
    pub fn compare_keys(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let ordering = compare_values(a, b);
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Paging specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    /// Documents to skip before the page starts
    pub skip: usize,
    /// Page size
    pub size: usize,
}

impl Paging {
    /// Page `page` (zero-based) of `size` documents
    pub fn page(page: usize, size: usize) -> Self {
        Self {
            skip: page.saturating_mul(size),
            size,
        }
    }
}

/// Mutable state describing one live query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    sorting: Option<Sorting>,
    paging: Option<Paging>,
    total_items: u64,
}

impl QueryContext {
    /// Create a context; `total_items` starts at zero until the snapshot runs
    pub fn new(sorting: Option<Sorting>, paging: Option<Paging>) -> Self {
        Self {
            sorting,
            paging,
            total_items: 0,
        }
    }

    /// Unsorted, unpaged context
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn sorting(&self) -> Option<&Sorting> {
        self.sorting.as_ref()
    }

    pub fn paging(&self) -> Option<Paging> {
        self.paging
    }

    /// Total number of matching documents, ignoring paging
    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    pub(crate) fn set_total_items(&mut self, total: u64) {
        self.total_items = total;
    }

    pub(crate) fn increment_total(&mut self) {
        self.total_items += 1;
    }

    /// Never drops below zero
    pub(crate) fn decrement_total(&mut self) {
        self.total_items = self.total_items.saturating_sub(1);
    }
}

/// Resolve a dotted path (`address.city`) inside a document
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Total order over JSON values used for sorting and range comparisons.
///
/// Ordering rules:
/// - missing < null < bool < number < string < array < object
/// - For same types, natural ordering; arrays compare element-wise,
///   objects by serialized form
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let type_order = |v: &Value| -> u8 {
                match v {
                    Value::Null => 0,
                    Value::Bool(_) => 1,
                    Value::Number(_) => 2,
                    Value::String(_) => 3,
                    Value::Array(_) => 4,
                    Value::Object(_) => 5,
                }
            };

            let a_type = type_order(a_val);
            let b_type = type_order(b_val);
            if a_type != b_type {
                return a_type.cmp(&b_type);
            }

            match (a_val, b_val) {
                (Value::Null, Value::Null) => Ordering::Equal,
                (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
                (Value::Number(x), Value::Number(y)) => {
                    if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                        return xi.cmp(&yi);
                    }
                    let xf = x.as_f64().unwrap_or(0.0);
                    let yf = y.as_f64().unwrap_or(0.0);
                    xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
                }
                (Value::String(x), Value::String(y)) => x.cmp(y),
                (Value::Array(x), Value::Array(y)) => {
                    for (xe, ye) in x.iter().zip(y.iter()) {
                        let ord = compare_values(Some(xe), Some(ye));
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    x.len().cmp(&y.len())
                }
                _ => a_val.to_string().cmp(&b_val.to_string()),
            }
        }
    }
}
