//! Scalar and binding value types flowing through the pipeline.
//!
//! Reconstructed from the teacher crate's `lib.rs` re-exports
//! (`NodeValue`, `EdgeValue`) and `benches/query_benchmarks.rs` (`Value`,
//! `Row`), since the defining `executor.rs` was not part of the retrieved
//! pack.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// `SIValue` — a tagged scalar union (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Node(NodeValue),
    Edge(EdgeValue),
}

impl Value {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

/// Total order over `Value` for `ORDER BY` (spec.md §6: ORDER is honored
/// opaquely by `ProduceResults`). Nulls sort first, matching the common
/// convention the teacher's sibling pack repos use for orderable scalars.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    if let (Some(af), Some(bf)) = (a.as_f64(), b.as_f64()) {
        return af.partial_cmp(&bf).unwrap_or(Ordering::Equal);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Node value representation for query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    pub id: u64,
    pub labels: SmallVec<[String; 2]>,
    pub properties: IndexMap<String, Value>,
}

/// Edge value representation for query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeValue {
    pub id: u64,
    pub rel_type: String,
    pub source: u64,
    pub target: u64,
    pub properties: IndexMap<String, Value>,
}

/// One tuple of bindings flowing through the pipeline: a mapping from
/// query alias to bound value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    pub bindings: IndexMap<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, alias: impl Into<String>, value: Value) {
        self.bindings.insert(alias.into(), value);
    }

    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.bindings.get(alias)
    }

    /// The node id bound to `alias`, if any and if it is a node.
    #[must_use]
    pub fn node_id(&self, alias: &str) -> Option<u64> {
        match self.bindings.get(alias) {
            Some(Value::Node(n)) => Some(n.id),
            _ => None,
        }
    }
}

/// An ordered sequence of result rows, owned by the root `ProduceResults`
/// operator once execution completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_values_orders_numerics_across_int_and_float() {
        assert_eq!(compare_values(&Value::Int(1), &Value::Float(1.5)), std::cmp::Ordering::Less);
    }

    #[test]
    fn compare_values_sorts_null_first() {
        assert_eq!(compare_values(&Value::Null, &Value::Int(0)), std::cmp::Ordering::Less);
    }

    #[test]
    fn row_bind_overwrites_existing_alias() {
        let mut row = Row::new();
        row.bind("a", Value::Int(1));
        row.bind("a", Value::Int(2));
        assert_eq!(row.get("a"), Some(&Value::Int(2)));
    }
}
