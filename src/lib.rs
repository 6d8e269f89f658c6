//! Query execution planner and pull-based pipeline engine for a
//! property-graph store: parses a trimmed pattern-matching query
//! language, builds a physical plan over a pattern graph, optimizes it,
//! and drives it to a [`value::ResultSet`] against any [`store::GraphStore`].

pub mod ast;
pub mod error;
pub mod executor;
pub mod filter_tree;
pub mod operators;
pub mod optimizer;
pub mod parser;
pub mod pattern_graph;
pub mod plan;
pub mod planner;
pub mod store;
pub mod value;

pub use error::{PlannerError, Result};
pub use executor::{Executor, ExecutorConfig};
pub use optimizer::{optimize, OptimizerConfig};
pub use parser::QueryParser;
pub use planner::PlanBuilder;
pub use plan::Plan;
pub use store::GraphStore;
pub use value::ResultSet;

/// Parse, plan, optimize, and execute `query` against `store` in one
/// call — the common case for callers that don't need the intermediate
/// plan (e.g. for `EXPLAIN`-style printing).
#[tracing::instrument(skip(store))]
pub fn run_query(query: &str, store: &dyn GraphStore) -> Result<ResultSet> {
    let ast = QueryParser::new().parse(query)?;
    let (mut plan, pattern_graph) = PlanBuilder::build(&ast)?;
    optimize(&mut plan, store, &OptimizerConfig::default());
    Executor::new().execute(&mut plan, store, &pattern_graph, &ExecutorConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::value::{NodeValue, Value};
    use indexmap::IndexMap;

    #[test]
    fn run_query_parses_plans_and_executes_end_to_end() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(NodeValue {
            id: 1,
            labels: smallvec::smallvec!["Person".to_string()],
            properties: IndexMap::new(),
        });
        let result = run_query("MATCH (n:Person) RETURN n", &store).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert!(matches!(result.rows[0].get("n"), Some(Value::Node(_))));
    }
}
