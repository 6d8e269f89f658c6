//! The pull-based execution pipeline (spec.md §4.6, §5).
//!
//! Grounded on `execution_plan.c`'s `OpBase_Consume`/reset cycle: each
//! node's `consume` call pulls from its children on demand rather than
//! the plan being driven top-down in one pass. The one place this
//! diverges from a literal per-child left-to-right reading of that cycle
//! is `pull_from_children`'s scan order, below.

use crate::error::{PlannerError, Result};
use crate::operators::{ConsumeResult, ExecCtx};
use crate::plan::{Plan, PlanNodeId};
use crate::store::GraphStore;
use crate::value::ResultSet;

/// Runtime tunables for a single execution (spec.md §6's ambient config
/// surface, mirroring `OptimizerConfig`'s shape).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    /// Safety valve against a malformed plan looping forever: the
    /// maximum number of root `consume` calls before execution aborts
    /// with an error instead of hanging.
    pub max_pulls: Option<u64>,
}

/// Drives a built, optimized [`Plan`] to completion and returns its
/// [`ResultSet`].
#[derive(Debug, Default)]
pub struct Executor;

impl Executor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Pull the root operator until depleted, then read back the
    /// [`ResultSet`] the root `ProduceResults` operator accumulated.
    #[tracing::instrument(skip_all)]
    pub fn execute(
        &self,
        plan: &mut Plan,
        store: &dyn GraphStore,
        pattern_graph: &crate::pattern_graph::PatternGraph,
        config: &ExecutorConfig,
    ) -> Result<ResultSet> {
        let Some(root) = plan.root else {
            return Err(PlannerError::ExecutionError("plan has no root".into()));
        };
        let ctx = ExecCtx { pattern_graph, store };

        let mut pulls: u64 = 0;
        loop {
            if let Some(max) = config.max_pulls {
                if pulls >= max {
                    return Err(PlannerError::ExecutionError(format!(
                        "execution aborted after {max} pulls"
                    )));
                }
            }
            pulls += 1;
            match consume_op(plan, &ctx, root)? {
                ConsumeResult::Ok => continue,
                ConsumeResult::Depleted => break,
                ConsumeResult::Refresh => {
                    return Err(PlannerError::ExecutionError(
                        "root operator refreshed instead of yielding or depleting".into(),
                    ))
                }
            }
        }

        match &plan.node(root).operator {
            crate::operators::Operator::ProduceResults(op) => Ok(op.resultset.clone()),
            crate::operators::Operator::Aggregate(_) => {
                Err(PlannerError::ExecutionError(
                    "plan root is not ProduceResults".into(),
                ))
            }
            _ => Err(PlannerError::ExecutionError(
                "plan root is not ProduceResults".into(),
            )),
        }
    }
}

/// Drive one node's stream forward by one tuple.
///
/// A node with children is pre-pulled once before its very first
/// `consume` call: `FilterOp`, `AggregateOpState`, and `ProduceResultsOp`
/// all merge whatever rows are currently sitting in `children` the
/// moment they're asked to produce, so they need at least one real child
/// row in hand before that first call, not the default empty row a
/// freshly-built plan starts with. A merge-based operator with zero
/// children (the bare `ProduceResults` an empty MATCH plans to) is
/// depleted immediately instead: there is no child row to merge, real or
/// default, and `merge_rows(&[])` would otherwise manufacture one.
fn consume_op(plan: &mut Plan, ctx: &ExecCtx<'_>, id: PlanNodeId) -> Result<ConsumeResult> {
    let has_children = !plan.children_of(id).is_empty();
    if !has_children && plan.node(id).operator.requires_children() {
        plan.node_mut(id).state = crate::operators::StreamState::Depleted;
        return Ok(ConsumeResult::Depleted);
    }
    let uninitialized = plan.node(id).state == crate::operators::StreamState::Uninitialized;
    if has_children && uninitialized {
        match pull_from_children(plan, ctx, id)? {
            ConsumeResult::Depleted => {
                plan.node_mut(id).state = crate::operators::StreamState::Depleted;
                return Ok(ConsumeResult::Depleted);
            }
            ConsumeResult::Ok => {}
            other => return Err(execution_err(other)),
        }
    }

    loop {
        let child_rows: Vec<crate::value::Row> = plan
            .children_of(id)
            .iter()
            .map(|&c| plan.node(c).current_row.clone())
            .collect();

        let (result, row) = plan.node_mut(id).operator.consume(ctx, &child_rows);
        match result {
            ConsumeResult::Ok => {
                plan.node_mut(id).current_row = row;
                plan.node_mut(id).state = crate::operators::StreamState::Consuming;
                return Ok(ConsumeResult::Ok);
            }
            ConsumeResult::Err(e) => return Err(PlannerError::ExecutionError(e)),
            ConsumeResult::Refresh => {
                plan.reset(id);
                match pull_from_children(plan, ctx, id)? {
                    ConsumeResult::Ok => continue,
                    ConsumeResult::Depleted => {
                        if plan.node(id).operator.requires_full_drain() {
                            plan.node_mut(id).operator.finish_drain();
                            continue;
                        }
                        plan.node_mut(id).state = crate::operators::StreamState::Depleted;
                        return Ok(ConsumeResult::Depleted);
                    }
                    other => return Err(execution_err(other)),
                }
            }
            ConsumeResult::Depleted => {
                plan.node_mut(id).state = crate::operators::StreamState::Depleted;
                return Ok(ConsumeResult::Depleted);
            }
        }
    }
}

fn execution_err(result: ConsumeResult) -> PlannerError {
    match result {
        ConsumeResult::Err(e) => PlannerError::ExecutionError(e),
        other => PlannerError::ExecutionError(format!("unexpected consume result: {other:?}")),
    }
}

/// Advance exactly one child of `id` and report whether any child still
/// has tuples left.
///
/// Children are scanned from rightmost to leftmost to find the one that
/// advances. This is the nested-loop join's inner-cursor: with two
/// children, the rightmost one ticks fastest, producing the canonical
/// `(left, right)` enumeration order — `(1,1),(1,2),(2,1),(2,2)` for two
/// two-element streams — rather than the reverse. Once a child to the
/// right of the advancing one is found still exhausted from the last
/// round, it is reset and re-pulled so its cursor starts over under the
/// newly advanced left sibling.
fn pull_from_children(plan: &mut Plan, ctx: &ExecCtx<'_>, id: PlanNodeId) -> Result<ConsumeResult> {
    let children = plan.children_of(id).to_vec();
    if children.is_empty() {
        return Ok(ConsumeResult::Depleted);
    }

    let mut advanced_idx = None;
    for (i, &child) in children.iter().enumerate().rev() {
        match consume_op(plan, ctx, child)? {
            ConsumeResult::Ok => {
                advanced_idx = Some(i);
                break;
            }
            ConsumeResult::Depleted => continue,
            other => return Err(execution_err(other)),
        }
    }

    let Some(advanced_idx) = advanced_idx else {
        return Ok(ConsumeResult::Depleted);
    };

    for &child in &children[advanced_idx + 1..] {
        plan.node_mut(child).state = crate::operators::StreamState::Uninitialized;
        match consume_op(plan, ctx, child)? {
            ConsumeResult::Ok => {}
            ConsumeResult::Depleted => return Ok(ConsumeResult::Depleted),
            other => return Err(execution_err(other)),
        }
    }

    for &child in &children[..advanced_idx] {
        if plan.node(child).state == crate::operators::StreamState::Uninitialized {
            match consume_op(plan, ctx, child)? {
                ConsumeResult::Ok => {}
                ConsumeResult::Depleted => return Ok(ConsumeResult::Depleted),
                other => return Err(execution_err(other)),
            }
        }
    }

    Ok(ConsumeResult::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;
    use crate::planner::PlanBuilder;
    use crate::store::InMemoryGraphStore;
    use crate::value::{NodeValue, Value};

    fn node(id: u64, label: &str) -> NodeValue {
        let mut properties = indexmap::IndexMap::new();
        properties.insert("id".to_string(), Value::Int(id as i64));
        NodeValue {
            id,
            labels: smallvec::smallvec![label.to_string()],
            properties,
        }
    }

    #[test]
    fn scans_every_node_once() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(1, "Person"));
        store.add_node(node(2, "Person"));
        store.add_node(node(3, "Person"));

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (n) RETURN n")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let result = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn disconnected_subpatterns_produce_a_cross_product_in_order() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(1, "A"));
        store.add_node(node(2, "A"));

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (a:A),(b:A) RETURN a.id AS aid, b.id AS bid")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let result = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();

        let pairs: Vec<(i64, i64)> = result
            .rows
            .iter()
            .map(|row| {
                let a = match row.get("aid") {
                    Some(Value::Int(i)) => *i,
                    _ => panic!("expected int"),
                };
                let b = match row.get("bid") {
                    Some(Value::Int(i)) => *i,
                    _ => panic!("expected int"),
                };
                (a, b)
            })
            .collect();
        assert_eq!(pairs, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }

    #[test]
    fn expand_all_follows_outgoing_edges() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(1, "Person"));
        store.add_node(node(2, "Person"));
        store.add_edge(crate::value::EdgeValue {
            id: 1,
            rel_type: "KNOWS".to_string(),
            source: 1,
            target: 2,
            properties: indexmap::IndexMap::new(),
        });

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (a:Person)-[:KNOWS]->(b) RETURN b")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let result = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].node_id("b"), Some(2));
    }

    #[test]
    fn count_aggregate_returns_a_single_row() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(1, "Person"));
        store.add_node(node(2, "Person"));

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (a) RETURN count(a)")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let result = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("count"), Some(&Value::Int(2)));
    }

    #[test]
    fn order_by_limit_skip_are_honored_in_one_pass() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(3, "N"));
        store.add_node(node(1, "N"));
        store.add_node(node(2, "N"));

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (n:N) RETURN n.id AS nid ORDER BY n.id ASC SKIP 1 LIMIT 1")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let result = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].get("nid"), Some(&Value::Int(2)));
    }

    #[test]
    fn unbound_alias_in_return_is_rejected_at_plan_time() {
        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (a) RETURN b")
            .unwrap();
        assert!(PlanBuilder::build(&ast).is_err());
    }

    #[test]
    fn reset_then_replay_produces_the_same_rows_twice() {
        let mut store = InMemoryGraphStore::new();
        store.add_node(node(1, "N"));
        store.add_node(node(2, "N"));

        let ast = crate::parser::QueryParser::new()
            .parse("MATCH (n:N) RETURN n")
            .unwrap();
        let (mut plan, graph) = PlanBuilder::build(&ast).unwrap();
        crate::optimizer::optimize(&mut plan, &store, &Default::default());

        let first = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();

        let root = plan.root.unwrap();
        reset_stream(&mut plan, root);
        if let Operator::ProduceResults(op) = &mut plan.node_mut(root).operator {
            op.resultset.rows.clear();
        }

        let second = Executor::new()
            .execute(&mut plan, &store, &graph, &ExecutorConfig::default())
            .unwrap();
        assert_eq!(first.rows.len(), second.rows.len());
    }

    fn reset_stream(plan: &mut Plan, id: PlanNodeId) {
        plan.reset(id);
        for &c in plan.children_of(id).to_vec().iter() {
            reset_stream(plan, c);
        }
    }
}
