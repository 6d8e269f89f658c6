//! Builds the initial, un-optimized physical plan from a query's AST
//! (spec.md §4.2).
//!
//! Grounded on `execution_plan.c::NewExecutionPlan`'s entry-node loop: one
//! scan-rooted chain is built per pattern-graph entry node (in-degree 0),
//! following the first outgoing edge at each step; the chains are then
//! gathered under a single naive `Filter` (if a WHERE clause or a
//! property predicate exists), an optional `Aggregate`, and the
//! `ProduceResults` root. The later passes in `optimizer.rs` push that
//! naive filter down, attach label scans, and close expansion cycles.

use crate::ast::{
    collect_variables, expr_contains_aggregation, Clause, Expr, LimitClause, Literal,
    MatchClause, OrderByClause, Query, ReturnClause, SkipClause,
};
use crate::error::{PlannerError, Result};
use crate::operators::{
    AggregateOp, AggregateOpState, AllNodeScanOp, ExpandAllOp, FilterOp, NodeByLabelScanOp,
    Operator, ProduceResultsOp,
};
use crate::pattern_graph::{EdgeHandle, NodeHandle, PatternGraph};
use crate::plan::{Plan, PlanNodeId};
use hashbrown::HashSet;
use indexmap::IndexMap;

/// Builds a [`Plan`] and the [`PatternGraph`] it was built from (the
/// optimizer needs the pattern graph again for the merge-closure pass).
pub struct PlanBuilder;

impl PlanBuilder {
    /// Build the initial plan for `query`.
    #[tracing::instrument(skip_all)]
    pub fn build(query: &Query) -> Result<(Plan, PatternGraph)> {
        let match_clause = first_match(query)?;
        let pattern_graph = PatternGraph::build(match_clause)?;
        let mut plan = Plan::new();

        let mut entries = pattern_graph.entities_by_in_degree(0);
        entries.sort_by_key(|h| h.0);
        // A genuinely empty MATCH (no paths at all) has no entry points and
        // is not an error: it plans to a bare `ProduceResults` with no
        // children (spec.md §8 boundary behaviors). Only a *non-empty*
        // pattern with no in-degree-0 node — a pure cycle — is rejected.
        if entries.is_empty() && pattern_graph.node_count() > 0 {
            return Err(PlannerError::PlanningError(
                "pattern has no entry point (every node has an incoming edge)".into(),
            ));
        }

        let known = known_aliases(&pattern_graph);
        if let Some(where_clause) = first_where(query) {
            validate_references(&where_clause.predicate, &known, "WHERE")?;
        }
        let return_clause = first_return(query)?;
        for item in &return_clause.items {
            validate_references(&item.expr, &known, "RETURN")?;
        }

        let mut conjuncts = Vec::new();
        let mut current_children: Vec<PlanNodeId> = entries
            .iter()
            .map(|&entry| build_chain(&mut plan, &pattern_graph, entry, &mut conjuncts))
            .collect();

        if let Some(where_clause) = first_where(query) {
            conjuncts.push(where_clause.predicate.clone());
        }
        if let Some(predicate) = conjuncts
            .into_iter()
            .reduce(|acc, e| Expr::Binary {
                left: Box::new(acc),
                op: crate::ast::BinaryOp::And,
                right: Box::new(e),
            })
        {
            let filter_id = plan.add_node(Operator::Filter(FilterOp::new(predicate)));
            for &c in &current_children {
                plan.add_child(filter_id, c);
            }
            current_children = vec![filter_id];
        }

        let items = build_projection(&mut plan, &mut current_children, return_clause)?;
        let order_by = order_by_items(query);
        let limit = first_limit(query).map(|l| l.count);
        let skip = first_skip(query).map(|s| s.count);

        let root_id = plan.add_node(Operator::ProduceResults(ProduceResultsOp::new(
            items,
            return_clause.distinct,
            order_by,
            limit,
            skip,
        )));
        for &c in &current_children {
            plan.add_child(root_id, c);
        }
        plan.root = Some(root_id);

        Ok((plan, pattern_graph))
    }
}

fn first_match(query: &Query) -> Result<&MatchClause> {
    query
        .clauses
        .iter()
        .find_map(|c| match c {
            Clause::Match(m) => Some(m),
            _ => None,
        })
        .ok_or_else(|| PlannerError::PlanningError("query has no MATCH clause".into()))
}

fn first_where(query: &Query) -> Option<&crate::ast::WhereClause> {
    query.clauses.iter().find_map(|c| match c {
        Clause::Where(w) => Some(w),
        _ => None,
    })
}

fn first_return(query: &Query) -> Result<&ReturnClause> {
    query
        .clauses
        .iter()
        .find_map(|c| match c {
            Clause::Return(r) => Some(r),
            _ => None,
        })
        .ok_or_else(|| PlannerError::PlanningError("query has no RETURN clause".into()))
}

fn first_order_by(query: &Query) -> Option<&OrderByClause> {
    query.clauses.iter().find_map(|c| match c {
        Clause::OrderBy(o) => Some(o),
        _ => None,
    })
}

fn first_limit(query: &Query) -> Option<&LimitClause> {
    query.clauses.iter().find_map(|c| match c {
        Clause::Limit(l) => Some(l),
        _ => None,
    })
}

fn first_skip(query: &Query) -> Option<&SkipClause> {
    query.clauses.iter().find_map(|c| match c {
        Clause::Skip(s) => Some(s),
        _ => None,
    })
}

fn order_by_items(query: &Query) -> Vec<(Expr, bool)> {
    first_order_by(query)
        .map(|o| o.items.iter().map(|i| (i.expr.clone(), i.ascending)).collect())
        .unwrap_or_default()
}

/// Every alias a `MATCH` pattern binds: node aliases and named edge
/// aliases. `WHERE`/`RETURN` may reference only these (spec.md §7: an
/// unbound alias is a plan-construction error surfaced synchronously).
fn known_aliases(graph: &PatternGraph) -> HashSet<String> {
    let mut set = HashSet::new();
    for i in 0..graph.node_count() {
        set.insert(graph.node(NodeHandle(i)).alias.clone());
    }
    for i in 0..graph.edge_count() {
        if let Some(alias) = &graph.edge(EdgeHandle(i)).alias {
            set.insert(alias.clone());
        }
    }
    set
}

fn validate_references(expr: &Expr, known: &HashSet<String>, clause: &str) -> Result<()> {
    let mut vars = Vec::new();
    collect_variables(expr, &mut vars);
    for v in vars {
        if !known.contains(&v) {
            return Err(PlannerError::PlanningError(format!(
                "{clause} references unbound alias `{v}`"
            )));
        }
    }
    Ok(())
}

fn properties_to_conjuncts(var: &str, properties: &IndexMap<String, Expr>) -> Vec<Expr> {
    properties
        .iter()
        .map(|(prop, value)| Expr::Binary {
            left: Box::new(Expr::Property {
                expr: Box::new(Expr::Variable(var.to_string())),
                name: prop.clone(),
            }),
            op: crate::ast::BinaryOp::Eq,
            right: Box::new(value.clone()),
        })
        .collect()
}

/// Build one scan-rooted expansion chain starting at `entry`, appending
/// any property-pattern predicates encountered along the way to
/// `conjuncts` (spec.md §4.2).
fn build_chain(
    plan: &mut Plan,
    graph: &PatternGraph,
    entry: NodeHandle,
    conjuncts: &mut Vec<Expr>,
) -> PlanNodeId {
    let entry_node = graph.node(entry);
    conjuncts.extend(properties_to_conjuncts(&entry_node.alias, &entry_node.properties));

    let scan = match &entry_node.label {
        Some(label) => Operator::NodeByLabelScan(NodeByLabelScanOp::new(
            entry_node.alias.clone(),
            label.clone(),
            entry,
        )),
        None => Operator::AllNodeScan(AllNodeScanOp::new(entry_node.alias.clone(), entry)),
    };
    let mut current = plan.add_node(scan);
    let mut node = entry;
    // Tracks nodes already bound by this chain so the walk stops at a
    // closing edge instead of re-following a node's outgoing edges
    // forever. The edge into an already-visited node is still emitted —
    // `optimizer::close_expansion_cycles` rewrites it into an
    // `ExpandInto` containment check — the walk just doesn't continue
    // past it (spec.md §4.4, §9).
    let mut visited = std::collections::HashSet::new();
    visited.insert(entry);

    while let Some(edge_handle) = graph.first_outgoing(node) {
        let edge = graph.edge(edge_handle);
        let dest = edge.dst;
        let dest_node = graph.node(dest);
        let from_var = graph.node(edge.src).alias.clone();
        let to_var = dest_node.alias.clone();

        if let Some(edge_alias) = &edge.alias {
            conjuncts.extend(properties_to_conjuncts(edge_alias, &edge.properties));
        }
        conjuncts.extend(properties_to_conjuncts(&to_var, &dest_node.properties));

        let expand = Operator::ExpandAll(ExpandAllOp::new(
            edge.src,
            edge_handle,
            dest,
            from_var,
            edge.alias.clone(),
            to_var,
            edge.rel_type.clone(),
        ));
        let expand_id = plan.add_node(expand);
        plan.add_child(expand_id, current);
        current = expand_id;

        if !visited.insert(dest) {
            break;
        }
        node = dest;
    }

    current
}

fn expr_to_name(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name) => name.clone(),
        Expr::Property { name, .. } => name.clone(),
        Expr::FunctionCall { name, .. } => name.clone(),
        _ => "_col".to_string(),
    }
}

fn extract_aggregate(expr: &Expr) -> Result<(AggregateOp, Expr)> {
    let Expr::FunctionCall { name, args } = expr else {
        return Err(PlannerError::PlanningError(
            "aggregation detected outside a function call".into(),
        ));
    };
    let op = match name.to_lowercase().as_str() {
        "count" => AggregateOp::Count,
        "sum" => AggregateOp::Sum,
        "avg" => AggregateOp::Avg,
        "min" => AggregateOp::Min,
        "max" => AggregateOp::Max,
        other => {
            return Err(PlannerError::PlanningError(format!(
                "unsupported aggregate function: {other}"
            )))
        }
    };
    let arg = args
        .first()
        .cloned()
        .unwrap_or(Expr::Literal(Literal::Integer(0)));
    Ok((op, arg))
}

/// Wraps `current_children` in an `Aggregate` node when the RETURN clause
/// calls for one (spec.md §4.2), and produces the RETURN-item list the
/// root `ProduceResults` should project.
///
/// Only a single aggregate item with no GROUP BY key is supported — the
/// full aggregation evaluator is an out-of-scope external collaborator
/// (spec.md §1); see DESIGN.md.
fn build_projection(
    plan: &mut Plan,
    current_children: &mut Vec<PlanNodeId>,
    return_clause: &ReturnClause,
) -> Result<Vec<(Expr, String)>> {
    let aggregate_item = return_clause
        .items
        .iter()
        .find(|item| expr_contains_aggregation(&item.expr));

    let Some(aggregate_item) = aggregate_item else {
        return Ok(return_clause
            .items
            .iter()
            .map(|item| {
                let alias = item.alias.clone().unwrap_or_else(|| expr_to_name(&item.expr));
                (item.expr.clone(), alias)
            })
            .collect());
    };

    let (op, arg) = extract_aggregate(&aggregate_item.expr)?;
    let output_alias = aggregate_item
        .alias
        .clone()
        .unwrap_or_else(|| expr_to_name(&aggregate_item.expr));

    let agg_id = plan.add_node(Operator::Aggregate(AggregateOpState::new(
        op,
        arg,
        output_alias.clone(),
    )));
    for &c in current_children.iter() {
        plan.add_child(agg_id, c);
    }
    *current_children = vec![agg_id];

    Ok(return_clause
        .items
        .iter()
        .map(|item| {
            let alias = item.alias.clone().unwrap_or_else(|| expr_to_name(&item.expr));
            if expr_contains_aggregation(&item.expr) {
                (Expr::Variable(output_alias.clone()), alias)
            } else {
                (item.expr.clone(), alias)
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::OperatorType;
    use crate::parser::QueryParser;

    fn build(query: &str) -> Plan {
        let ast = QueryParser::new().parse(query).unwrap();
        PlanBuilder::build(&ast).unwrap().0
    }

    #[test]
    fn simple_match_produces_scan_under_results() {
        let plan = build("MATCH (n:Person) RETURN n");
        let root = plan.root.unwrap();
        assert_eq!(plan.node(root).operator.type_tag(), OperatorType::ProduceResults);
        let child = plan.children_of(root)[0];
        assert_eq!(plan.node(child).operator.type_tag(), OperatorType::NodeByLabelScan);
    }

    #[test]
    fn chain_nests_expand_over_scan() {
        let plan = build("MATCH (a:Person)-[:KNOWS]->(b) RETURN a, b");
        let root = plan.root.unwrap();
        let filter_or_expand = plan.children_of(root)[0];
        assert_eq!(
            plan.node(filter_or_expand).operator.type_tag(),
            OperatorType::ExpandAll
        );
    }

    #[test]
    fn where_clause_attaches_a_naive_filter_at_the_top() {
        let plan = build("MATCH (n:Person) WHERE n.age > 25 RETURN n");
        let root = plan.root.unwrap();
        let below_root = plan.children_of(root)[0];
        assert_eq!(plan.node(below_root).operator.type_tag(), OperatorType::Filter);
    }

    #[test]
    fn aggregate_return_item_inserts_aggregate_node() {
        let plan = build("MATCH (a)-[:R]->(b) RETURN count(b)");
        let root = plan.root.unwrap();
        let below_root = plan.children_of(root)[0];
        assert_eq!(plan.node(below_root).operator.type_tag(), OperatorType::Aggregate);
    }

    #[test]
    fn disconnected_subpatterns_become_multiple_children() {
        let plan = build("MATCH (a),(b) RETURN a, b");
        let root = plan.root.unwrap();
        assert_eq!(plan.children_of(root).len(), 2);
    }
}
