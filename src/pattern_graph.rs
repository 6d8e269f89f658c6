//! In-memory representation of a MATCH pattern (spec.md §3, §4.1).
//!
//! A directed multigraph where each node carries an alias, an optional
//! label, and property predicates; each edge carries an optional
//! relationship type and alias. Built once from the AST and then shared
//! read-only by every operator in the plan.

use crate::ast::{Direction, Expr, MatchClause, PathElement, PathPattern};
use crate::error::{PlannerError, Result};
use hashbrown::HashMap;
use indexmap::IndexMap;

/// Stable handle into a `PatternGraph`'s node table. Equality is by
/// index, never by pointer identity (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub usize);

/// Stable handle into a `PatternGraph`'s edge table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeHandle(pub usize);

/// A node in the pattern graph.
#[derive(Debug, Clone)]
pub struct PatternNode {
    pub alias: String,
    pub label: Option<String>,
    pub properties: IndexMap<String, Expr>,
}

/// A directed edge in the pattern graph, oriented per the original
/// pattern direction after normalization (spec.md §3).
#[derive(Debug, Clone)]
pub struct PatternEdge {
    pub alias: Option<String>,
    pub rel_type: Option<String>,
    pub properties: IndexMap<String, Expr>,
    pub src: NodeHandle,
    pub dst: NodeHandle,
}

/// The pattern graph built from a MATCH clause.
#[derive(Debug, Clone, Default)]
pub struct PatternGraph {
    nodes: Vec<PatternNode>,
    edges: Vec<PatternEdge>,
    alias_to_node: HashMap<String, NodeHandle>,
    /// Outgoing adjacency, indexed by `NodeHandle`, in declaration order —
    /// the planner always follows the *first* outgoing edge (spec.md §4.2).
    outgoing: Vec<Vec<EdgeHandle>>,
    in_degree: Vec<usize>,
    anon_counter: usize,
}

impl PatternGraph {
    /// Build a pattern graph from a MATCH clause's pattern.
    pub fn build(match_clause: &MatchClause) -> Result<Self> {
        let mut graph = Self::default();
        for path in &match_clause.pattern.paths {
            graph.add_path(path)?;
        }
        Ok(graph)
    }

    fn fresh_alias(&mut self, prefix: &str) -> String {
        let name = format!("_{prefix}{}", self.anon_counter);
        self.anon_counter += 1;
        name
    }

    fn get_or_create_node(
        &mut self,
        alias: Option<&str>,
        label: Option<String>,
        properties: IndexMap<String, Expr>,
    ) -> NodeHandle {
        if let Some(alias) = alias {
            if let Some(&handle) = self.alias_to_node.get(alias) {
                return handle;
            }
        }
        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| self.fresh_alias("n"));
        let handle = NodeHandle(self.nodes.len());
        self.nodes.push(PatternNode {
            alias: alias.clone(),
            label,
            properties,
        });
        self.outgoing.push(Vec::new());
        self.in_degree.push(0);
        self.alias_to_node.insert(alias, handle);
        handle
    }

    fn add_edge(
        &mut self,
        src: NodeHandle,
        dst: NodeHandle,
        alias: Option<String>,
        rel_type: Option<String>,
        properties: IndexMap<String, Expr>,
    ) -> EdgeHandle {
        let handle = EdgeHandle(self.edges.len());
        self.edges.push(PatternEdge {
            alias,
            rel_type,
            properties,
            src,
            dst,
        });
        self.outgoing[src.0].push(handle);
        self.in_degree[dst.0] += 1;
        handle
    }

    fn add_path(&mut self, path: &PathPattern) -> Result<()> {
        let mut last_node: Option<NodeHandle> = None;
        let mut pending_edge: Option<&crate::ast::EdgePattern> = None;

        for element in &path.elements {
            match element {
                PathElement::Node(n) => {
                    let handle = self.get_or_create_node(
                        n.variable.as_deref(),
                        n.labels.first().cloned(),
                        n.properties.clone(),
                    );
                    if let Some(edge) = pending_edge.take() {
                        let from = last_node.ok_or_else(|| {
                            PlannerError::PlanningError("edge without source node".into())
                        })?;
                        let (src, dst) = match edge.direction {
                            Direction::Outgoing | Direction::Both => (from, handle),
                            Direction::Incoming => (handle, from),
                        };
                        self.add_edge(
                            src,
                            dst,
                            edge.variable.clone(),
                            edge.rel_types.first().cloned(),
                            edge.properties.clone(),
                        );
                    }
                    last_node = Some(handle);
                }
                PathElement::Edge(e) => {
                    pending_edge = Some(e);
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> &PatternNode {
        &self.nodes[handle.0]
    }

    #[must_use]
    pub fn edge(&self, handle: EdgeHandle) -> &PatternEdge {
        &self.edges[handle.0]
    }

    #[must_use]
    pub fn node_handle(&self, alias: &str) -> Option<NodeHandle> {
        self.alias_to_node.get(alias).copied()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Nodes whose in-degree equals exactly `k`, in handle order.
    #[must_use]
    pub fn entities_by_in_degree(&self, k: usize) -> Vec<NodeHandle> {
        (0..self.nodes.len())
            .filter(|&i| self.in_degree[i] == k)
            .map(NodeHandle)
            .collect()
    }

    /// The first outgoing edge from `node`, if any (the planner treats the
    /// pattern graph as a traversal tree rooted at each entry node,
    /// spec.md §4.2).
    #[must_use]
    pub fn first_outgoing(&self, node: NodeHandle) -> Option<EdgeHandle> {
        self.outgoing[node.0].first().copied()
    }

    #[must_use]
    pub fn has_outgoing(&self, node: NodeHandle) -> bool {
        !self.outgoing[node.0].is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::QueryParser;

    fn match_clause(query: &str) -> MatchClause {
        let parser = QueryParser::new();
        let ast = parser.parse(query).unwrap();
        for clause in ast.clauses {
            if let crate::ast::Clause::Match(m) = clause {
                return m;
            }
        }
        panic!("no MATCH clause in {query}");
    }

    #[test]
    fn lone_node_has_no_in_or_out_edges() {
        let m = match_clause("MATCH (a) RETURN a");
        let graph = PatternGraph::build(&m).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.entities_by_in_degree(0).len(), 1);
        assert!(!graph.has_outgoing(graph.node_handle("a").unwrap()));
    }

    #[test]
    fn chain_has_one_entry_point() {
        let m = match_clause("MATCH (a:Person)-[:KNOWS]->(b) RETURN b");
        let graph = PatternGraph::build(&m).unwrap();
        assert_eq!(graph.node_count(), 2);
        let entries = graph.entities_by_in_degree(0);
        assert_eq!(entries, vec![graph.node_handle("a").unwrap()]);
        assert_eq!(graph.entities_by_in_degree(1), vec![graph.node_handle("b").unwrap()]);
    }

    #[test]
    fn diamond_convergence_has_in_degree_two_node() {
        let m = match_clause("MATCH (a)-[:R]->(c)<-[:R]-(b) RETURN a,b,c");
        let graph = PatternGraph::build(&m).unwrap();
        assert_eq!(graph.node_count(), 3);
        let merge_nodes = graph.entities_by_in_degree(2);
        assert_eq!(merge_nodes, vec![graph.node_handle("c").unwrap()]);
        assert_eq!(graph.entities_by_in_degree(0).len(), 2);
    }

    #[test]
    fn two_cycle_back_to_entry_keeps_entry_in_degree_one() {
        // `a` is revisited via the closing edge, but only one distinct
        // edge (`b`->`a`) points into it — the merge condition the
        // optimizer's cycle-closure pass cares about is "already bound
        // during traversal", which in-degree alone does not capture here.
        let m = match_clause("MATCH (a)-[:R]->(b)-[:R]->(a) RETURN a,b");
        let graph = PatternGraph::build(&m).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.entities_by_in_degree(2).len(), 0);
        assert_eq!(graph.entities_by_in_degree(1).len(), 2);
    }

    #[test]
    fn disconnected_subpatterns_each_have_one_entry() {
        let m = match_clause("MATCH (a),(b) RETURN a,b");
        let graph = PatternGraph::build(&m).unwrap();
        assert_eq!(graph.entities_by_in_degree(0).len(), 2);
    }
}
