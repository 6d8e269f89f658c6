//! Storage interface (spec.md §6) — an external collaborator. The planner
//! and executor depend only on this narrow trait; `InMemoryGraphStore` is
//! a test double, not a production storage engine.

use crate::ast::Direction;
use crate::value::{EdgeValue, NodeValue};
use hashbrown::HashMap;

/// Narrow read interface the planner's scan and expansion operators pull
/// through. Implementations are assumed synchronous (spec.md §5).
pub trait GraphStore {
    /// A cardinality estimate for an unfiltered node scan.
    fn all_node_cardinality(&self) -> usize;

    /// A cardinality estimate for a label-filtered node scan.
    fn label_cardinality(&self, label: &str) -> usize;

    /// Every node in the store.
    fn iter_nodes(&self) -> Vec<NodeValue>;

    /// Every node carrying `label`.
    fn iter_nodes_with_label(&self, label: &str) -> Vec<NodeValue>;

    /// Outgoing (or incoming, per `direction`) edges from `src`, optionally
    /// filtered by relationship type.
    fn out_edges(
        &self,
        src: u64,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> Vec<EdgeValue>;

    /// Whether an edge of `rel_type` (any type if `None`) connects `src` to
    /// `dst` in the given direction. Used by `ExpandInto`'s containment
    /// check.
    fn edge_exists(&self, src: u64, dst: u64, rel_type: Option<&str>, direction: Direction)
        -> bool;

    fn node_by_id(&self, id: u64) -> Option<NodeValue>;
}

/// A minimal in-memory property graph, sufficient to drive the executor
/// in tests without a real storage engine.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGraphStore {
    nodes: HashMap<u64, NodeValue>,
    /// Outgoing adjacency: src -> edges.
    outgoing: HashMap<u64, Vec<EdgeValue>>,
    /// Incoming adjacency: dst -> edges.
    incoming: HashMap<u64, Vec<EdgeValue>>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeValue) {
        self.outgoing.entry(node.id).or_default();
        self.incoming.entry(node.id).or_default();
        self.nodes.insert(node.id, node);
    }

    pub fn add_edge(&mut self, edge: EdgeValue) {
        self.outgoing.entry(edge.source).or_default().push(edge.clone());
        self.incoming.entry(edge.target).or_default().push(edge);
    }
}

impl GraphStore for InMemoryGraphStore {
    fn all_node_cardinality(&self) -> usize {
        self.nodes.len()
    }

    fn label_cardinality(&self, label: &str) -> usize {
        self.nodes
            .values()
            .filter(|n| n.labels.iter().any(|l| l == label))
            .count()
    }

    fn iter_nodes(&self) -> Vec<NodeValue> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    fn iter_nodes_with_label(&self, label: &str) -> Vec<NodeValue> {
        let mut nodes: Vec<_> = self
            .nodes
            .values()
            .filter(|n| n.labels.iter().any(|l| l == label))
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    fn out_edges(&self, src: u64, rel_type: Option<&str>, direction: Direction) -> Vec<EdgeValue> {
        let mut edges = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            if let Some(es) = self.outgoing.get(&src) {
                edges.extend(
                    es.iter()
                        .filter(|e| rel_type.map_or(true, |rt| e.rel_type == rt))
                        .cloned(),
                );
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            if let Some(es) = self.incoming.get(&src) {
                edges.extend(
                    es.iter()
                        .filter(|e| rel_type.map_or(true, |rt| e.rel_type == rt))
                        // Normalize so `.target` is always the far endpoint.
                        .map(|e| EdgeValue {
                            source: e.target,
                            target: e.source,
                            ..e.clone()
                        }),
                );
            }
        }
        edges.sort_by_key(|e| e.id);
        edges
    }

    fn edge_exists(
        &self,
        src: u64,
        dst: u64,
        rel_type: Option<&str>,
        direction: Direction,
    ) -> bool {
        self.out_edges(src, rel_type, direction)
            .iter()
            .any(|e| e.target == dst)
    }

    fn node_by_id(&self, id: u64) -> Option<NodeValue> {
        self.nodes.get(&id).cloned()
    }
}
