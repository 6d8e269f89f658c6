//! The physical plan: an arena of operator nodes with explicit
//! parent/child adjacency (spec.md §3, §9).
//!
//! Grounded on `execution_plan.c`'s `OpNode`/`_OpNode_AddChild` — a
//! pointer-linked n-ary tree there, an index arena here. An arena (rather
//! than `Box`-owned recursion) is necessary because the expansion-merge
//! rewrite (spec.md §4.4) reparents nodes in place: a node is spliced out
//! from under one parent and a sibling is grafted in as its new child,
//! which would otherwise require moving owned subtrees around.

use crate::operators::{ConsumeResult, Operator, StreamState};
use crate::value::Row;

/// Stable index into a `Plan`'s node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanNodeId(pub usize);

/// One node in the plan tree: an operator plus its execution-time cursor
/// state and adjacency.
pub struct PlanNode {
    pub operator: Operator,
    pub children: Vec<PlanNodeId>,
    pub parent: Option<PlanNodeId>,
    pub state: StreamState,
    /// The last row this node produced, or the empty row before the
    /// first successful `consume`.
    pub current_row: Row,
}

impl PlanNode {
    fn new(operator: Operator) -> Self {
        Self {
            operator,
            children: Vec::new(),
            parent: None,
            state: StreamState::Uninitialized,
            current_row: Row::new(),
        }
    }
}

/// The physical plan tree produced by the planner and transformed by the
/// optimizer.
#[derive(Default)]
pub struct Plan {
    nodes: Vec<PlanNode>,
    pub root: Option<PlanNodeId>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, operator: Operator) -> PlanNodeId {
        let id = PlanNodeId(self.nodes.len());
        self.nodes.push(PlanNode::new(operator));
        id
    }

    #[must_use]
    pub fn node(&self, id: PlanNodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: PlanNodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    /// Add `child` as a new child of `parent`, in order (spec.md §4's
    /// "the child list records traversal order"; `ExpandAll`/`Filter`
    /// always prepend since the newest operator sits closest to the
    /// scan it was attached above).
    pub fn add_child(&mut self, parent: PlanNodeId, child: PlanNodeId) {
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Insert `new_node` between `parent` and `old_child`, making
    /// `new_node` the sole child of `parent` in `old_child`'s former
    /// position, and `old_child` the sole child of `new_node`. Grounded
    /// on `_OpNode_PushInBetween` (spec.md §4.4).
    pub fn push_in_between(&mut self, parent: PlanNodeId, old_child: PlanNodeId, new_node: PlanNodeId) {
        if let Some(slot) = self.nodes[parent.0]
            .children
            .iter_mut()
            .find(|c| **c == old_child)
        {
            *slot = new_node;
        }
        self.nodes[new_node.0].parent = Some(parent);
        self.nodes[new_node.0].children.push(old_child);
        self.nodes[old_child.0].parent = Some(new_node);
    }

    /// Remove `child` from `parent`'s child list and clear its parent
    /// pointer. A caller re-homing it elsewhere should follow up with
    /// `add_child`, which overwrites the pointer again.
    pub fn remove_child(&mut self, parent: PlanNodeId, child: PlanNodeId) {
        self.nodes[parent.0].children.retain(|&c| c != child);
        self.nodes[child.0].parent = None;
    }

    #[must_use]
    pub fn parent_of(&self, id: PlanNodeId) -> Option<PlanNodeId> {
        self.nodes[id.0].parent
    }

    #[must_use]
    pub fn children_of(&self, id: PlanNodeId) -> &[PlanNodeId] {
        &self.nodes[id.0].children
    }

    /// Number of nodes in the arena, for passes that walk it by index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn reset(&mut self, id: PlanNodeId) -> ConsumeResult {
        let result = self.nodes[id.0].operator.reset();
        self.nodes[id.0].state = StreamState::Uninitialized;
        result
    }

    /// Render the plan tree, one operator per line, indented by depth —
    /// ported from `_ExecutionPlanPrint` (spec.md §3).
    #[must_use]
    pub fn print(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.print_node(root, 0, &mut out);
        }
        out
    }

    fn print_node(&self, id: PlanNodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id.0];
        out.push_str(&"    ".repeat(depth));
        out.push_str(&node.operator.name());
        out.push('\n');
        for &child in &node.children {
            self.print_node(child, depth + 1, out);
        }
    }
}
