//! The operator catalog (spec.md §3, §4) — a sealed sum type over the
//! concrete physical operators, dispatched through inherent `match`
//! methods rather than `dyn Trait` (spec.md §9: "a sealed variant is
//! preferable to virtual dispatch").

use crate::ast::{BinaryOp, Direction, Expr};
use crate::filter_tree::eval_expr;
use crate::pattern_graph::{EdgeHandle, NodeHandle, PatternGraph};
use crate::store::GraphStore;
use crate::value::{compare_values, EdgeValue, NodeValue, ResultSet, Row, Value};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Merge every child stream's current row into one, last-write-wins —
/// the pattern `Filter`, `Aggregate`, and `ProduceResults` all need since
/// a naive top-of-tree operator sits over the cross product of several
/// disconnected subpattern chains until the optimizer pushes it down
/// (spec.md §4.5).
fn merge_rows(children: &[Row]) -> Row {
    let mut row = Row::new();
    for child in children {
        for (k, v) in &child.bindings {
            row.bind(k.clone(), v.clone());
        }
    }
    row
}

/// Status returned by `Operator::consume`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeResult {
    /// A tuple was produced; the operator's output bindings are valid.
    Ok,
    /// Current iteration over upstream input is exhausted; the caller
    /// should reset and pull a new upstream tuple, then retry.
    Refresh,
    /// Upstream has no more tuples and nothing here can advance.
    Depleted,
    /// Unrecoverable error.
    Err(String),
}

/// Per-operator-per-execution stream state (spec.md §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Consuming,
    Depleted,
}

/// A stable type tag, independent of the operator's runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    AllNodeScan,
    NodeByLabelScan,
    ExpandAll,
    ExpandInto,
    Filter,
    Aggregate,
    ProduceResults,
}

/// Aggregation functions (spec.md §1: aggregation evaluator internals are
/// an out-of-scope external collaborator; this is a minimal structural
/// stand-in sufficient to exercise the `Aggregate` operator's place in
/// the plan, not a full expression-evaluator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Read-only context handed to every `consume` call: the shared pattern
/// graph and the storage handle (spec.md §5: "the pattern graph is shared
/// read-only by every operator once built").
pub struct ExecCtx<'a> {
    pub pattern_graph: &'a PatternGraph,
    pub store: &'a dyn GraphStore,
}

/// The sealed operator catalog.
#[derive(Debug)]
pub enum Operator {
    AllNodeScan(AllNodeScanOp),
    NodeByLabelScan(NodeByLabelScanOp),
    ExpandAll(ExpandAllOp),
    ExpandInto(ExpandIntoOp),
    Filter(FilterOp),
    Aggregate(AggregateOpState),
    ProduceResults(ProduceResultsOp),
}

impl Operator {
    #[must_use]
    pub fn type_tag(&self) -> OperatorType {
        match self {
            Operator::AllNodeScan(_) => OperatorType::AllNodeScan,
            Operator::NodeByLabelScan(_) => OperatorType::NodeByLabelScan,
            Operator::ExpandAll(_) => OperatorType::ExpandAll,
            Operator::ExpandInto(_) => OperatorType::ExpandInto,
            Operator::Filter(_) => OperatorType::Filter,
            Operator::Aggregate(_) => OperatorType::Aggregate,
            Operator::ProduceResults(_) => OperatorType::ProduceResults,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Operator::AllNodeScan(op) => format!("All Node Scan | {}", op.var),
            Operator::NodeByLabelScan(op) => {
                format!("Node By Label Scan | {}:{}", op.var, op.label)
            }
            Operator::ExpandAll(op) => format!(
                "Expand(All) | ({})-[{}]->({})",
                op.from_var,
                op.edge_var.as_deref().unwrap_or(""),
                op.to_var
            ),
            Operator::ExpandInto(op) => format!(
                "Expand(Into) | ({})-[{}]->({})",
                op.from_var,
                op.rel_type.as_deref().unwrap_or(""),
                op.to_var
            ),
            Operator::Filter(_) => "Filter".to_string(),
            Operator::Aggregate(_) => "Aggregate".to_string(),
            Operator::ProduceResults(_) => "Results".to_string(),
        }
    }

    /// Aliases this operator newly binds or rebinds.
    #[must_use]
    pub fn modifies(&self) -> SmallVec<[String; 2]> {
        match self {
            Operator::AllNodeScan(op) => SmallVec::from_slice(&[op.var.clone()]),
            Operator::NodeByLabelScan(op) => SmallVec::from_slice(&[op.var.clone()]),
            Operator::ExpandAll(op) => {
                let mut v = SmallVec::from_slice(&[op.to_var.clone()]);
                if let Some(ev) = &op.edge_var {
                    v.push(ev.clone());
                }
                v
            }
            Operator::ExpandInto(_) => SmallVec::new(),
            Operator::Filter(_) => SmallVec::new(),
            Operator::Aggregate(op) => SmallVec::from_slice(&[op.output_alias.clone()]),
            Operator::ProduceResults(_) => SmallVec::new(),
        }
    }

    /// Rewind this operator's cursor to the start without discarding its
    /// configuration (spec.md §3). Idempotent.
    pub fn reset(&mut self) -> ConsumeResult {
        match self {
            Operator::AllNodeScan(op) => {
                op.idx = 0;
                ConsumeResult::Ok
            }
            Operator::NodeByLabelScan(op) => {
                op.idx = 0;
                ConsumeResult::Ok
            }
            Operator::ExpandAll(op) => {
                op.edges = None;
                op.idx = 0;
                op.ready = true;
                ConsumeResult::Ok
            }
            Operator::ExpandInto(op) => {
                op.ready = true;
                ConsumeResult::Ok
            }
            Operator::Filter(op) => {
                op.ready = true;
                ConsumeResult::Ok
            }
            Operator::Aggregate(op) => {
                op.finished = false;
                op.emitted_row = None;
                ConsumeResult::Ok
            }
            Operator::ProduceResults(op) => {
                op.ready = true;
                ConsumeResult::Ok
            }
        }
    }

    /// Produce the next tuple, or a refresh/depletion/error signal.
    /// `children` holds the current output row of each child stream, in
    /// `children` adjacency order.
    pub fn consume(&mut self, ctx: &ExecCtx<'_>, children: &[Row]) -> (ConsumeResult, Row) {
        match self {
            Operator::AllNodeScan(op) => op.consume(ctx),
            Operator::NodeByLabelScan(op) => op.consume(ctx),
            Operator::ExpandAll(op) => op.consume(ctx, children),
            Operator::ExpandInto(op) => op.consume(ctx, children),
            Operator::Filter(op) => op.consume(children),
            Operator::Aggregate(op) => op.consume(children),
            Operator::ProduceResults(op) => op.consume(children),
        }
    }

    /// Whether this operator only ever produces rows by merging its
    /// children's current rows (`Filter`, `Aggregate`, `ProduceResults`,
    /// `ExpandAll`, `ExpandInto`) rather than driving its own cursor over
    /// the store (`AllNodeScan`, `NodeByLabelScan`). A node of this kind
    /// with zero children has nothing to merge and can never produce a
    /// row — not even the single vacuous one `merge_rows(&[])` would
    /// otherwise hand it (spec.md §8: an empty MATCH plans to a bare
    /// `ProduceResults` with no children and must yield zero rows).
    #[must_use]
    pub fn requires_children(&self) -> bool {
        !matches!(
            self,
            Operator::AllNodeScan(_) | Operator::NodeByLabelScan(_)
        )
    }

    /// Whether this operator must fully drain its children before it can
    /// emit its first row — `Aggregate` always, `ProduceResults` only
    /// when it has an ORDER BY to satisfy (spec.md §4.6 generalizes past
    /// the per-tuple refresh cycle for these two blocking operators).
    #[must_use]
    pub fn requires_full_drain(&self) -> bool {
        match self {
            Operator::Aggregate(op) => !op.finished,
            Operator::ProduceResults(op) => op.needs_full_drain(),
            _ => false,
        }
    }

    /// Finalize a blocking operator once its children are depleted, so
    /// its next `consume` can start emitting.
    pub fn finish_drain(&mut self) {
        match self {
            Operator::Aggregate(op) => op.finish(),
            Operator::ProduceResults(op) => op.finish_sort(),
            _ => {}
        }
    }
}

fn node_value(ctx: &ExecCtx<'_>, id: u64) -> NodeValue {
    ctx.store.node_by_id(id).unwrap_or(NodeValue {
        id,
        labels: Default::default(),
        properties: Default::default(),
    })
}

/// Scan all nodes with optional label filter — `AllNodeScan` variant.
#[derive(Debug)]
pub struct AllNodeScanOp {
    pub var: String,
    pub node_handle: NodeHandle,
    nodes: Option<Vec<NodeValue>>,
    idx: usize,
}

impl AllNodeScanOp {
    #[must_use]
    pub fn new(var: String, node_handle: NodeHandle) -> Self {
        Self {
            var,
            node_handle,
            nodes: None,
            idx: 0,
        }
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> (ConsumeResult, Row) {
        let nodes = self.nodes.get_or_insert_with(|| ctx.store.iter_nodes());
        if self.idx >= nodes.len() {
            return (ConsumeResult::Refresh, Row::new());
        }
        let mut row = Row::new();
        row.bind(self.var.clone(), Value::Node(nodes[self.idx].clone()));
        self.idx += 1;
        (ConsumeResult::Ok, row)
    }
}

/// Index-free label-filtered node scan — `NodeByLabelScan` variant.
#[derive(Debug)]
pub struct NodeByLabelScanOp {
    pub var: String,
    pub label: String,
    pub node_handle: NodeHandle,
    nodes: Option<Vec<NodeValue>>,
    idx: usize,
}

impl NodeByLabelScanOp {
    #[must_use]
    pub fn new(var: String, label: String, node_handle: NodeHandle) -> Self {
        Self {
            var,
            label,
            node_handle,
            nodes: None,
            idx: 0,
        }
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>) -> (ConsumeResult, Row) {
        let label = self.label.clone();
        let nodes = self
            .nodes
            .get_or_insert_with(|| ctx.store.iter_nodes_with_label(&label));
        if self.idx >= nodes.len() {
            return (ConsumeResult::Refresh, Row::new());
        }
        let mut row = Row::new();
        row.bind(self.var.clone(), Value::Node(nodes[self.idx].clone()));
        self.idx += 1;
        (ConsumeResult::Ok, row)
    }
}

/// Expand from a bound source node along an edge to a new destination
/// binding.
#[derive(Debug)]
pub struct ExpandAllOp {
    pub src_node: NodeHandle,
    pub edge: EdgeHandle,
    pub dest_node: NodeHandle,
    pub from_var: String,
    pub edge_var: Option<String>,
    pub to_var: String,
    pub rel_type: Option<String>,
    edges: Option<Vec<EdgeValue>>,
    idx: usize,
    ready: bool,
}

impl ExpandAllOp {
    #[must_use]
    pub fn new(
        src_node: NodeHandle,
        edge: EdgeHandle,
        dest_node: NodeHandle,
        from_var: String,
        edge_var: Option<String>,
        to_var: String,
        rel_type: Option<String>,
    ) -> Self {
        Self {
            src_node,
            edge,
            dest_node,
            from_var,
            edge_var,
            to_var,
            rel_type,
            edges: None,
            idx: 0,
            ready: true,
        }
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>, children: &[Row]) -> (ConsumeResult, Row) {
        if self.edges.is_none() || self.idx >= self.edges.as_ref().unwrap().len() {
            if !self.ready {
                return (ConsumeResult::Refresh, Row::new());
            }
            self.ready = false;
            let Some(child_row) = children.first() else {
                return (
                    ConsumeResult::Err("ExpandAll has no child stream".into()),
                    Row::new(),
                );
            };
            let Some(src_id) = child_row.node_id(&self.from_var) else {
                return (ConsumeResult::Refresh, Row::new());
            };
            let edges = ctx
                .store
                .out_edges(src_id, self.rel_type.as_deref(), Direction::Outgoing);
            self.idx = 0;
            let empty = edges.is_empty();
            self.edges = Some(edges);
            if empty {
                return (ConsumeResult::Refresh, Row::new());
            }
        }
        let child_row = children.first().cloned().unwrap_or_default();
        let edges = self.edges.as_ref().unwrap();
        let edge = edges[self.idx].clone();
        self.idx += 1;

        let mut row = child_row;
        if let Some(edge_var) = &self.edge_var {
            row.bind(edge_var.clone(), Value::Edge(edge.clone()));
        }
        row.bind(self.to_var.clone(), Value::Node(node_value(ctx, edge.target)));
        (ConsumeResult::Ok, row)
    }
}

/// Verify that an already-bound destination is reachable from an
/// already-bound source via the named relationship — the cycle-closing
/// containment check (spec.md §3, §4.4).
#[derive(Debug)]
pub struct ExpandIntoOp {
    pub src_node: NodeHandle,
    pub dest_node: NodeHandle,
    pub from_var: String,
    pub to_var: String,
    pub rel_type: Option<String>,
    ready: bool,
}

impl ExpandIntoOp {
    #[must_use]
    pub fn new(
        src_node: NodeHandle,
        dest_node: NodeHandle,
        from_var: String,
        to_var: String,
        rel_type: Option<String>,
    ) -> Self {
        Self {
            src_node,
            dest_node,
            from_var,
            to_var,
            rel_type,
            ready: true,
        }
    }

    fn consume(&mut self, ctx: &ExecCtx<'_>, children: &[Row]) -> (ConsumeResult, Row) {
        if !self.ready {
            return (ConsumeResult::Refresh, Row::new());
        }
        self.ready = false;
        if children.is_empty() {
            return (
                ConsumeResult::Err("ExpandInto has no child stream".into()),
                Row::new(),
            );
        }
        // Usually a single child carrying both `from_var` and `to_var`
        // forward from earlier in the same chain. The merge-closure pass
        // (spec.md §4.4) can also graft a second, disconnected chain in
        // here as an extra child when the two bindings come from
        // different producers, so every child's row is merged the same
        // way `Filter`/`ProduceResults` do.
        let row = merge_rows(children);
        let (Some(src_id), Some(dst_id)) =
            (row.node_id(&self.from_var), row.node_id(&self.to_var))
        else {
            return (ConsumeResult::Refresh, Row::new());
        };
        if ctx
            .store
            .edge_exists(src_id, dst_id, self.rel_type.as_deref(), Direction::Outgoing)
        {
            (ConsumeResult::Ok, row)
        } else {
            (ConsumeResult::Refresh, Row::new())
        }
    }
}

/// Filters rows through a minimum filter tree (spec.md §3, §4.5).
#[derive(Debug)]
pub struct FilterOp {
    pub predicate: Expr,
    ready: bool,
}

impl FilterOp {
    #[must_use]
    pub fn new(predicate: Expr) -> Self {
        Self {
            predicate,
            ready: true,
        }
    }

    fn consume(&mut self, children: &[Row]) -> (ConsumeResult, Row) {
        if !self.ready {
            return (ConsumeResult::Refresh, Row::new());
        }
        self.ready = false;
        if children.is_empty() {
            return (
                ConsumeResult::Err("Filter has no child stream".into()),
                Row::new(),
            );
        }
        // Merge every child stream's bindings: a naive top-of-tree Filter
        // sits directly over the cross product of several disconnected
        // subpattern chains until the optimizer pushes it down (spec.md
        // §4.5), so it must see every chain's bindings at once.
        let row = merge_rows(children);
        match eval_expr(&self.predicate, &row) {
            Ok(v) if v.truthy() => (ConsumeResult::Ok, row),
            Ok(_) => (ConsumeResult::Refresh, Row::new()),
            Err(e) => (ConsumeResult::Err(e), Row::new()),
        }
    }
}

/// Drains its single child stream and emits one row carrying the
/// aggregate result (spec.md §1 marks full aggregation evaluation an
/// out-of-scope external collaborator; this implements the common
/// single-group numeric aggregates directly since the executor must
/// fully materialize the child stream regardless).
#[derive(Debug)]
pub struct AggregateOpState {
    pub op: AggregateOp,
    pub arg: Expr,
    pub output_alias: String,
    finished: bool,
    emitted_row: Option<Row>,
    count: u64,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl AggregateOpState {
    #[must_use]
    pub fn new(op: AggregateOp, arg: Expr, output_alias: String) -> Self {
        Self {
            op,
            arg,
            output_alias,
            finished: false,
            emitted_row: None,
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
        }
    }

    fn accumulate(&mut self, row: &Row) {
        self.count += 1;
        if let Ok(v) = eval_expr(&self.arg, row) {
            if let Some(f) = v.as_f64() {
                self.sum += f;
                self.min = Some(self.min.map_or(f, |m| m.min(f)));
                self.max = Some(self.max.map_or(f, |m| m.max(f)));
            }
        }
    }

    fn finalize(&self) -> Value {
        match self.op {
            AggregateOp::Count => Value::Int(self.count as i64),
            AggregateOp::Sum => Value::Float(self.sum),
            AggregateOp::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Float(self.sum / self.count as f64)
                }
            }
            AggregateOp::Min => self.min.map_or(Value::Null, Value::Float),
            AggregateOp::Max => self.max.map_or(Value::Null, Value::Float),
        }
    }

    /// Called by the executor, which owns draining the child stream
    /// (spec.md §4.6's generic per-tuple refresh cycle does not model a
    /// blocking accumulator; the executor special-cases `Aggregate`).
    pub fn consume(&mut self, children: &[Row]) -> (ConsumeResult, Row) {
        if self.finished {
            return match self.emitted_row.take() {
                Some(row) => (ConsumeResult::Ok, row),
                None => (ConsumeResult::Depleted, Row::new()),
            };
        }
        if !children.is_empty() {
            // Merge every child's bindings first, same as `Filter` and
            // `ProduceResults`: an aggregate over a disconnected
            // subpattern sits above a cross product, not a single chain.
            self.accumulate(&merge_rows(children));
        }
        (ConsumeResult::Refresh, Row::new())
    }

    pub fn finish(&mut self) {
        let mut row = Row::new();
        row.bind(self.output_alias.clone(), self.finalize());
        self.finished = true;
        self.emitted_row = Some(row);
    }
}

/// Root operator: projects RETURN items and materializes the result set.
///
/// With no ORDER BY, rows stream through one at a time as the executor
/// pulls them (SKIP/LIMIT applied as simple counters). With ORDER BY, the
/// full child stream must be seen before the first row can be ranked, so
/// the executor drains this operator completely via `finish_sort` and it
/// switches to replaying from `emit_queue` (spec.md §6: ORDER BY/LIMIT are
/// honored by `ProduceResults`, opaque to the planner).
#[derive(Debug)]
pub struct ProduceResultsOp {
    pub items: Vec<(Expr, String)>,
    pub distinct: bool,
    pub order_by: Vec<(Expr, bool)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub resultset: ResultSet,
    ready: bool,
    buffer: Vec<Row>,
    emit_queue: Option<VecDeque<Row>>,
    skipped: u64,
    emitted: u64,
}

impl ProduceResultsOp {
    #[must_use]
    pub fn new(
        items: Vec<(Expr, String)>,
        distinct: bool,
        order_by: Vec<(Expr, bool)>,
        limit: Option<u64>,
        skip: Option<u64>,
    ) -> Self {
        let columns = items.iter().map(|(_, alias)| alias.clone()).collect();
        Self {
            items,
            distinct,
            order_by,
            limit,
            skip,
            resultset: ResultSet {
                columns,
                rows: Vec::new(),
            },
            ready: true,
            buffer: Vec::new(),
            emit_queue: None,
            skipped: 0,
            emitted: 0,
        }
    }

    fn project(&self, children: &[Row]) -> Result<Row, String> {
        let merged = merge_rows(children);
        let mut projected = Row::new();
        for (expr, alias) in &self.items {
            projected.bind(alias.clone(), eval_expr(expr, &merged)?);
        }
        Ok(projected)
    }

    /// Whether this operator must see its entire child stream before it
    /// can emit anything.
    #[must_use]
    pub fn needs_full_drain(&self) -> bool {
        !self.order_by.is_empty() && self.emit_queue.is_none()
    }

    fn consume(&mut self, children: &[Row]) -> (ConsumeResult, Row) {
        if !self.order_by.is_empty() {
            return self.consume_buffering(children);
        }
        self.consume_streaming(children)
    }

    fn consume_buffering(&mut self, children: &[Row]) -> (ConsumeResult, Row) {
        if let Some(queue) = &mut self.emit_queue {
            return match queue.pop_front() {
                Some(row) => (ConsumeResult::Ok, row),
                None => (ConsumeResult::Depleted, Row::new()),
            };
        }
        if !self.ready {
            return (ConsumeResult::Refresh, Row::new());
        }
        self.ready = false;
        match self.project(children) {
            Ok(row) => {
                if !(self.distinct && self.buffer.contains(&row)) {
                    self.buffer.push(row);
                }
                (ConsumeResult::Refresh, Row::new())
            }
            Err(e) => (ConsumeResult::Err(e), Row::new()),
        }
    }

    /// Called by the executor once the child stream is fully drained:
    /// sorts the buffered rows, applies SKIP/LIMIT, and populates both
    /// the materialized result set and the replay queue.
    pub fn finish_sort(&mut self) {
        let order_by = std::mem::take(&mut self.order_by);
        self.buffer.sort_by(|a, b| {
            for (expr, ascending) in &order_by {
                let (Ok(av), Ok(bv)) = (eval_expr(expr, a), eval_expr(expr, b)) else {
                    continue;
                };
                let ord = compare_values(&av, &bv);
                let ord = if *ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.order_by = order_by;

        let skip = self.skip.unwrap_or(0) as usize;
        let rows: Vec<Row> = self.buffer.drain(..).skip(skip).collect();
        let rows = match self.limit {
            Some(n) => rows.into_iter().take(n as usize).collect::<Vec<_>>(),
            None => rows,
        };
        self.resultset.rows = rows.clone();
        self.emit_queue = Some(rows.into());
    }

    fn consume_streaming(&mut self, children: &[Row]) -> (ConsumeResult, Row) {
        if !self.ready {
            return (ConsumeResult::Refresh, Row::new());
        }
        if let Some(limit) = self.limit {
            if self.emitted >= limit {
                return (ConsumeResult::Depleted, Row::new());
            }
        }
        self.ready = false;
        let projected = match self.project(children) {
            Ok(row) => row,
            Err(e) => return (ConsumeResult::Err(e), Row::new()),
        };
        if self.distinct && self.resultset.rows.contains(&projected) {
            return (ConsumeResult::Refresh, Row::new());
        }
        if self.skipped < self.skip.unwrap_or(0) {
            self.skipped += 1;
            return (ConsumeResult::Refresh, Row::new());
        }
        self.emitted += 1;
        self.resultset.rows.push(projected.clone());
        (ConsumeResult::Ok, projected)
    }
}

/// Whether a binary operator is a boolean connective, used by the filter
/// tree's structural queries (spec.md §3).
#[must_use]
pub fn is_connective(op: BinaryOp) -> bool {
    op.is_logical()
}
