//! Abstract Syntax Tree definitions for the query language.
//!
//! This module defines the AST nodes consumed by the planner. It mirrors
//! the clauses the core actually plans (MATCH, WHERE, RETURN, ORDER BY,
//! LIMIT, SKIP); write clauses and subquery expressions are not part of
//! this surface.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A complete query consisting of clauses, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

/// Individual clauses that make up a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Clause {
    Match(MatchClause),
    Where(WhereClause),
    Return(ReturnClause),
    OrderBy(OrderByClause),
    Limit(LimitClause),
    Skip(SkipClause),
}

/// MATCH clause for pattern matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchClause {
    pub pattern: Pattern,
}

/// WHERE clause for filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub predicate: Expr,
}

/// RETURN clause for specifying output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnClause {
    pub items: Vec<ReturnItem>,
    pub distinct: bool,
}

/// A single item in a RETURN clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

/// ORDER BY clause for sorting results. Honored opaquely by `ProduceResults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByClause {
    pub items: Vec<OrderItem>,
}

/// A single ordering specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// LIMIT clause for restricting result count. Honored opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitClause {
    pub count: u64,
}

/// SKIP clause for pagination. Honored opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipClause {
    pub count: u64,
}

/// A graph pattern consisting of path patterns (comma-separated in MATCH).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Pattern {
    pub paths: Vec<PathPattern>,
}

/// A path pattern: alternating sequence of nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPattern {
    pub elements: Vec<PathElement>,
}

/// An element in a path: either a node or an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PathElement {
    Node(NodePattern),
    Edge(EdgePattern),
}

/// A node pattern for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: SmallVec<[String; 2]>,
    pub properties: IndexMap<String, Expr>,
}

/// An edge pattern for matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePattern {
    pub variable: Option<String>,
    pub rel_types: SmallVec<[String; 2]>,
    pub properties: IndexMap<String, Expr>,
    pub direction: Direction,
}

/// Edge direction as written in the pattern, before planner normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Expression node in the AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    /// A literal value.
    Literal(Literal),
    /// A variable reference (bound pattern alias).
    Variable(String),
    /// Property access (expr.property).
    Property { expr: Box<Expr>, name: String },
    /// Binary operation.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary { op: UnaryOp, expr: Box<Expr> },
    /// Function call — the only form used for aggregation detection
    /// (`count`, `sum`, `avg`, `min`, `max`, `collect`).
    FunctionCall { name: String, args: Vec<Expr> },
}

/// Literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Contains,
    StartsWith,
    EndsWith,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl Default for NodePattern {
    fn default() -> Self {
        Self {
            variable: None,
            labels: SmallVec::new(),
            properties: IndexMap::new(),
        }
    }
}

impl Default for EdgePattern {
    fn default() -> Self {
        Self {
            variable: None,
            rel_types: SmallVec::new(),
            properties: IndexMap::new(),
            direction: Direction::Outgoing,
        }
    }
}

impl BinaryOp {
    /// Check if this is a comparison operator.
    #[must_use]
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// Check if this is a logical operator.
    #[must_use]
    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }
}

const AGGREGATE_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max", "collect"];

/// Walk a RETURN item's expression tree for an aggregation call.
#[must_use]
pub fn expr_contains_aggregation(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, args } => {
            AGGREGATE_FUNCTIONS.contains(&name.to_lowercase().as_str())
                || args.iter().any(expr_contains_aggregation)
        }
        Expr::Binary { left, right, .. } => {
            expr_contains_aggregation(left) || expr_contains_aggregation(right)
        }
        Expr::Unary { expr, .. } => expr_contains_aggregation(expr),
        Expr::Property { expr, .. } => expr_contains_aggregation(expr),
        Expr::Literal(_) | Expr::Variable(_) => false,
    }
}

/// Collect every variable alias an expression references.
pub fn collect_variables(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Variable(name) => out.push(name.clone()),
        Expr::Property { expr, .. } | Expr::Unary { expr, .. } => collect_variables(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_variables(left, out);
            collect_variables(right, out);
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                collect_variables(arg, out);
            }
        }
        Expr::Literal(_) => {}
    }
}
