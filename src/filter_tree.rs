//! Filter tree: the external module the optimizer's filter pushdown pass
//! (spec.md §4.5) consults, plus the expression evaluator the `Filter`
//! and `ProduceResults` operators run at execution time (spec.md §3).
//!
//! A filter tree here is represented as a single `Expr` — the WHERE
//! predicate's top-level AND-conjunction, treated as a set of conjuncts
//! for the three required structural operations (spec.md §4):
//!
//! - [`contains_any`] — does the tree reference at least one alias in a
//!   set?
//! - [`min_subtree`] — pure extract-and-replace: the maximal
//!   sub-expression whose free variables are all in a set, as a newly
//!   built, detached tree (spec.md §9: prefer this over in-place
//!   surgery so `residual ∩ extracted = ∅` is trivially true).
//! - [`remove_predicates`] — the complementary destructive prune: every
//!   conjunct whose free variables are all in the set is dropped; the
//!   residual tree may become empty.
//!
//! Grounded on `kg-query-engine/src/optimizer.rs`'s `split_predicates`/
//! `expr_references_only` (around its `QueryOptimizer::push_down_filter`
//! logic), generalized from a single target variable to an alias set,
//! since a pushdown point here is identified by everything bound so far
//! rather than one variable.

use crate::ast::{collect_variables, BinaryOp, Expr, Literal, UnaryOp};
use crate::value::{Row, Value};
use hashbrown::HashSet;

/// Split a predicate into its top-level AND-conjuncts. A predicate with
/// no top-level AND is a single conjunct.
fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        other => vec![other.clone()],
    }
}

/// Re-join conjuncts into a single predicate (the inverse of
/// `split_conjuncts`), or `None` if the slice is empty.
fn rebuild_conjunction(conjuncts: &[Expr]) -> Option<Expr> {
    conjuncts.iter().cloned().reduce(|acc, e| Expr::Binary {
        left: Box::new(acc),
        op: BinaryOp::And,
        right: Box::new(e),
    })
}

fn variables_of(expr: &Expr) -> Vec<String> {
    let mut out = Vec::new();
    collect_variables(expr, &mut out);
    out
}

/// Whether every alias `expr` references is already in `aliases` — the
/// condition under which a conjunct is safe to evaluate at a plan
/// position (spec.md §4.5).
fn references_only(expr: &Expr, aliases: &HashSet<String>) -> bool {
    variables_of(expr).iter().all(|v| aliases.contains(v))
}

/// Does `tree` reference at least one alias in `aliases`?
#[must_use]
pub fn contains_any(tree: &Expr, aliases: &HashSet<String>) -> bool {
    variables_of(tree).iter().any(|v| aliases.contains(v))
}

/// Extract the maximal sub-expression of `tree` whose free variables are
/// all in `aliases`, as a newly built, detached tree. Pure: `tree` itself
/// is untouched. `None` if no top-level conjunct qualifies.
#[must_use]
pub fn min_subtree(tree: &Expr, aliases: &HashSet<String>) -> Option<Expr> {
    let qualifying: Vec<Expr> = split_conjuncts(tree)
        .into_iter()
        .filter(|c| references_only(c, aliases))
        .collect();
    rebuild_conjunction(&qualifying)
}

/// Prune from `tree` every conjunct whose free variables are all in
/// `aliases`, returning the residual tree. `None` if every conjunct was
/// pruned.
#[must_use]
pub fn remove_predicates(tree: &Expr, aliases: &HashSet<String>) -> Option<Expr> {
    let remaining: Vec<Expr> = split_conjuncts(tree)
        .into_iter()
        .filter(|c| !references_only(c, aliases))
        .collect();
    rebuild_conjunction(&remaining)
}

/// Evaluate an expression against a row of bindings.
///
/// Scalar and aggregate function calls are an out-of-scope external
/// collaborator (spec.md §1); the planner compiles aggregate RETURN
/// items down to a plain variable reference bound by the `Aggregate`
/// operator before this ever runs, so `FunctionCall` reaching here is
/// always an unsupported scalar function.
pub fn eval_expr(expr: &Expr, row: &Row) -> Result<Value, String> {
    match expr {
        Expr::Literal(lit) => Ok(literal_value(lit)),
        Expr::Variable(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unbound variable: {name}")),
        Expr::Property { expr, name } => {
            let base = eval_expr(expr, row)?;
            Ok(property_of(&base, name))
        }
        Expr::Unary { op, expr } => {
            let v = eval_expr(expr, row)?;
            eval_unary(*op, &v)
        }
        Expr::Binary { left, op, right } => {
            let l = eval_expr(left, row)?;
            let r = eval_expr(right, row)?;
            eval_binary(*op, &l, &r)
        }
        Expr::FunctionCall { name, .. } => Err(format!("unsupported function: {name}")),
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn property_of(base: &Value, name: &str) -> Value {
    match base {
        Value::Node(n) => n.properties.get(name).cloned().unwrap_or(Value::Null),
        Value::Edge(e) => e.properties.get(name).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn eval_unary(op: UnaryOp, v: &Value) -> Result<Value, String> {
    match (op, v) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Not, _) => Err("NOT applied to a non-boolean".to_string()),
        (UnaryOp::Neg, _) => Err("unary minus applied to a non-numeric value".to_string()),
    }
}

fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    use BinaryOp::*;
    if op.is_logical() {
        let (Value::Bool(lb), Value::Bool(rb)) = (l, r) else {
            return Err("logical operator applied to a non-boolean".to_string());
        };
        return Ok(Value::Bool(match op {
            And => *lb && *rb,
            Or => *lb || *rb,
            Xor => *lb ^ *rb,
            _ => unreachable!(),
        }));
    }
    if op.is_comparison() {
        return Ok(Value::Bool(compare(op, l, r)));
    }
    match op {
        Add | Sub | Mul | Div | Mod => arithmetic(op, l, r),
        Contains | StartsWith | EndsWith => string_op(op, l, r),
        _ => Err("unsupported operator".to_string()),
    }
}

fn compare(op: BinaryOp, l: &Value, r: &Value) -> bool {
    use BinaryOp::*;
    if let (Some(lf), Some(rf)) = (l.as_f64(), r.as_f64()) {
        return match op {
            Eq => lf == rf,
            Ne => lf != rf,
            Lt => lf < rf,
            Le => lf <= rf,
            Gt => lf > rf,
            Ge => lf >= rf,
            _ => false,
        };
    }
    match op {
        Eq => l == r,
        Ne => l != r,
        _ => false,
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    let (Some(lf), Some(rf)) = (l.as_f64(), r.as_f64()) else {
        return Err("arithmetic applied to a non-numeric value".to_string());
    };
    let result = match op {
        BinaryOp::Add => lf + rf,
        BinaryOp::Sub => lf - rf,
        BinaryOp::Mul => lf * rf,
        BinaryOp::Div => lf / rf,
        BinaryOp::Mod => lf % rf,
        _ => unreachable!(),
    };
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
            return Ok(Value::Int(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => unreachable!(),
            }));
        }
    }
    Ok(Value::Float(result))
}

fn string_op(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    let (Value::String(a), Value::String(b)) = (l, r) else {
        return Err("string operator applied to a non-string value".to_string());
    };
    Ok(Value::Bool(match op {
        BinaryOp::Contains => a.contains(b.as_str()),
        BinaryOp::StartsWith => a.starts_with(b.as_str()),
        BinaryOp::EndsWith => a.ends_with(b.as_str()),
        _ => unreachable!(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    fn and(l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(l),
            op: BinaryOp::And,
            right: Box::new(r),
        }
    }

    #[test]
    fn contains_any_true_when_one_conjunct_matches() {
        let tree = and(var("a"), var("b"));
        let mut aliases = HashSet::new();
        aliases.insert("b".to_string());
        assert!(contains_any(&tree, &aliases));

        let mut none = HashSet::new();
        none.insert("z".to_string());
        assert!(!contains_any(&tree, &none));
    }

    #[test]
    fn min_subtree_extracts_only_resolvable_conjuncts() {
        let tree = and(var("a"), and(var("b"), var("c")));
        let mut aliases = HashSet::new();
        aliases.insert("a".to_string());
        aliases.insert("c".to_string());

        let extracted = min_subtree(&tree, &aliases).unwrap();
        let parts = split_conjuncts(&extracted);
        assert_eq!(parts.len(), 2);
        assert!(parts.contains(&var("a")));
        assert!(parts.contains(&var("c")));
    }

    #[test]
    fn min_subtree_is_pure_and_leaves_tree_untouched() {
        let tree = and(var("a"), var("b"));
        let mut aliases = HashSet::new();
        aliases.insert("a".to_string());
        let _ = min_subtree(&tree, &aliases);
        assert_eq!(split_conjuncts(&tree).len(), 2);
    }

    #[test]
    fn remove_predicates_prunes_resolvable_conjuncts() {
        let tree = and(var("a"), var("b"));
        let mut aliases = HashSet::new();
        aliases.insert("a".to_string());

        let residual = remove_predicates(&tree, &aliases).unwrap();
        assert_eq!(residual, var("b"));
    }

    #[test]
    fn remove_predicates_can_empty_the_tree() {
        let tree = and(var("a"), var("b"));
        let mut aliases = HashSet::new();
        aliases.insert("a".to_string());
        aliases.insert("b".to_string());
        assert!(remove_predicates(&tree, &aliases).is_none());
    }

    #[test]
    fn eval_binary_comparison() {
        let row = Row::new();
        let expr = Expr::Binary {
            left: Box::new(Expr::Literal(Literal::Integer(2))),
            op: BinaryOp::Lt,
            right: Box::new(Expr::Literal(Literal::Integer(3))),
        };
        assert_eq!(eval_expr(&expr, &row).unwrap(), Value::Bool(true));
    }
}
