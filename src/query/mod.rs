//! Module implement the query expression tree.
//!
//! Queries arrive as trees of [QueryExpr] nodes, logical operators over
//! range predicates on columns, plus arithmetic comparisons built from
//! [MathTerm]. Trees are immutable, [simplify] and [reorder] return a new
//! root rather than rewriting in place.
//!
//! Continuous ranges are canonicalized at construction into the half-open
//! form `lower <= column < upper`. A strict lower bound `a < x` becomes
//! `a+e <= x` and an inclusive upper bound `x <= b` becomes `x < b+e`,
//! where `e` steps to the next representable double.

mod math;

pub use math::{BinOp, Func1, Func2, MathTerm};

use std::{fmt, result};

use crate::config;

/// Comparison operators usable in range predicates. `Lt` is strict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Undefined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
    AndNot,
}

impl LogicalOp {
    fn is_commutable(&self) -> bool {
        matches!(self, LogicalOp::And | LogicalOp::Or | LogicalOp::Xor)
    }
}

// smallest representable step above `v`.
pub(crate) fn next_up(v: f64) -> f64 {
    if v.is_nan() || v == f64::INFINITY {
        v
    } else if v == 0.0 {
        f64::from_bits(1)
    } else if v.is_sign_positive() {
        f64::from_bits(v.to_bits() + 1)
    } else {
        f64::from_bits(v.to_bits() - 1)
    }
}

/// Range predicate over one column, canonical form `lower <= col < upper`.
/// Pure equality keeps `Eq` as its left operator.
#[derive(Clone, Debug, PartialEq)]
pub struct ContinuousRange {
    pub col: String,
    pub left_op: CompOp,
    pub lower: f64,
    pub right_op: CompOp,
    pub upper: f64,
}

impl fmt::Display for ContinuousRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self.left_op {
            CompOp::Eq => write!(f, "{} == {}", self.col, self.lower),
            _ => write!(f, "{} <= {} < {}", self.lower, self.col, self.upper),
        }
    }
}

impl ContinuousRange {
    /// General constructor, `lower lop col` and `col rop upper`, with
    /// `Undefined` marking an absent side. The stored form is canonical.
    pub fn new(
        lower: f64,
        lop: CompOp,
        col: &str,
        rop: CompOp,
        upper: f64,
    ) -> ContinuousRange {
        let (left_op, lower) = match lop {
            CompOp::Lt => (CompOp::Le, next_up(lower)),
            CompOp::Le => (CompOp::Le, lower),
            CompOp::Eq => {
                return ContinuousRange {
                    col: col.to_string(),
                    left_op: CompOp::Eq,
                    lower,
                    right_op: CompOp::Undefined,
                    upper: lower,
                }
            }
            _ => (CompOp::Le, f64::NEG_INFINITY),
        };
        let (right_op, upper) = match rop {
            CompOp::Lt => (CompOp::Lt, upper),
            CompOp::Le => (CompOp::Lt, next_up(upper)),
            CompOp::Eq => {
                return ContinuousRange {
                    col: col.to_string(),
                    left_op: CompOp::Eq,
                    lower: upper,
                    right_op: CompOp::Undefined,
                    upper,
                }
            }
            _ => (CompOp::Lt, f64::INFINITY),
        };
        ContinuousRange { col: col.to_string(), left_op, lower, right_op, upper }
    }

    /// `col == val`
    pub fn eq(col: &str, val: f64) -> ContinuousRange {
        ContinuousRange::new(val, CompOp::Eq, col, CompOp::Undefined, val)
    }

    /// `col < val`
    pub fn lt(col: &str, val: f64) -> ContinuousRange {
        ContinuousRange::new(
            f64::NEG_INFINITY,
            CompOp::Undefined,
            col,
            CompOp::Lt,
            val,
        )
    }

    /// `col <= val`
    pub fn le(col: &str, val: f64) -> ContinuousRange {
        ContinuousRange::new(
            f64::NEG_INFINITY,
            CompOp::Undefined,
            col,
            CompOp::Le,
            val,
        )
    }

    /// `col > val`
    pub fn gt(col: &str, val: f64) -> ContinuousRange {
        ContinuousRange::new(val, CompOp::Lt, col, CompOp::Undefined, f64::INFINITY)
    }

    /// `col >= val`
    pub fn ge(col: &str, val: f64) -> ContinuousRange {
        ContinuousRange::new(val, CompOp::Le, col, CompOp::Undefined, f64::INFINITY)
    }

    /// `lo <= col <= hi`, both ends inclusive.
    pub fn between(col: &str, lo: f64, hi: f64) -> ContinuousRange {
        ContinuousRange::new(lo, CompOp::Le, col, CompOp::Le, hi)
    }

    /// An unsatisfiable range on `col`.
    pub fn empty(col: &str) -> ContinuousRange {
        ContinuousRange {
            col: col.to_string(),
            left_op: CompOp::Le,
            lower: f64::INFINITY,
            right_op: CompOp::Lt,
            upper: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.left_op {
            CompOp::Eq => self.lower.is_nan(),
            _ => !(self.lower < self.upper),
        }
    }

    /// Whether `val` satisfies the predicate.
    pub fn contains(&self, val: f64) -> bool {
        match self.left_op {
            CompOp::Eq => val == self.lower,
            _ => self.lower <= val && val < self.upper,
        }
    }

    // intersection of two canonical ranges on the same column.
    fn intersect(&self, other: &ContinuousRange) -> ContinuousRange {
        debug_assert_eq!(self.col, other.col);
        match (self.left_op, other.left_op) {
            (CompOp::Eq, _) if other.contains(self.lower) => self.clone(),
            (CompOp::Eq, _) => ContinuousRange::empty(&self.col),
            (_, CompOp::Eq) if self.contains(other.lower) => other.clone(),
            (_, CompOp::Eq) => ContinuousRange::empty(&self.col),
            _ => ContinuousRange {
                col: self.col.clone(),
                left_op: CompOp::Le,
                lower: self.lower.max(other.lower),
                right_op: CompOp::Lt,
                upper: self.upper.min(other.upper),
            },
        }
    }
}

/// Membership predicate over one column, `col IN values`.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteRange {
    pub col: String,
    pub values: Vec<f64>, // ascending, unique
}

impl DiscreteRange {
    /// Values are sorted and deduplicated here.
    pub fn new(col: &str, mut values: Vec<f64>) -> DiscreteRange {
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        DiscreteRange { col: col.to_string(), values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop values outside `[lo, hi]`.
    pub fn restrict_range(&mut self, lo: f64, hi: f64) {
        self.values.retain(|v| *v >= lo && *v <= hi);
    }
}

/// Arithmetic comparison, an optional bound on either side of a term.
#[derive(Clone, Debug, PartialEq)]
pub struct CompRange {
    pub left: Option<(Box<MathTerm>, CompOp)>,
    pub term: Box<MathTerm>,
    pub right: Option<(CompOp, Box<MathTerm>)>,
}

impl CompRange {
    /// `lhs op rhs`
    pub fn cmp(lhs: MathTerm, op: CompOp, rhs: MathTerm) -> CompRange {
        CompRange {
            left: None,
            term: Box::new(lhs),
            right: Some((op, Box::new(rhs))),
        }
    }

    /// `left lop term rop right`
    pub fn bounds(
        left: MathTerm,
        lop: CompOp,
        term: MathTerm,
        rop: CompOp,
        right: MathTerm,
    ) -> CompRange {
        CompRange {
            left: Some((Box::new(left), lop)),
            term: Box::new(term),
            right: Some((rop, Box::new(right))),
        }
    }
}

/// Equi-join shaped condition between two columns. Carried through
/// simplification, evaluation is not supported by a single partition.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub left_col: String,
    pub right_col: String,
    pub term: Option<Box<MathTerm>>,
}

/// Query expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryExpr {
    Logical {
        op: LogicalOp,
        left: Box<QueryExpr>,
        right: Box<QueryExpr>,
    },
    Not(Box<QueryExpr>),
    Range(ContinuousRange),
    Discrete(DiscreteRange),
    StringEq {
        col: String,
        value: String,
    },
    AnyString {
        col: String,
        values: Vec<String>,
    },
    AnyOf {
        prefix: String,
        values: Vec<f64>,
    },
    Comp(CompRange),
    Join(JoinSpec),
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            QueryExpr::Logical { op, left, right } => {
                let s = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                    LogicalOp::Xor => "XOR",
                    LogicalOp::AndNot => "ANDNOT",
                };
                write!(f, "({} {} {})", left, s, right)
            }
            QueryExpr::Not(t) => write!(f, "(NOT {})", t),
            QueryExpr::Range(range) => write!(f, "{}", range),
            QueryExpr::Discrete(d) => write!(f, "{} IN {:?}", d.col, d.values),
            QueryExpr::StringEq { col, value } => write!(f, "{} == {:?}", col, value),
            QueryExpr::AnyString { col, values } => {
                write!(f, "{} IN {:?}", col, values)
            }
            QueryExpr::AnyOf { prefix, values } => {
                write!(f, "ANY({}) IN {:?}", prefix, values)
            }
            QueryExpr::Comp(c) => {
                if let Some((l, lop)) = &c.left {
                    write!(f, "{} {:?} ", l, lop)?;
                }
                write!(f, "{}", c.term)?;
                if let Some((rop, r)) = &c.right {
                    write!(f, " {:?} {}", rop, r)?;
                }
                Ok(())
            }
            QueryExpr::Join(j) => write!(f, "{} JOIN {}", j.left_col, j.right_col),
        }
    }
}

impl QueryExpr {
    pub fn and(left: QueryExpr, right: QueryExpr) -> QueryExpr {
        QueryExpr::Logical {
            op: LogicalOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: QueryExpr, right: QueryExpr) -> QueryExpr {
        QueryExpr::Logical {
            op: LogicalOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn xor(left: QueryExpr, right: QueryExpr) -> QueryExpr {
        QueryExpr::Logical {
            op: LogicalOp::Xor,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn andnot(left: QueryExpr, right: QueryExpr) -> QueryExpr {
        QueryExpr::Logical {
            op: LogicalOp::AndNot,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: QueryExpr) -> QueryExpr {
        QueryExpr::Not(Box::new(expr))
    }

    // provably unsatisfiable node.
    fn is_empty_node(&self) -> bool {
        match self {
            QueryExpr::Range(range) => range.is_empty(),
            QueryExpr::Discrete(d) => d.is_empty(),
            QueryExpr::AnyString { values, .. } => values.is_empty(),
            QueryExpr::AnyOf { values, .. } => values.is_empty(),
            _ => false,
        }
    }

    // a terminal the index machinery answers directly.
    fn is_direct_eval(&self) -> bool {
        matches!(
            self,
            QueryExpr::Range(_)
                | QueryExpr::Discrete(_)
                | QueryExpr::StringEq { .. }
                | QueryExpr::AnyString { .. }
        )
    }
}

/// Simplify `expr`, honoring the configured
/// [preservation][crate::Config::preserve_input_expressions] of written
/// arithmetic.
pub fn simplify(expr: QueryExpr) -> QueryExpr {
    simplify_with(expr, config::current().preserve_input_expressions)
}

/// Simplify `expr`. Pure and idempotent: empty operands prune their
/// parent, range predicates on the same column fuse under AND, affine
/// arithmetic comparisons reduce to plain ranges and math terms fold.
pub fn simplify_with(expr: QueryExpr, preserve: bool) -> QueryExpr {
    match expr {
        QueryExpr::Not(t) => QueryExpr::not(simplify_with(*t, preserve)),
        QueryExpr::Logical { op, left, right } => {
            let left = simplify_with(*left, preserve);
            let right = simplify_with(*right, preserve);
            simplify_logical(op, left, right)
        }
        QueryExpr::Comp(comp) => simplify_comp(comp, preserve),
        expr => expr,
    }
}

fn simplify_logical(op: LogicalOp, left: QueryExpr, right: QueryExpr) -> QueryExpr {
    match op {
        LogicalOp::And => {
            if left.is_empty_node() {
                return left;
            }
            if right.is_empty_node() {
                return right;
            }
            match (left, right) {
                (QueryExpr::Range(a), QueryExpr::Range(b)) if a.col == b.col => {
                    QueryExpr::Range(a.intersect(&b))
                }
                (left, right) => QueryExpr::and(left, right),
            }
        }
        LogicalOp::Or => match (left.is_empty_node(), right.is_empty_node()) {
            (true, _) => right,
            (_, true) => left,
            _ => QueryExpr::or(left, right),
        },
        op => QueryExpr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}

// bound on the middle term, as seen from the term's side.
enum Bound {
    Lower(f64, CompOp), // value `op` term, with op in {Lt, Le}
    Upper(f64, CompOp), // term `op` value, with op in {Lt, Le}
    Exact(f64),
}

fn to_bound(val: f64, op: CompOp, term_on_right: bool) -> Option<Bound> {
    // term_on_right: the comparison reads `val op term`
    let bound = match (op, term_on_right) {
        (CompOp::Lt, true) | (CompOp::Gt, false) => Bound::Lower(val, CompOp::Lt),
        (CompOp::Le, true) | (CompOp::Ge, false) => Bound::Lower(val, CompOp::Le),
        (CompOp::Lt, false) | (CompOp::Gt, true) => Bound::Upper(val, CompOp::Lt),
        (CompOp::Le, false) | (CompOp::Ge, true) => Bound::Upper(val, CompOp::Le),
        (CompOp::Eq, _) => Bound::Exact(val),
        (CompOp::Undefined, _) => return None,
    };
    Some(bound)
}

// reduce `l lop (a*x + b) rop r` with constant bounds into a range on x.
fn simplify_comp(comp: CompRange, preserve: bool) -> QueryExpr {
    let term = comp.term.fold(preserve);
    let left = comp.left.map(|(t, op)| (Box::new(t.fold(preserve)), op));
    let right = comp.right.map(|(op, t)| (op, Box::new(t.fold(preserve))));

    let affine = term.as_affine();
    let lc = left.as_ref().map(|(t, _)| t.is_constant()).unwrap_or(true);
    let rc = right.as_ref().map(|(_, t)| t.is_constant()).unwrap_or(true);

    let (var, a, b) = match affine {
        Some(parts) if lc && rc && (left.is_some() || right.is_some()) => parts,
        _ => {
            return QueryExpr::Comp(CompRange {
                left,
                term: Box::new(term),
                right,
            })
        }
    };

    let none = |_: &str| -> Option<f64> { None };
    // map a bound on the term into a bound on x, `v op a*x+b` becomes
    // `(v-b)/a op x`, the bound switching sides when a is negative.
    let map_bound = |bound: Bound| -> Bound {
        match bound {
            Bound::Exact(v) => Bound::Exact((v - b) / a),
            Bound::Lower(v, op) if a > 0.0 => Bound::Lower((v - b) / a, op),
            Bound::Lower(v, op) => Bound::Upper((v - b) / a, op),
            Bound::Upper(v, op) if a > 0.0 => Bound::Upper((v - b) / a, op),
            Bound::Upper(v, op) => Bound::Lower((v - b) / a, op),
        }
    };

    let mut lower: Option<(f64, CompOp)> = None;
    let mut upper: Option<(f64, CompOp)> = None;
    let mut exact: Option<f64> = None;
    let mut conflict = false;

    let bounds = vec![
        left.as_ref().and_then(|(t, op)| {
            to_bound(t.eval(&none).unwrap_or(f64::NAN), *op, true)
        }),
        right.as_ref().and_then(|(op, t)| {
            to_bound(t.eval(&none).unwrap_or(f64::NAN), *op, false)
        }),
    ];
    for bound in bounds.into_iter().flatten() {
        match map_bound(bound) {
            Bound::Lower(v, op) if lower.is_none() => lower = Some((v, op)),
            Bound::Upper(v, op) if upper.is_none() => upper = Some((v, op)),
            Bound::Exact(v) if exact.is_none() => exact = Some(v),
            _ => conflict = true, // two bounds on the same side
        }
    }

    if conflict || (exact.is_some() && (lower.is_some() || upper.is_some())) {
        return QueryExpr::Comp(CompRange { left, term: Box::new(term), right });
    }
    let range = match exact {
        Some(v) => ContinuousRange::eq(&var, v),
        None => {
            let (lo, lop) = lower.unwrap_or((f64::NEG_INFINITY, CompOp::Undefined));
            let (hi, rop) = upper.unwrap_or((f64::INFINITY, CompOp::Undefined));
            ContinuousRange::new(lo, lop, &var, rop, hi)
        }
    };
    QueryExpr::Range(range)
}

/// Estimated evaluation weight of a subexpression, used by [reorder].
pub trait Weight {
    fn weight(&self, expr: &QueryExpr) -> f64;
}

/// Weight by node count, a neutral default when no index costs are known.
pub struct NodeCount;

impl Weight for NodeCount {
    fn weight(&self, expr: &QueryExpr) -> f64 {
        match expr {
            QueryExpr::Logical { left, right, .. } => {
                1.0 + self.weight(left) + self.weight(right)
            }
            QueryExpr::Not(t) => 1.0 + self.weight(t),
            _ => 1.0,
        }
    }
}

/// Reorder commutable operators so that the heaviest subexpression sits
/// rightmost, evaluated last, and directly evaluable terminals migrate
/// left. Returns a new root.
pub fn reorder<W>(expr: QueryExpr, w: &W) -> QueryExpr
where
    W: Weight,
{
    match expr {
        QueryExpr::Logical { op, left, right } if op.is_commutable() => {
            let mut terms = vec![];
            flatten(op, *left, &mut terms);
            flatten(op, *right, &mut terms);
            let mut terms: Vec<QueryExpr> =
                terms.into_iter().map(|t| reorder(t, w)).collect();

            // ascending weight; direct-eval operands first on ties
            terms.sort_by(|a, b| {
                let (wa, wb) = (w.weight(a), w.weight(b));
                wa.partial_cmp(&wb)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.is_direct_eval().cmp(&a.is_direct_eval()))
            });

            let mut it = terms.into_iter();
            let first = it.next().expect("commutable node has operands");
            it.fold(first, |acc, t| QueryExpr::Logical {
                op,
                left: Box::new(acc),
                right: Box::new(t),
            })
        }
        QueryExpr::Logical { op, left, right } => QueryExpr::Logical {
            op,
            left: Box::new(reorder(*left, w)),
            right: Box::new(reorder(*right, w)),
        },
        QueryExpr::Not(t) => QueryExpr::not(reorder(*t, w)),
        expr => expr,
    }
}

fn flatten(op: LogicalOp, expr: QueryExpr, out: &mut Vec<QueryExpr>) {
    match expr {
        QueryExpr::Logical { op: o, left, right } if o == op => {
            flatten(op, *left, out);
            flatten(op, *right, out);
        }
        expr => out.push(expr),
    }
}
