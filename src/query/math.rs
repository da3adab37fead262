//! Module implement arithmetic terms over column values.
//!
//! A [MathTerm] is a pure expression tree, numbers, column references and
//! the usual operators and standard functions. Terms evaluate row by row
//! against a column-value lookup and never side-effect. Constant folding
//! and inverse-function cancellation happen in [MathTerm::fold].

use std::{collections::BTreeSet, fmt, result};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    BitOr,
    BitAnd,
}

impl BinOp {
    pub(crate) fn is_commutable(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::BitOr | BinOp::BitAnd)
    }

    fn apply(&self, l: f64, r: f64) -> f64 {
        match self {
            BinOp::Add => l + r,
            BinOp::Sub => l - r,
            BinOp::Mul => l * r,
            BinOp::Div => l / r,
            BinOp::Rem => l % r,
            BinOp::Pow => l.powf(r),
            BinOp::BitOr => ((l as i64) | (r as i64)) as f64,
            BinOp::BitAnd => ((l as i64) & (r as i64)) as f64,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::BitOr => "|",
            BinOp::BitAnd => "&",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Func1 {
    Acos,
    Asin,
    Atan,
    Ceil,
    Cos,
    Cosh,
    Exp,
    Fabs,
    Floor,
    Log,
    Log10,
    Round,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
    Trunc,
}

impl Func1 {
    fn apply(&self, v: f64) -> f64 {
        match self {
            Func1::Acos => v.acos(),
            Func1::Asin => v.asin(),
            Func1::Atan => v.atan(),
            Func1::Ceil => v.ceil(),
            Func1::Cos => v.cos(),
            Func1::Cosh => v.cosh(),
            Func1::Exp => v.exp(),
            Func1::Fabs => v.abs(),
            Func1::Floor => v.floor(),
            Func1::Log => v.ln(),
            Func1::Log10 => v.log10(),
            Func1::Round => v.round(),
            Func1::Sin => v.sin(),
            Func1::Sinh => v.sinh(),
            Func1::Sqrt => v.sqrt(),
            Func1::Tan => v.tan(),
            Func1::Tanh => v.tanh(),
            Func1::Trunc => v.trunc(),
        }
    }

    // outer(inner(x)) == x on the inner function's range
    fn inverse_of(&self, inner: Func1) -> bool {
        matches!(
            (self, inner),
            (Func1::Cos, Func1::Acos)
                | (Func1::Sin, Func1::Asin)
                | (Func1::Tan, Func1::Atan)
                | (Func1::Exp, Func1::Log)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Func2 {
    Atan2,
    Fmod,
    Max,
    Min,
    Pow,
}

impl Func2 {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Func2::Atan2 => a.atan2(b),
            Func2::Fmod => a % b,
            Func2::Max => a.max(b),
            Func2::Min => a.min(b),
            Func2::Pow => a.powf(b),
        }
    }
}

/// Arithmetic term over column values.
#[derive(Clone, Debug, PartialEq)]
pub enum MathTerm {
    Number(f64),
    Variable(String),
    Bin {
        op: BinOp,
        left: Box<MathTerm>,
        right: Box<MathTerm>,
    },
    Neg(Box<MathTerm>),
    Func1 {
        func: Func1,
        arg: Box<MathTerm>,
    },
    Func2 {
        func: Func2,
        first: Box<MathTerm>,
        second: Box<MathTerm>,
    },
}

impl fmt::Display for MathTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            MathTerm::Number(v) => write!(f, "{}", v),
            MathTerm::Variable(name) => write!(f, "{}", name),
            MathTerm::Bin { op, left, right } => {
                write!(f, "({} {} {})", left, op, right)
            }
            MathTerm::Neg(t) => write!(f, "(-{})", t),
            MathTerm::Func1 { func, arg } => {
                write!(f, "{}({})", format!("{:?}", func).to_lowercase(), arg)
            }
            MathTerm::Func2 { func, first, second } => {
                write!(
                    f,
                    "{}({}, {})",
                    format!("{:?}", func).to_lowercase(),
                    first,
                    second
                )
            }
        }
    }
}

impl MathTerm {
    pub fn number(val: f64) -> MathTerm {
        MathTerm::Number(val)
    }

    pub fn variable(name: &str) -> MathTerm {
        MathTerm::Variable(name.to_string())
    }

    pub fn bin(op: BinOp, left: MathTerm, right: MathTerm) -> MathTerm {
        MathTerm::Bin { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn neg(term: MathTerm) -> MathTerm {
        MathTerm::Neg(Box::new(term))
    }

    pub fn func1(func: Func1, arg: MathTerm) -> MathTerm {
        MathTerm::Func1 { func, arg: Box::new(arg) }
    }

    pub fn func2(func: Func2, first: MathTerm, second: MathTerm) -> MathTerm {
        MathTerm::Func2 {
            func,
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Evaluate against a row, `lookup` resolves a column name to the
    /// row's value. Unknown names fail with `UnknownColumn`.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let val = match self {
            MathTerm::Number(v) => *v,
            MathTerm::Variable(name) => match lookup(name) {
                Some(v) => v,
                None => return err_at!(UnknownColumn, msg: "{}", name),
            },
            MathTerm::Bin { op, left, right } => {
                op.apply(left.eval(lookup)?, right.eval(lookup)?)
            }
            MathTerm::Neg(t) => -t.eval(lookup)?,
            MathTerm::Func1 { func, arg } => func.apply(arg.eval(lookup)?),
            MathTerm::Func2 { func, first, second } => {
                func.apply(first.eval(lookup)?, second.eval(lookup)?)
            }
        };
        Ok(val)
    }

    pub fn is_constant(&self) -> bool {
        match self {
            MathTerm::Number(_) => true,
            MathTerm::Variable(_) => false,
            MathTerm::Bin { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            MathTerm::Neg(t) => t.is_constant(),
            MathTerm::Func1 { arg, .. } => arg.is_constant(),
            MathTerm::Func2 { first, second, .. } => {
                first.is_constant() && second.is_constant()
            }
        }
    }

    /// Names of the columns the term reads.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            MathTerm::Number(_) => (),
            MathTerm::Variable(name) => {
                out.insert(name.clone());
            }
            MathTerm::Bin { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            MathTerm::Neg(t) => t.collect_variables(out),
            MathTerm::Func1 { arg, .. } => arg.collect_variables(out),
            MathTerm::Func2 { first, second, .. } => {
                first.collect_variables(out);
                second.collect_variables(out);
            }
        }
    }

    /// Constant-fold the term. With `preserve` false, compositions of
    /// exact inverse functions cancel as well.
    pub fn fold(self, preserve: bool) -> MathTerm {
        let term = match self {
            MathTerm::Bin { op, left, right } => {
                MathTerm::bin(op, left.fold(preserve), right.fold(preserve))
            }
            MathTerm::Neg(t) => MathTerm::neg(t.fold(preserve)),
            MathTerm::Func1 { func, arg } => {
                MathTerm::func1(func, arg.fold(preserve))
            }
            MathTerm::Func2 { func, first, second } => {
                MathTerm::func2(func, first.fold(preserve), second.fold(preserve))
            }
            term => term,
        };

        let none = |_: &str| -> Option<f64> { None };
        match term {
            term if term.is_constant() => match term.eval(&none) {
                Ok(v) => MathTerm::Number(v),
                Err(_) => term,
            },
            MathTerm::Func1 { func, arg } => match *arg {
                MathTerm::Func1 { func: inner, arg: x }
                    if !preserve && func.inverse_of(inner) =>
                {
                    *x
                }
                arg => MathTerm::func1(func, arg),
            },
            MathTerm::Neg(t) => match *t {
                MathTerm::Neg(x) => *x,
                t => MathTerm::neg(t),
            },
            term => term,
        }
    }

    /// Detect the shape `a*x + b` over a single variable, returning
    /// `(x, a, b)` with `a` non-zero.
    pub fn as_affine(&self) -> Option<(String, f64, f64)> {
        let affine = affine_parts(self)?;
        match affine {
            (Some(var), a, b) if a != 0.0 => Some((var, a, b)),
            _ => None,
        }
    }
}

// (variable, multiplier, offset); variable None for pure constants.
fn affine_parts(term: &MathTerm) -> Option<(Option<String>, f64, f64)> {
    match term {
        MathTerm::Number(v) => Some((None, 0.0, *v)),
        MathTerm::Variable(name) => Some((Some(name.clone()), 1.0, 0.0)),
        MathTerm::Neg(t) => {
            let (var, a, b) = affine_parts(t)?;
            Some((var, -a, -b))
        }
        MathTerm::Bin { op, left, right } => {
            let (lv, la, lb) = affine_parts(left)?;
            let (rv, ra, rb) = affine_parts(right)?;
            let var = match (lv, rv) {
                (Some(l), Some(r)) if l == r => Some(l),
                (Some(_), Some(_)) => return None,
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (None, None) => None,
            };
            match op {
                BinOp::Add => Some((var, la + ra, lb + rb)),
                BinOp::Sub => Some((var, la - ra, lb - rb)),
                BinOp::Mul if la == 0.0 => Some((var, lb * ra, lb * rb)),
                BinOp::Mul if ra == 0.0 => Some((var, la * rb, lb * rb)),
                BinOp::Div if ra == 0.0 && rb != 0.0 => {
                    Some((var, la / rb, lb / rb))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "math_test.rs"]
mod math_test;
