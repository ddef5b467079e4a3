//! Formula syntax tree and evaluation.

use std::collections::BTreeSet;

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// Applies the operator, returning `None` (undefined) for division by zero
    /// and for results that are not finite.
    fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        let value = match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => {
                if rhs == 0.0 {
                    return None;
                }
                lhs / rhs
            }
        };
        value.is_finite().then_some(value)
    }

    /// Binding strength; higher binds tighter.
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }

    pub(crate) fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
        }
    }
}

/// Parsed calculation formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    Literal(f64),
    /// Reference to another field of the same page type
    Variable(String),
    /// Unary minus
    Negate(Box<Expr>),
    /// Binary arithmetic
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Returns every field name the formula reads.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(name) => {
                names.insert(name.as_str());
            }
            Expr::Negate(inner) => inner.collect_variables(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(names);
                rhs.collect_variables(names);
            }
        }
    }

    /// Evaluates the formula left to right.
    ///
    /// `lookup` resolves a variable to its numeric input; `None` is the
    /// undefined marker and propagates through every enclosing operation.
    ///
    /// # Returns
    /// `Some(value)` for a finite result, `None` when undefined.
    pub fn evaluate<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Literal(value) => Some(*value),
            Expr::Variable(name) => lookup(name),
            Expr::Negate(inner) => inner.evaluate(lookup).map(|v| -v),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.evaluate(lookup)?;
                let rhs = rhs.evaluate(lookup)?;
                op.apply(lhs, rhs)
            }
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Negate(inner) => match inner.as_ref() {
                Expr::Binary { .. } => write!(f, "-({})", inner),
                _ => write!(f, "-{}", inner),
            },
            Expr::Binary { op, lhs, rhs } => {
                fmt_operand(f, lhs, op.precedence(), false)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(f, rhs, op.precedence(), true)
            }
        }
    }
}

// Parenthesizes an operand only where precedence or left associativity requires it.
fn fmt_operand(
    f: &mut std::fmt::Formatter<'_>,
    operand: &Expr,
    parent: u8,
    is_rhs: bool,
) -> std::fmt::Result {
    match operand {
        Expr::Binary { op, .. }
            if op.precedence() < parent || (is_rhs && op.precedence() == parent) =>
        {
            write!(f, "({})", operand)
        }
        _ => write!(f, "{}", operand),
    }
}
