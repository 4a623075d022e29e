//! Solver-neutral intermediate representation.
//!
//! A lightweight AST decoupled from the term kernel, so that backends only
//! ever see machine-sized constants and explicitly sorted variables. The
//! [`Encoder`](crate::encode::Encoder) is the single producer.

use cadenza_base::Variable;

/// The sort of an IR variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SmtSort {
    /// Integer-sorted.
    Int,
    /// Rational-sorted.
    Real,
}

/// Binary operations of the IR.
///
/// Grouped by category:
/// - **Arithmetic** (`Add`, `Sub`, `Mul`, `Pow`): numeric × numeric → numeric
/// - **Comparison** (`Eq`, `Ne`, `Lt`, `Le`, `Gt`, `Ge`): numeric × numeric → bool
/// - **Logic** (`And`, `Or`): bool × bool → bool
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SmtOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Exponentiation; only emitted for powers the encoder did not unfold.
    Pow,
    /// Equality.
    Eq,
    /// Disequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Conjunction.
    And,
    /// Disjunction.
    Or,
}

impl SmtOp {
    /// `true` for the six comparison operators.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            SmtOp::Eq | SmtOp::Ne | SmtOp::Lt | SmtOp::Le | SmtOp::Gt | SmtOp::Ge
        )
    }
}

/// An IR formula or term.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SmtExpr {
    /// Integer literal.
    Int(i64),
    /// Rational literal `numer / denom` with `denom > 0`.
    Real(i64, i64),
    /// Boolean literal.
    Bool(bool),
    /// Sorted variable.
    Var(Variable, SmtSort),
    /// Binary operation.
    Binary {
        /// The operator.
        op: SmtOp,
        /// Left operand.
        left: Box<SmtExpr>,
        /// Right operand.
        right: Box<SmtExpr>,
    },
    /// Logical negation.
    Not(Box<SmtExpr>),
}

impl SmtExpr {
    /// An integer literal.
    pub fn int(n: i64) -> Self {
        SmtExpr::Int(n)
    }

    /// A sorted variable.
    pub fn var(v: Variable, sort: SmtSort) -> Self {
        SmtExpr::Var(v, sort)
    }

    /// A binary operation.
    pub fn binary(op: SmtOp, left: SmtExpr, right: SmtExpr) -> Self {
        SmtExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Logical negation.
    pub fn not(e: SmtExpr) -> Self {
        SmtExpr::Not(Box::new(e))
    }

    /// Left-fold of `op` over at least one operand.
    pub fn fold(op: SmtOp, mut operands: Vec<SmtExpr>) -> Self {
        debug_assert!(!operands.is_empty());
        operands.reverse();
        let mut acc = operands.pop().expect("fold needs at least one operand");
        while let Some(next) = operands.pop() {
            acc = SmtExpr::binary(op, acc, next);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_chains_left() {
        let e = SmtExpr::fold(
            SmtOp::Add,
            vec![SmtExpr::int(1), SmtExpr::int(2), SmtExpr::int(3)],
        );
        match e {
            SmtExpr::Binary { op: SmtOp::Add, left, right } => {
                assert_eq!(*right, SmtExpr::int(3));
                assert!(matches!(*left, SmtExpr::Binary { op: SmtOp::Add, .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }
}
