//! The solver abstraction the engine programs against.

use std::collections::BTreeMap;

use cadenza_base::Variable;
use cadenza_term::{Expr, Rational};

use crate::ir::SmtExpr;

/// Verdict of a satisfiability check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtResult {
    /// A satisfying assignment exists.
    Sat,
    /// No satisfying assignment exists.
    Unsat,
    /// The backend could not decide (timeout, nonlinearity, incompleteness).
    /// Callers must treat this as a failed side condition, never as evidence.
    Unknown,
}

/// A satisfying assignment, mapping variables to rational values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Model {
    values: BTreeMap<Variable, Rational>,
}

impl Model {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of `v`.
    pub fn set(&mut self, v: Variable, value: Rational) {
        self.values.insert(v, value);
    }

    /// The value of `v`, if assigned.
    pub fn get(&self, v: Variable) -> Option<&Rational> {
        self.values.get(&v)
    }

    /// The value of `v` as an expression constant, defaulting to zero for
    /// unassigned variables (solvers leave don't-care variables out).
    pub fn value_expr(&self, v: Variable) -> Expr {
        match self.values.get(&v) {
            Some(r) => Expr::constant(r.clone()),
            None => Expr::zero(),
        }
    }

    /// Iterates over the assignments in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (Variable, &Rational)> {
        self.values.iter().map(|(v, r)| (*v, r))
    }
}

/// An incremental SMT solver.
///
/// The engine creates one solver per batch of related queries, loads the
/// standing hypotheses with [`add`](Self::add), and explores alternatives
/// with [`push`](Self::push)/[`pop`](Self::pop), mirroring the classic
/// assert–check–pop discipline.
pub trait SmtSolver {
    /// Asserts a formula in the current frame.
    fn add(&mut self, e: SmtExpr);

    /// Opens a backtracking point.
    fn push(&mut self);

    /// Discards all assertions since the matching [`push`](Self::push).
    fn pop(&mut self);

    /// Checks satisfiability of all asserted formulas.
    fn check(&mut self) -> SmtResult;

    /// The model of the most recent [`Sat`](SmtResult::Sat) check, if the
    /// backend produced one. Invalidated by any later assertion.
    fn model(&self) -> Option<&Model>;

    /// Sets the per-check timeout. Backends without timeouts ignore this.
    fn set_timeout(&mut self, millis: u64);
}

/// Produces fresh, independent solvers.
///
/// Factories let the engine stay generic over the backend while still
/// creating one solver per proof obligation batch.
pub trait SolverFactory {
    /// The solver type this factory produces.
    type Solver: SmtSolver;

    /// A fresh solver with no assertions.
    fn solver(&self) -> Self::Solver;
}
