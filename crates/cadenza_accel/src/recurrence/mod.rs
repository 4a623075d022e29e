//! Closed forms for iterated updates.
//!
//! Per variable, in dependency order, the driver sets up the scalar
//! recurrence `x(n) = rhs[x ← x(n−1)]` with `x(0)` the pre-loop value and
//! asks the [`RecurrenceSolver`] oracle for a closed form. Previously solved
//! variables are substituted into later right-hand sides shifted back by one
//! step (`n ↦ n − 1`), because an update reads its dependencies' values
//! *before* the current iteration.
//!
//! The cost accumulator is handled the same way (`c(n) = c(n−1) + step`,
//! `c(0) = 0`); when no exact solution exists a sound lower bound is
//! accepted, since under-approximating cost is safe for complexity proofs.

mod poly_solver;

pub use poly_solver::PolySolver;

use cadenza_base::Variable;
use cadenza_term::{Expr, Subs};

use crate::error::AccelError;
use crate::rule::Update;

/// Outcome of one scalar recurrence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScalarSolution {
    /// An exact closed form, valid for all `n ≥ validity_bound`.
    Exact {
        /// The closed form, over the initial variable values and `n`.
        closed: Expr,
        /// Smallest `n` for which the closed form is sound.
        validity_bound: u32,
    },
    /// A sound lower bound (cost recurrences only).
    LowerBound {
        /// The lower-bound closed form.
        closed: Expr,
        /// Smallest `n` for which the bound is sound.
        validity_bound: u32,
    },
    /// The oracle gave up.
    TooComplex,
}

/// The recurrence oracle.
///
/// Implementations are black boxes to the driver; the built-in
/// [`PolySolver`] covers linear recurrences with constant coefficients, and
/// a test harness can substitute anything else.
pub trait RecurrenceSolver {
    /// Solves `x(n) = rhs[x ← x(n−1)]` with `x(0) = x`, where occurrences
    /// of `lhs` in `rhs` denote the value at `n − 1` and every other
    /// variable is constant with respect to the recurrence.
    fn solve_update(&self, rhs: &Expr, lhs: Variable, n: Variable) -> ScalarSolution;

    /// Solves the cost accumulator `c(n) = c(n−1) + step(n)` with
    /// `c(0) = 0`. A [`ScalarSolution::LowerBound`] is acceptable here.
    fn solve_cost(&self, step: &Expr, n: Variable) -> ScalarSolution;
}

/// A closed-form update with its cost, both parameterised by `n`.
#[derive(Clone, Debug)]
pub struct IteratedUpdate {
    /// Closed-form update: each variable's value after `n` iterations.
    pub update: Update,
    /// Closed-form cost of `n` iterations.
    pub cost: Expr,
    /// `false` when the cost is only a lower bound.
    pub cost_exact: bool,
    /// Smallest `n` for which the closed forms are sound.
    pub validity_bound: u32,
}

/// Iterates an update and cost along a dependency order.
///
/// `order` must schedule exactly the variables of `update` (see
/// [`crate::order`]). Fails with [`AccelError::RecurrenceTooComplex`] when
/// the oracle gives up on any variable or on the cost.
pub fn iterate<S: RecurrenceSolver>(
    solver: &S,
    update: &Update,
    order: &[Variable],
    cost: &Expr,
    n: Variable,
) -> Result<IteratedUpdate, AccelError> {
    debug_assert_eq!(order.len(), update.len());

    let mut closed_update = Update::new();
    let mut pre_recurrences = Subs::new();
    let mut validity_bounds: std::collections::BTreeMap<Variable, u32> = Default::default();
    let mut validity_bound = 0u32;
    let shift_back = |n: Variable| Subs::single(n, Expr::var(n) - Expr::one());

    for &v in order {
        let rhs = update.get(v).expect("order only schedules updated variables");
        let shifted_rhs = rhs.subs(&pre_recurrences);

        let (closed, bound) = if !rhs.has(v) {
            // no self-reference: the closed form is the rhs with the
            // dependencies' closed forms at n - 1
            let mut bound = 1u32;
            for dep in rhs.vars() {
                if let Some(b) = validity_bounds.get(&dep) {
                    bound = bound.max(b + 1);
                }
            }
            (shifted_rhs, bound)
        } else {
            match solver.solve_update(&shifted_rhs, v, n) {
                ScalarSolution::Exact { closed, validity_bound } => (closed, validity_bound),
                _ => return Err(AccelError::RecurrenceTooComplex),
            }
        };

        validity_bounds.insert(v, bound);
        validity_bound = validity_bound.max(bound);

        // later variables read this one at n - 1
        pre_recurrences.insert(v, closed.subs(&shift_back(n)));
        closed_update.insert(v, closed);
    }

    let step = cost.subs(&pre_recurrences);
    let (closed_cost, cost_exact) = match solver.solve_cost(&step, n) {
        ScalarSolution::Exact { closed, validity_bound: b } => {
            validity_bound = validity_bound.max(b);
            (closed, true)
        }
        ScalarSolution::LowerBound { closed, validity_bound: b } => {
            validity_bound = validity_bound.max(b);
            (closed, false)
        }
        ScalarSolution::TooComplex => return Err(AccelError::RecurrenceTooComplex),
    };

    Ok(IteratedUpdate {
        update: closed_update,
        cost: closed_cost,
        cost_exact,
        validity_bound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::find_order;
    use cadenza_base::{Sort, VariableManager};

    fn fixture() -> (VariableManager, Variable, Variable, Variable) {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        let n = vars.fresh_temp("n", Sort::Int);
        (vars, x, y, n)
    }

    #[test]
    fn counting_update_iterates_linearly() {
        let (_, x, _, n) = fixture();
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::int(1));
        let order = find_order(&update).unwrap();
        let it = iterate(&PolySolver, &update, &order, &Expr::one(), n).unwrap();
        assert!(it.update.get(x).unwrap().equals(&(Expr::var(x) + Expr::var(n))));
        assert!(it.cost.equals(&Expr::var(n)));
        assert!(it.cost_exact);
        assert!(it.validity_bound <= 1);
    }

    #[test]
    fn dependent_update_reads_previous_value() {
        let (_, x, y, n) = fixture();
        // y' = y + 1, x' = x + y reads y at n-1:
        // x(n) = x + n*y + n(n-1)/2
        let mut update = Update::new();
        update.insert(y, Expr::var(y) + Expr::int(1));
        update.insert(x, Expr::var(x) + Expr::var(y));
        let order = find_order(&update).unwrap();
        let it = iterate(&PolySolver, &update, &order, &Expr::zero(), n).unwrap();
        let expected = Expr::var(x)
            + Expr::var(n) * Expr::var(y)
            + Expr::rational(1, 2)
                * Expr::var(n)
                * (Expr::var(n) - Expr::one());
        assert!(it.update.get(x).unwrap().equals(&expected));
        // closed form at n = 1 equals one application of the update
        let at_one = it.update.get(x).unwrap().subs(&Subs::single(n, Expr::one()));
        assert!(at_one.equals(&(Expr::var(x) + Expr::var(y))));
    }

    #[test]
    fn constant_reset_has_validity_bound_one() {
        let (_, x, _, n) = fixture();
        let mut update = Update::new();
        update.insert(x, Expr::int(7));
        let order = find_order(&update).unwrap();
        let it = iterate(&PolySolver, &update, &order, &Expr::one(), n).unwrap();
        assert!(it.update.get(x).unwrap().equals(&Expr::int(7)));
        assert_eq!(it.validity_bound, 1);
    }

    #[test]
    fn cost_sums_updated_variable() {
        let (_, x, _, n) = fixture();
        // x' = x + 1 with cost x per firing:
        // cost(n) = sum_{k=0}^{n-1} (x + k) = n*x + n(n-1)/2
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::int(1));
        let order = find_order(&update).unwrap();
        let it = iterate(&PolySolver, &update, &order, &Expr::var(x), n).unwrap();
        let expected = Expr::var(n) * Expr::var(x)
            + Expr::rational(1, 2) * Expr::var(n) * (Expr::var(n) - Expr::one());
        assert!(it.cost.equals(&expected));
    }

    #[test]
    fn geometric_update_produces_exponential() {
        let (_, x, _, n) = fixture();
        let mut update = Update::new();
        update.insert(x, Expr::int(2) * Expr::var(x));
        let order = find_order(&update).unwrap();
        let it = iterate(&PolySolver, &update, &order, &Expr::one(), n).unwrap();
        let expected = Expr::pow(Expr::int(2), Expr::var(n)) * Expr::var(x);
        assert!(it.update.get(x).unwrap().equals(&expected));
    }
}
