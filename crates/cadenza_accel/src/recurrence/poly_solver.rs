//! Built-in recurrence oracle.
//!
//! Covers the fragment the engine actually produces for linear integer
//! loops: `x(n) = a·x(n−1) + q(n)` with a rational constant `a`, where for
//! `a = 1` the inhomogeneous part `q` may be a polynomial in `n` of degree
//! up to three, optionally with geometric addends `t·b^(n+s)`, and for
//! `a ≠ 1` it must be constant in `n`. Anything else is `TooComplex` and
//! the caller decides whether another strategy applies.

use cadenza_base::Variable;
use cadenza_term::{Expr, Rational};
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::{RecurrenceSolver, ScalarSolution};

/// The built-in solver for linear recurrences with constant coefficients.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolySolver;

impl RecurrenceSolver for PolySolver {
    fn solve_update(&self, rhs: &Expr, lhs: Variable, n: Variable) -> ScalarSolution {
        let mut only_lhs = cadenza_term::VarSet::new();
        only_lhs.insert(lhs);
        if !rhs.is_linear(Some(&only_lhs)) {
            return ScalarSolution::TooComplex;
        }
        let a = match rhs.coeff(lhs, 1).as_rational() {
            Some(a) => a,
            None => return ScalarSolution::TooComplex,
        };
        let rest = rhs.coeff(lhs, 0);

        if a.is_zero() {
            // x(n) = q(n): no recurrence left, valid from the first step
            return ScalarSolution::Exact {
                closed: rest,
                validity_bound: 1,
            };
        }

        if a.is_one() {
            // x(n) = x(0) + sum_{k=1}^{n} q(k)
            match sum_over(&rest, n) {
                Some(sum) => ScalarSolution::Exact {
                    closed: Expr::var(lhs) + sum,
                    validity_bound: 0,
                },
                None => ScalarSolution::TooComplex,
            }
        } else {
            // x(n) = a^n x(0) + q (a^n - 1)/(a - 1) for q constant in n
            if rest.has(n) {
                return ScalarSolution::TooComplex;
            }
            let a_pow_n = Expr::pow(Expr::constant(a.clone()), Expr::var(n));
            let scale = (&a - Rational::one()).recip();
            let closed = a_pow_n.clone() * Expr::var(lhs)
                + rest * (a_pow_n - Expr::one()) * Expr::constant(scale);
            ScalarSolution::Exact {
                closed,
                validity_bound: 0,
            }
        }
    }

    fn solve_cost(&self, step: &Expr, n: Variable) -> ScalarSolution {
        match sum_over(step, n) {
            Some(closed) => ScalarSolution::Exact {
                closed,
                validity_bound: 0,
            },
            None => ScalarSolution::TooComplex,
        }
    }
}

/// Symbolic `Σ_{k=1}^{n} q[n ↦ k]`.
fn sum_over(q: &Expr, n: Variable) -> Option<Expr> {
    let expanded = q.expand();
    let addends = match expanded {
        Expr::Add(xs) => xs,
        other => vec![other],
    };
    let mut parts = Vec::with_capacity(addends.len());
    for a in &addends {
        parts.push(sum_addend(a, n)?);
    }
    Some(Expr::add(parts))
}

/// Sums one expanded addend: either `t·n^k` (k ≤ 3) or `t·b^(n+s)` with
/// `t` free of `n`.
fn sum_addend(a: &Expr, n: Variable) -> Option<Expr> {
    if !a.has(n) {
        return Some(a.clone() * Expr::var(n));
    }
    let factors = match a {
        Expr::Mul(xs) => xs.clone(),
        other => vec![other.clone()],
    };
    let mut rest = Vec::new();
    let mut n_power = 0u32;
    let mut geometric: Option<(Rational, Rational)> = None;
    for f in factors {
        if !f.has(n) {
            rest.push(f);
            continue;
        }
        match &f {
            Expr::Var(v) if *v == n => n_power += 1,
            Expr::Pow(base, exp) => match (base.as_ref(), exp.as_ref()) {
                (Expr::Var(v), Expr::Const(k)) if *v == n => {
                    if !k.is_integer() || k.is_negative() {
                        return None;
                    }
                    n_power += k.to_integer().to_u32()?;
                }
                (Expr::Const(b), exp) => {
                    if geometric.is_some() {
                        return None;
                    }
                    let shift = unit_shift(exp, n)?;
                    geometric = Some((b.clone(), shift));
                }
                _ => return None,
            },
            _ => return None,
        }
    }
    let t = Expr::mul(rest);
    match (n_power, geometric) {
        (k, None) => Some(t * power_sum(k, n)?),
        (0, Some((b, s))) => Some(t * geometric_sum(&b, &s, n)?),
        _ => None,
    }
}

/// Matches `exp = n + s` for a rational constant `s`.
fn unit_shift(exp: &Expr, n: Variable) -> Option<Rational> {
    let expanded = exp.expand();
    if expanded.degree(n) != 1 {
        return None;
    }
    if !expanded.coeff(n, 1).as_rational()?.is_one() {
        return None;
    }
    expanded.coeff(n, 0).as_rational()
}

/// Faulhaber: `Σ_{k=1}^{n} k^j` for `j ≤ 3`.
fn power_sum(j: u32, n: Variable) -> Option<Expr> {
    let n = Expr::var(n);
    let n2 = Expr::pow(n.clone(), Expr::int(2));
    let n3 = Expr::pow(n.clone(), Expr::int(3));
    let n4 = Expr::pow(n.clone(), Expr::int(4));
    match j {
        0 => Some(n),
        1 => Some(Expr::rational(1, 2) * (n2 + n)),
        2 => Some(
            Expr::rational(1, 6)
                * (Expr::int(2) * n3 + Expr::int(3) * n2 + n),
        ),
        3 => Some(Expr::rational(1, 4) * (n4 + Expr::int(2) * n3 + n2)),
        _ => None,
    }
}

/// `Σ_{k=1}^{n} b^(k+s) = b^(s+1)·(b^n − 1)/(b − 1)`, with the degenerate
/// bases handled separately.
fn geometric_sum(b: &Rational, s: &Rational, n: Variable) -> Option<Expr> {
    if b.is_zero() {
        // every term is zero as long as the exponent stays positive
        return if s.is_negative() { None } else { Some(Expr::zero()) };
    }
    if b.is_one() {
        return Some(Expr::var(n));
    }
    if !s.is_integer() {
        return None;
    }
    let s_i32 = s.to_integer().to_i32()?;
    let factor = b.pow(s_i32 + 1) / (b - Rational::one());
    Some(
        Expr::constant(factor)
            * (Expr::pow(Expr::constant(b.clone()), Expr::var(n)) - Expr::one()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::{Sort, VariableManager};
    use cadenza_term::Subs;

    fn fixture() -> (VariableManager, Variable, Variable) {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", Sort::Int);
        (vars, x, n)
    }

    /// Evaluates a closed form at a concrete `n` and compares against
    /// naively iterating the recurrence.
    fn check_against_iteration(rhs: &Expr, x: Variable, n: Variable, steps: u32) {
        let solution = match PolySolver.solve_update(rhs, x, n) {
            ScalarSolution::Exact { closed, .. } => closed,
            other => panic!("expected exact solution, got {:?}", other),
        };
        let mut iterated = Expr::var(x);
        for k in 1..=steps {
            let mut sigma = Subs::single(x, iterated);
            sigma.insert(n, Expr::int(k as i64));
            iterated = rhs.subs(&sigma);
        }
        let at_steps = solution.subs(&Subs::single(n, Expr::int(steps as i64)));
        assert!(
            at_steps.equals(&iterated),
            "closed form diverges after {} steps",
            steps
        );
    }

    #[test]
    fn counting() {
        let (_, x, n) = fixture();
        check_against_iteration(&(Expr::var(x) + Expr::int(3)), x, n, 5);
    }

    #[test]
    fn polynomial_inhomogeneity() {
        let (_, x, n) = fixture();
        // x(n) = x(n-1) + n^2
        let rhs = Expr::var(x) + Expr::pow(Expr::var(n), Expr::int(2));
        check_against_iteration(&rhs, x, n, 4);
    }

    #[test]
    fn cubic_inhomogeneity() {
        let (_, x, n) = fixture();
        let rhs = Expr::var(x) + Expr::pow(Expr::var(n), Expr::int(3));
        check_against_iteration(&rhs, x, n, 3);
    }

    #[test]
    fn geometric_homogeneous() {
        let (_, x, n) = fixture();
        check_against_iteration(&(Expr::int(3) * Expr::var(x)), x, n, 4);
    }

    #[test]
    fn geometric_with_constant() {
        let (_, x, n) = fixture();
        // x(n) = 2x(n-1) + 5
        let rhs = Expr::int(2) * Expr::var(x) + Expr::int(5);
        check_against_iteration(&rhs, x, n, 4);
    }

    #[test]
    fn quartic_is_too_complex() {
        let (_, x, n) = fixture();
        let rhs = Expr::var(x) + Expr::pow(Expr::var(n), Expr::int(4));
        assert_eq!(
            PolySolver.solve_update(&rhs, x, n),
            ScalarSolution::TooComplex
        );
    }

    #[test]
    fn quadratic_self_reference_is_too_complex() {
        let (_, x, n) = fixture();
        let rhs = Expr::pow(Expr::var(x), Expr::int(2));
        assert_eq!(
            PolySolver.solve_update(&rhs, x, n),
            ScalarSolution::TooComplex
        );
    }

    #[test]
    fn cost_of_geometric_step() {
        let (mut vars, _, n) = fixture();
        let y = vars.add_program_var("y");
        // step = y * 2^(n-1): cost(n) = y * (2^n - 1)
        let step = Expr::var(y)
            * Expr::pow(Expr::int(2), Expr::var(n) - Expr::one());
        let closed = match PolySolver.solve_cost(&step, n) {
            ScalarSolution::Exact { closed, .. } => closed,
            other => panic!("expected exact cost, got {:?}", other),
        };
        let expected =
            Expr::var(y) * (Expr::pow(Expr::int(2), Expr::var(n)) - Expr::one());
        assert!(closed.equals(&expected));
    }

    #[test]
    fn checks_closed_form_at_one_matches_single_step() {
        let (mut vars, x, n) = fixture();
        let y = vars.add_program_var("y");
        let rhs = Expr::var(x) + Expr::int(2) * Expr::var(y) - Expr::int(1);
        let closed = match PolySolver.solve_update(&rhs, x, n) {
            ScalarSolution::Exact { closed, .. } => closed,
            other => panic!("expected exact solution, got {:?}", other),
        };
        let at_one = closed.subs(&Subs::single(n, Expr::one()));
        assert!(at_one.equals(&rhs));
    }
}
