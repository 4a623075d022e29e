//! Helpers operating on relational guards.

use cadenza_base::Variable;
use cadenza_term::{Expr, Guard, Rel, RelOp, Subs};
use num_traits::{One, Signed, Zero};

/// How aggressively [`solve_term_for`] may divide by coefficients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveLevel {
    /// The solved variable must have coefficient ±1.
    NoCoefficients,
    /// Any rational constant coefficient is divided out.
    LinearCoefficients,
    /// Like `LinearCoefficients`, but the result must map integers to
    /// integers (every coefficient of the solution is an integer).
    ResultMapsToInt,
}

/// Solves `term == 0` for `v`.
///
/// Requires `term` to be linear in `v` with a rational constant
/// coefficient. Returns the solution expression, or `None` when the level's
/// restrictions rule it out.
pub fn solve_term_for(term: &Expr, v: Variable, level: SolveLevel) -> Option<Expr> {
    let expanded = term.expand();
    if expanded.degree(v) != 1 {
        return None;
    }
    let coeff = expanded.coeff(v, 1).as_rational()?;
    if coeff.is_zero() {
        return None;
    }
    if level == SolveLevel::NoCoefficients && !coeff.clone().abs().is_one() {
        return None;
    }
    // term = coeff*v + rest == 0  =>  v = -rest / coeff
    let rest = expanded.coeff(v, 0);
    let solution =
        (rest * Expr::constant(-coeff.recip())).expand();
    if level == SolveLevel::ResultMapsToInt {
        let all_int = solution
            .to_poly()
            .coefficients()
            .all(|c| c.is_integer());
        if !all_int {
            return None;
        }
    }
    Some(solution)
}

/// Drops trivially-true conjuncts and duplicates, preserving order.
pub fn simplify_guard(guard: &Guard) -> Guard {
    let mut out = Guard::new();
    for rel in guard {
        if rel.is_trivially_true() {
            continue;
        }
        let expanded = rel.expand();
        if out.iter().any(|r| r.expand() == expanded) {
            continue;
        }
        out.push(rel.clone());
    }
    out
}

/// Negates a `≤` relation over the integers: `l ≤ r` becomes `−l ≤ −r − 1`.
pub fn negate_leq(rel: &Rel) -> Rel {
    debug_assert_eq!(rel.op(), RelOp::Le);
    Rel::le(
        -rel.lhs().clone(),
        -rel.rhs().clone() - Expr::one(),
    )
}

/// Fuses pairs of converse inequalities (`a ≤ b` and `b ≤ a`) into
/// equalities. Returns the rewritten guard and whether anything changed.
pub fn find_equalities(guard: &Guard) -> (Guard, bool) {
    let rels: Vec<&Rel> = guard.iter().collect();
    let mut used = vec![false; rels.len()];
    let mut out = Guard::new();
    let mut changed = false;

    let diffs: Vec<Option<Expr>> = rels
        .iter()
        .map(|r| {
            if r.is_ineq() && !r.is_strict() {
                let leq = r.to_leq();
                Some((leq.lhs().clone() - leq.rhs().clone()).expand())
            } else {
                None
            }
        })
        .collect();

    for i in 0..rels.len() {
        if used[i] {
            continue;
        }
        if let Some(di) = &diffs[i] {
            let mut fused = false;
            for j in (i + 1)..rels.len() {
                if used[j] {
                    continue;
                }
                if let Some(dj) = &diffs[j] {
                    if di.clone().equals(&-dj.clone()) {
                        out.push(Rel::eq(di.clone(), Expr::zero()));
                        used[i] = true;
                        used[j] = true;
                        changed = true;
                        fused = true;
                        break;
                    }
                }
            }
            if fused {
                continue;
            }
        }
        used[i] = true;
        out.push(rels[i].clone());
    }
    (out, changed)
}

/// Removes equalities by propagating them into the remaining conjuncts.
///
/// For every equality that can be solved for an allowed variable at the
/// given level, the solution is substituted into the rest of the guard and
/// the equality dropped. The accumulated substitution is recorded in
/// `subs_out`. Returns the rewritten guard and whether anything changed.
pub fn propagate_equalities<F>(
    guard: &Guard,
    level: SolveLevel,
    subs_out: &mut Subs,
    allow: F,
) -> (Guard, bool)
where
    F: Fn(Variable) -> bool,
{
    let mut rels: Vec<Rel> = guard.iter().cloned().collect();
    let mut changed = false;
    let mut i = 0;
    while i < rels.len() {
        if rels[i].is_eq() {
            let term = (rels[i].lhs().clone() - rels[i].rhs().clone()).expand();
            let mut solved = None;
            for v in term.vars() {
                if !allow(v) {
                    continue;
                }
                if let Some(sol) = solve_term_for(&term, v, level) {
                    solved = Some((v, sol));
                    break;
                }
            }
            if let Some((v, sol)) = solved {
                let sigma = Subs::single(v, sol);
                rels.remove(i);
                for r in rels.iter_mut() {
                    *r = r.subs(&sigma);
                }
                *subs_out = subs_out.compose(&sigma);
                changed = true;
                continue;
            }
        }
        i += 1;
    }
    (rels.into_iter().collect(), changed)
}

/// Eliminates allowed variables by the transitive closure of their bounds:
/// `a ≤ x` and `x ≤ b` are replaced by `a ≤ b`.
///
/// A variable is only eliminated when it occurs exclusively in inequalities,
/// linearly and with unit coefficient. With `remove_half_bounds`, variables
/// bounded from one side only are eliminated outright; this is sound only
/// for variables whose value can be chosen freely.
pub fn eliminate_by_transitive_closure<F>(
    guard: &Guard,
    remove_half_bounds: bool,
    allow: F,
) -> (Guard, bool)
where
    F: Fn(Variable) -> bool,
{
    let mut current: Vec<Rel> = guard.iter().cloned().collect();
    let mut changed = false;

    let candidates: Vec<Variable> = {
        let mut out = Vec::new();
        let g: Guard = current.clone().into();
        for v in g.vars() {
            if allow(v) {
                out.push(v);
            }
        }
        out
    };

    'vars: for v in candidates {
        let mut lower: Vec<Expr> = Vec::new(); // bounds a with a <= v
        let mut upper: Vec<Expr> = Vec::new(); // bounds b with v <= b
        let mut untouched: Vec<Rel> = Vec::new();

        for rel in &current {
            if !rel.has(v) {
                untouched.push(rel.clone());
                continue;
            }
            if !rel.is_ineq() {
                continue 'vars;
            }
            let leq = rel.to_leq();
            let term = (leq.lhs().clone() - leq.rhs().clone()).expand();
            if term.degree(v) != 1 {
                continue 'vars;
            }
            let coeff = match term.coeff(v, 1).as_rational() {
                Some(c) => c,
                None => continue 'vars,
            };
            let rest = term.coeff(v, 0);
            if coeff.is_one() {
                // v + rest <= 0  =>  v <= -rest
                upper.push((-rest).expand());
            } else if (-coeff.clone()).is_one() {
                // -v + rest <= 0  =>  rest <= v
                lower.push(rest.expand());
            } else {
                continue 'vars;
            }
        }

        if !remove_half_bounds && (lower.is_empty() || upper.is_empty()) {
            continue 'vars;
        }

        for a in &lower {
            for b in &upper {
                untouched.push(Rel::le(a.clone(), b.clone()));
            }
        }
        current = untouched;
        changed = true;
    }

    (current.into_iter().collect(), changed)
}
