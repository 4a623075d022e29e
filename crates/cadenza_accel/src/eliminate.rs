//! Back-substitution of the iteration counter.
//!
//! After acceleration, cost and guard still mention the counter `n`. When
//! the guard implies concrete bounds for `n`, instantiating them yields
//! rules without the temporary — one rule per bound, capped to avoid
//! blow-up. Bounds must map integers to integers; rational bounds would
//! break the recurrence driver's integrality assumption and are skipped.

use cadenza_base::{Variable, VariableManager};
use cadenza_term::{Expr, Guard, Subs, VarSet};
use log::debug;

use crate::toolbox::{solve_term_for, SolveLevel};

/// Bounds for one variable extracted from a guard.
///
/// An equality bound wins outright: every other bound must agree with it
/// anyway. Otherwise all linear lower and upper bounds are collected.
pub struct BoundExtractor {
    eq: Option<Expr>,
    lower: Vec<Expr>,
    upper: Vec<Expr>,
}

impl BoundExtractor {
    /// Extracts bounds for `v` from `guard`.
    pub fn new(guard: &Guard, v: Variable) -> Self {
        let mut extractor = BoundExtractor {
            eq: None,
            lower: Vec::new(),
            upper: Vec::new(),
        };
        extractor.extract(guard, v);
        extractor
    }

    fn extract(&mut self, guard: &Guard, v: Variable) {
        // an equality is enough: all other bounds must satisfy it as well
        for rel in guard {
            if rel.is_eq() && rel.has(v) {
                let term = rel.lhs().clone() - rel.rhs().clone();
                self.eq = solve_term_for(&term, v, SolveLevel::ResultMapsToInt);
                return;
            }
        }

        for rel in guard {
            if !rel.is_ineq() || !rel.has(v) {
                continue;
            }
            let leq = rel.to_leq();
            let term = (leq.lhs().clone() - leq.rhs().clone()).expand();
            if term.degree(v) != 1 {
                continue;
            }
            if let Some(solved) = solve_term_for(&term, v, SolveLevel::ResultMapsToInt) {
                let coeff = term
                    .coeff(v, 1)
                    .as_rational()
                    .expect("linear with constant coefficient");
                if coeff < num_traits::Zero::zero() {
                    self.lower.push(solved);
                } else {
                    self.upper.push(solved);
                }
            }
        }
    }

    /// The equality bound, if one was found.
    pub fn eq(&self) -> Option<&Expr> {
        self.eq.as_ref()
    }

    /// Lower bounds, in guard order.
    pub fn lower(&self) -> &[Expr] {
        &self.lower
    }

    /// Upper bounds, in guard order.
    pub fn upper(&self) -> &[Expr] {
        &self.upper
    }

    /// Bounds that are integer constants; used to instantiate dependencies.
    pub fn constant_bounds(&self) -> Vec<Expr> {
        if let Some(eq) = &self.eq {
            if eq.is_int() {
                return vec![eq.clone()];
            }
            return Vec::new();
        }
        let mut out = Vec::new();
        for bound in self.lower.iter().chain(self.upper.iter()) {
            if bound.is_int() && !out.contains(bound) {
                out.push(bound.clone());
            }
        }
        out
    }
}

/// Computes substitutions eliminating the counter `n` from a guard.
///
/// Temporaries whose coefficient ties them to `n` are discovered
/// transitively and instantiated by their constant bounds first (a DFS over
/// all combinations); for each fully instantiated guard the bounds of `n`
/// itself are read off — an equality alone if present, otherwise every
/// upper bound.
pub struct VarEliminator {
    dependencies: VarSet,
    result: Vec<Subs>,
}

impl VarEliminator {
    /// Runs the elimination for `n`.
    ///
    /// # Panics
    ///
    /// Panics (debug) when `n` is not a temporary: program variables are
    /// never eliminated.
    pub fn new(guard: &Guard, n: Variable, vars: &VariableManager) -> Self {
        debug_assert!(vars.is_temp(n));
        let mut eliminator = VarEliminator {
            dependencies: VarSet::new(),
            result: Vec::new(),
        };
        eliminator.find_dependencies(guard, n, vars);
        eliminator.eliminate(guard, n);
        eliminator
    }

    /// Temporaries that occur in a coefficient of a dependency of `n`
    /// (transitively), discovered through constraints linear in the
    /// dependency. Constraints whose coefficient mixes in program variables
    /// are ignored.
    fn find_dependencies(&mut self, guard: &Guard, n: Variable, vars: &VariableManager) {
        self.dependencies.insert(n);
        let mut changed = true;
        while changed {
            changed = false;
            let current: Vec<Variable> = self.dependencies.iter().copied().collect();
            for var in current {
                for rel in guard {
                    let term = (rel.lhs().clone() - rel.rhs().clone()).expand();
                    if term.degree(var) != 1 {
                        continue;
                    }
                    let coeff = term.coeff(var, 1);
                    let mut candidate = None;
                    for x in coeff.vars() {
                        if vars.is_temp(x) {
                            if !self.dependencies.contains(&x) {
                                candidate = Some(x);
                            }
                        } else {
                            candidate = None;
                            break;
                        }
                    }
                    if let Some(dep) = candidate {
                        self.dependencies.insert(dep);
                        changed = true;
                    }
                }
            }
        }
        self.dependencies.remove(&n);
    }

    /// Instantiates one not-yet-eliminated dependency by each of its
    /// constant bounds.
    fn eliminate_dependency(&self, subs: &Subs, guard: &Guard) -> Vec<(Subs, Guard)> {
        let guard_vars = guard.vars();
        for dep in &self.dependencies {
            if !guard_vars.contains(dep) {
                continue;
            }
            let bounds = BoundExtractor::new(guard, *dep).constant_bounds();
            let mut out = Vec::new();
            for bound in bounds {
                let step = Subs::single(*dep, bound);
                out.push((subs.compose(&step), guard.subs(&step)));
            }
            if !out.is_empty() {
                return out;
            }
        }
        Vec::new()
    }

    fn eliminate(&mut self, guard: &Guard, n: Variable) {
        // depth-first over dependency instantiations
        let mut todo_deps = vec![(Subs::new(), guard.clone())];
        let mut leaves = Vec::new();
        while let Some((subs, guard)) = todo_deps.pop() {
            let next = self.eliminate_dependency(&subs, &guard);
            if next.is_empty() {
                leaves.push((subs, guard));
            } else {
                todo_deps.extend(next);
            }
        }

        for (subs, guard) in leaves {
            let bounds = BoundExtractor::new(&guard, n);
            if let Some(eq) = bounds.eq() {
                self.push_result(subs.compose(&Subs::single(n, eq.clone())));
            } else {
                for upper in bounds.upper() {
                    self.push_result(subs.compose(&Subs::single(n, upper.clone())));
                }
            }
        }
        debug!("counter elimination produced {} instantiations", self.result.len());
    }

    fn push_result(&mut self, subs: Subs) {
        if !self.result.contains(&subs) {
            self.result.push(subs);
        }
    }

    /// The computed instantiations.
    pub fn result(&self) -> &[Subs] {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::Sort;
    use cadenza_term::Rel;

    fn manager() -> VariableManager {
        VariableManager::new()
    }

    #[test]
    fn equality_bound_wins() {
        let mut vars = manager();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", Sort::Int);
        let guard: Guard = vec![
            Rel::eq(Expr::var(n), Expr::var(x) + Expr::int(1)),
            Rel::le(Expr::var(n), Expr::int(100)),
        ]
        .into();
        let bounds = BoundExtractor::new(&guard, n);
        assert!(bounds.eq().unwrap().equals(&(Expr::var(x) + Expr::int(1))));
        assert!(bounds.upper().is_empty());
    }

    #[test]
    fn upper_and_lower_bounds_are_separated() {
        let mut vars = manager();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", Sort::Int);
        // 2 <= n, n <= x: one lower, one upper bound
        let guard: Guard = vec![
            Rel::ge(Expr::var(n), Expr::int(2)),
            Rel::le(Expr::var(n), Expr::var(x)),
        ]
        .into();
        let bounds = BoundExtractor::new(&guard, n);
        assert!(bounds.eq().is_none());
        assert_eq!(bounds.lower().len(), 1);
        assert!(bounds.lower()[0].equals(&Expr::int(2)));
        assert_eq!(bounds.upper().len(), 1);
        assert!(bounds.upper()[0].equals(&Expr::var(x)));
    }

    #[test]
    fn rational_bounds_are_skipped() {
        let mut vars = manager();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", Sort::Int);
        // 2n <= x solves to n <= x/2, which does not map ints to ints
        let guard: Guard = vec![Rel::le(
            Expr::int(2) * Expr::var(n),
            Expr::var(x),
        )]
        .into();
        let bounds = BoundExtractor::new(&guard, n);
        assert!(bounds.upper().is_empty());
        assert!(bounds.lower().is_empty());
    }

    #[test]
    fn eliminator_instantiates_counter_by_upper_bound() {
        let mut vars = manager();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        let n = vars.fresh_temp("n", Sort::Int);
        // accelerated guard of a counting loop: y - x - n + 1 > 0, n > 1
        let guard: Guard = vec![
            Rel::gt(
                Expr::var(y) - Expr::var(x) - Expr::var(n) + Expr::one(),
                Expr::zero(),
            ),
            Rel::gt(Expr::var(n), Expr::one()),
        ]
        .into();
        let ve = VarEliminator::new(&guard, n, &vars);
        assert_eq!(ve.result().len(), 1);
        let expected = (Expr::var(y) - Expr::var(x)).expand();
        assert!(ve.result()[0].get(n).unwrap().equals(&expected));
    }

    #[test]
    fn dependencies_are_instantiated_first() {
        let mut vars = manager();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", Sort::Int);
        let t = vars.fresh_temp("t", Sort::Int);
        // t scales n, and t itself has the constant bound 3
        let guard: Guard = vec![
            Rel::le(Expr::var(t) * Expr::var(n), Expr::var(x)),
            Rel::eq(Expr::var(t), Expr::int(3)),
            Rel::le(Expr::var(n), Expr::var(x)),
        ]
        .into();
        let ve = VarEliminator::new(&guard, n, &vars);
        // after t = 3 the first constraint gives no integer bound (x/3),
        // the third still bounds n by x
        assert!(!ve.result().is_empty());
        for subs in ve.result() {
            assert!(subs.get(t).unwrap().equals(&Expr::int(3)));
        }
    }
}
