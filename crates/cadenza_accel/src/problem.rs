//! The acceleration calculus.
//!
//! An [`AccelerationProblem`] is a single-use scratchpad: the normalised
//! guard atoms start in `todo` and are discharged one by one through four
//! SMT-certified rules (recurrent set, monotonic decrease, eventual strict
//! decrease, eventual weak decrease). Discharged atoms move to `done` and
//! contribute accelerated atoms to `res`; every SMT query carries `done` as
//! hypotheses. When no rule fires, the calculus probes for an eventually
//! monotone invariant and splits the problem on it, solving both halves
//! with fresh counters and merging via `n = nL + nR`.
//!
//! All atoms are normalised to the strict form `t > 0` over the integers,
//! so the negation used in the unsatisfiability checks is exactly `t ≤ 0`.
//!
//! The nontermination variant reuses the same scratchpad without a counter
//! or closed form and discharges atoms through the recurrent-set rule only;
//! a solved problem then certifies the guard as a recurrent set.

use cadenza_base::{Config, Deadline, Proof, Sort, Variable, VariableManager};
use cadenza_smt::{Encoder, SmtExpr, SmtResult, SmtSolver, SolverFactory};
use cadenza_term::{Expr, Guard, Rel, Subs};
use log::debug;

use crate::error::AccelError;
use crate::toolbox::simplify_guard;

/// Working state of one acceleration attempt.
#[derive(Clone, Debug)]
pub struct AccelerationProblem {
    /// Accelerated atoms proved so far. Seeded with `n > 1` for counted
    /// problems.
    pub res: Guard,
    /// Atoms already discharged; hypotheses for later queries.
    pub done: Guard,
    /// Atoms still pending.
    pub todo: Guard,
    /// The one-step update as a substitution.
    pub up: Subs,
    /// The closed-form update at `n`; `None` for nontermination problems.
    pub closed: Option<Subs>,
    /// Closed-form cost of `n` iterations; `None` for nontermination
    /// problems.
    pub cost: Option<Expr>,
    /// The iteration counter; `None` for nontermination problems.
    pub n: Option<Variable>,
    /// Cleared once a non-equivalence-preserving step happened.
    pub equivalent: bool,
    /// Finished acceleration witnesses.
    pub results: Vec<Guard>,
}

impl AccelerationProblem {
    /// Sets up a counted problem: the guard is normalised into `todo` and
    /// `res` is seeded with `n > 1`.
    pub fn init(guard: &Guard, up: Subs, closed: Subs, cost: Expr, n: Variable) -> Self {
        let mut res = Guard::new();
        res.push(Rel::gt(Expr::var(n), Expr::one()));
        AccelerationProblem {
            res,
            done: Guard::new(),
            todo: Self::normalize(guard),
            up,
            closed: Some(closed),
            cost: Some(cost),
            n: Some(n),
            equivalent: true,
            results: Vec::new(),
        }
    }

    /// Sets up a counter-free nontermination problem over the original
    /// guard.
    pub fn init_nonterm(guard: &Guard, up: Subs) -> Self {
        AccelerationProblem {
            res: Guard::new(),
            done: Guard::new(),
            todo: Self::normalize(guard),
            up,
            closed: None,
            cost: None,
            n: None,
            equivalent: true,
            results: Vec::new(),
        }
    }

    /// Splits equalities into both bounds and orients every atom to the
    /// strict form `t > 0`.
    pub fn normalize(guard: &Guard) -> Guard {
        let mut out = Guard::new();
        for rel in guard {
            if rel.is_eq() {
                out.push(Rel::ge(rel.lhs().clone(), rel.rhs().clone()).normalize_ineq());
                out.push(Rel::le(rel.lhs().clone(), rel.rhs().clone()).normalize_ineq());
            } else {
                out.push(rel.normalize_ineq());
            }
        }
        out
    }

    /// `true` once every atom is discharged.
    pub fn solved(&self) -> bool {
        self.todo.is_empty()
    }

    fn without(todo: &Guard, index: usize) -> Guard {
        todo.iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// The accelerated atom of `rel` one step before `n`.
    fn closed_shifted(&self, rel: &Rel) -> Rel {
        let closed = self.closed.as_ref().expect("counted problem");
        let n = self.n.expect("counted problem");
        rel.subs(closed)
            .subs(&Subs::single(n, Expr::var(n) - Expr::one()))
    }
}

/// Runs the calculus over problems, creating one SMT solver per rule scan.
pub struct Calculus<'a, F: SolverFactory> {
    config: &'a Config,
    factory: &'a F,
    deadline: Deadline,
}

impl<'a, F: SolverFactory> Calculus<'a, F> {
    /// A calculus bound to a solver factory and configuration.
    pub fn new(config: &'a Config, factory: &'a F, deadline: Deadline) -> Self {
        Self {
            config,
            factory,
            deadline,
        }
    }

    fn solver(&self) -> F::Solver {
        let mut solver = self.factory.solver();
        solver.set_timeout(self.config.smt_timeout_millis);
        solver
    }

    fn encode(&self, vars: &VariableManager, rel: &Rel) -> Option<SmtExpr> {
        let encoder = Encoder::new(vars, self.config);
        match encoder.encode_rel(rel) {
            Ok(e) => Some(e),
            Err(err) => {
                debug!("cannot encode atom for the solver: {}", err);
                None
            }
        }
    }

    fn add_hypotheses(
        &self,
        vars: &VariableManager,
        solver: &mut F::Solver,
        done: &Guard,
    ) -> bool {
        for rel in done {
            match self.encode(vars, rel) {
                Some(e) => solver.add(e),
                None => return false,
            }
        }
        true
    }

    /// Recurrent set: `φ ∧ done` satisfiable and `φ ∧ done ∧ ¬φ[up]`
    /// unsatisfiable. Adds `φ` to both `done` and `res`.
    fn recurrence(
        &self,
        vars: &VariableManager,
        p: &mut AccelerationProblem,
        proof: &mut Proof,
    ) -> bool {
        let mut solver = self.solver();
        if !self.add_hypotheses(vars, &mut solver, &p.done) {
            return false;
        }
        for i in 0..p.todo.len() {
            let rel = p.todo.get(i).expect("index in range").clone();
            solver.push();
            let phi = match self.encode(vars, &rel) {
                Some(e) => e,
                None => return false,
            };
            solver.add(phi);
            if solver.check() != SmtResult::Sat {
                return false;
            }
            let stepped = rel.subs(&p.up);
            let negated = Rel::le(stepped.lhs().clone(), Expr::zero());
            let neg = match self.encode(vars, &negated) {
                Some(e) => e,
                None => return false,
            };
            solver.add(neg);
            if solver.check() == SmtResult::Unsat {
                proof.section("Simplify");
                proof.line(format!(
                    "handled {} via conditional recurrent sets",
                    rel.fmt_with(vars)
                ));
                p.done.push(rel.clone());
                p.res.push(rel);
                p.todo = AccelerationProblem::without(&p.todo, i);
                return true;
            }
            solver.pop();
        }
        false
    }

    /// Monotonic decrease: `φ[up] ∧ done` satisfiable and
    /// `φ[up] ∧ done ∧ ¬φ` unsatisfiable. Adds `φ` to `done` and
    /// `φ[closed][n ↦ n−1]` to `res`.
    fn monotonicity(
        &self,
        vars: &VariableManager,
        p: &mut AccelerationProblem,
        proof: &mut Proof,
    ) -> bool {
        if p.closed.is_none() {
            return false;
        }
        let mut solver = self.solver();
        if !self.add_hypotheses(vars, &mut solver, &p.done) {
            return false;
        }
        for i in 0..p.todo.len() {
            let rel = p.todo.get(i).expect("index in range").clone();
            solver.push();
            let stepped = rel.subs(&p.up);
            let phi_up = match self.encode(vars, &stepped) {
                Some(e) => e,
                None => return false,
            };
            solver.add(phi_up);
            if solver.check() != SmtResult::Sat {
                return false;
            }
            let negated = Rel::le(rel.lhs().clone(), Expr::zero());
            let neg = match self.encode(vars, &negated) {
                Some(e) => e,
                None => return false,
            };
            solver.add(neg);
            if solver.check() == SmtResult::Unsat {
                proof.section("Simplify");
                proof.line(format!(
                    "handled {} via conditional one-way monotonicity",
                    rel.fmt_with(vars)
                ));
                let shifted = p.closed_shifted(&rel);
                p.done.push(rel);
                p.res.push(shifted);
                p.todo = AccelerationProblem::without(&p.todo, i);
                return true;
            }
            solver.pop();
        }
        false
    }

    /// Shared body of the two eventual-decrease rules: `strict` selects
    /// whether the one-step drop must be strict.
    fn eventual_decrease(
        &self,
        vars: &VariableManager,
        p: &mut AccelerationProblem,
        proof: &mut Proof,
        strict: bool,
    ) -> bool {
        if p.closed.is_none() {
            return false;
        }
        let mut solver = self.solver();
        if !self.add_hypotheses(vars, &mut solver, &p.done) {
            return false;
        }
        for i in 0..p.todo.len() {
            let rel = p.todo.get(i).expect("index in range").clone();
            solver.push();
            let t = rel.lhs().clone();
            let updated = t.subs(&p.up);
            let twice = updated.subs(&p.up);
            let dropping = if strict {
                Rel::gt(t.clone(), updated.clone())
            } else {
                Rel::ge(t.clone(), updated.clone())
            };
            let keeps_dropping = if strict {
                Rel::le(updated.clone(), twice)
            } else {
                Rel::lt(updated, twice)
            };
            let (drop_e, keep_e) = match (
                self.encode(vars, &dropping),
                self.encode(vars, &keeps_dropping),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => return false,
            };
            solver.add(drop_e);
            if solver.check() != SmtResult::Sat {
                return false;
            }
            solver.add(keep_e);
            if solver.check() == SmtResult::Unsat {
                proof.section("Simplify");
                proof.line(format!(
                    "handled {} via eventual monotonicity",
                    rel.fmt_with(vars)
                ));
                let shifted = p.closed_shifted(&rel);
                p.done.push(rel.clone());
                p.res.push(rel);
                p.res.push(shifted);
                p.todo = AccelerationProblem::without(&p.todo, i);
                return true;
            }
            solver.pop();
        }
        false
    }

    /// Shared body of the two eventual-increase probes; returns the
    /// normalised invariant witness.
    fn eventual_increase(
        &self,
        vars: &VariableManager,
        p: &AccelerationProblem,
        strict: bool,
    ) -> Option<Rel> {
        let mut solver = self.solver();
        if !self.add_hypotheses(vars, &mut solver, &p.done) {
            return None;
        }
        for rel in &p.todo {
            solver.push();
            let t = rel.lhs().clone();
            let updated = t.subs(&p.up);
            let twice = updated.subs(&p.up);
            let rising = if strict {
                Rel::lt(t.clone(), updated.clone())
            } else {
                Rel::le(t.clone(), updated.clone())
            };
            let keeps_rising = if strict {
                Rel::ge(updated.clone(), twice)
            } else {
                Rel::gt(updated.clone(), twice)
            };
            let (rise_e, keep_e) = match (
                self.encode(vars, &rising),
                self.encode(vars, &keeps_rising),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => return None,
            };
            solver.add(rise_e);
            if solver.check() != SmtResult::Sat {
                return None;
            }
            solver.add(keep_e);
            if solver.check() == SmtResult::Unsat {
                return Some(rising.normalize_ineq());
            }
            solver.pop();
        }
        None
    }

    /// Runs discharge rules to a fixpoint. The scan restarts from the top
    /// after every success; the deadline is polled between successes.
    fn simplify(
        &self,
        vars: &VariableManager,
        p: &mut AccelerationProblem,
        proof: &mut Proof,
        nonterm: bool,
    ) -> Result<(), AccelError> {
        loop {
            if self.deadline.expired() {
                return Err(AccelError::Timeout);
            }
            if self.recurrence(vars, p, proof) {
                continue;
            }
            if !nonterm
                && (self.monotonicity(vars, p, proof)
                    || self.eventual_decrease(vars, p, proof, true)
                    || self.eventual_decrease(vars, p, proof, false))
            {
                continue;
            }
            return Ok(());
        }
    }

    /// Solves a problem, splitting on eventually monotone invariants when
    /// stuck. Returns the problem holding the final `results` (possibly a
    /// sub-problem when only one split branch succeeded), or `None`.
    pub fn solve(
        &self,
        vars: &mut VariableManager,
        mut p: AccelerationProblem,
        proof: &mut Proof,
        nonterm: bool,
    ) -> Result<Option<AccelerationProblem>, AccelError> {
        self.simplify(vars, &mut p, proof, nonterm)?;
        if p.solved() {
            let res = p.res.clone();
            p.results.push(res);
            return Ok(Some(p));
        }

        let witness = self
            .eventual_increase(vars, &p, true)
            .or_else(|| self.eventual_increase(vars, &p, false));
        let witness = match witness {
            Some(w) => w,
            None => return Ok(None),
        };
        let complement = Rel::le(witness.lhs().clone(), Expr::zero()).normalize_ineq();
        if p.todo.contains(&witness) || p.todo.contains(&complement) {
            // splitting on a pending atom cannot make progress
            return Ok(None);
        }

        proof.section("Split");
        proof.line(format!("splitting wrt. {}", witness.fmt_with(vars)));

        let (left, right) = if nonterm {
            let mut left = p.clone();
            left.results.clear();
            left.todo.push(complement.clone());
            let mut right = p.clone();
            right.results.clear();
            right.todo.push(witness.clone());
            (left, right)
        } else {
            let n = p.n.expect("counted problem");
            let closed = p.closed.clone().expect("counted problem");
            let cost = p.cost.clone().expect("counted problem");

            let left_n = vars.fresh_temp("n", Sort::Int);
            let mut left_todo = p.todo.clone();
            left_todo.push(complement.clone());
            let mut left = AccelerationProblem::init(
                &Guard::new(),
                p.up.clone(),
                closed.compose(&Subs::single(n, Expr::var(left_n))),
                cost.subs(&Subs::single(n, Expr::var(left_n))),
                left_n,
            );
            left.res = p.res.clone();
            left.res.push(Rel::gt(Expr::var(left_n), Expr::one()));
            left.done = p.done.clone();
            left.todo = left_todo;

            let right_n = vars.fresh_temp("n", Sort::Int);
            let mut right_todo = p.todo.clone();
            right_todo.push(witness.clone());
            let mut right = AccelerationProblem::init(
                &Guard::new(),
                p.up.clone(),
                closed.compose(&Subs::single(n, Expr::var(right_n))),
                cost.subs(&Subs::single(n, Expr::var(right_n))),
                right_n,
            );
            right.res = p.res.clone();
            right.res.push(Rel::gt(Expr::var(right_n), Expr::one()));
            right.done = p.done.clone();
            right.todo = right_todo;

            (left, right)
        };

        let left = self.solve(vars, left, proof, nonterm)?;
        let right = self.solve(vars, right, proof, nonterm)?;

        match (left, right) {
            (Some(left), Some(right)) => {
                proof.section("Merge");
                proof.line(format!(
                    "merging after split wrt. {}",
                    witness.fmt_with(vars)
                ));
                p.equivalent = false;
                if nonterm {
                    // each branch certifies its own recurrent set
                    p.results.extend(left.results);
                    p.results.extend(right.results);
                } else {
                    let n = p.n.expect("counted problem");
                    let left_n = left.n.expect("counted problem");
                    let right_n = right.n.expect("counted problem");
                    let left_closed = left.closed.as_ref().expect("counted problem");
                    for g1 in &left.results {
                        for g2 in &right.results {
                            let mut merged = g1.clone();
                            merged.push(Rel::eq(
                                Expr::var(n),
                                Expr::var(left_n) + Expr::var(right_n),
                            ));
                            merged.extend(g2.subs(left_closed).iter().cloned());
                            p.results.push(simplify_guard(&merged));
                        }
                    }
                    let rename_r = Subs::single(right_n, Expr::var(n));
                    for g2 in &right.results {
                        p.results.push(g2.subs(&rename_r));
                    }
                    let rename_l = Subs::single(left_n, Expr::var(n));
                    for g1 in &left.results {
                        p.results.push(g1.subs(&rename_l));
                    }
                }
                Ok(Some(p))
            }
            (Some(mut left), None) => {
                proof.section("Remove Right");
                proof.line(format!(
                    "keeping only the case {}",
                    complement.fmt_with(vars)
                ));
                left.equivalent = false;
                Ok(Some(left))
            }
            (None, Some(mut right)) => {
                proof.section("Remove Left");
                proof.line(format!("keeping only the case {}", witness.fmt_with(vars)));
                right.equivalent = false;
                Ok(Some(right))
            }
            (None, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_smt::LinearFactory;

    fn calculus_fixture() -> (VariableManager, Config) {
        (VariableManager::new(), Config::default())
    }

    fn counted_problem(
        vars: &mut VariableManager,
        guard: Guard,
        up: Subs,
        closed: Subs,
    ) -> AccelerationProblem {
        let n = vars.fresh_temp("n", Sort::Int);
        AccelerationProblem::init(&guard, up, closed, Expr::var(n), n)
    }

    #[test]
    fn normalization_splits_equalities_and_orients() {
        let (mut vars, _) = calculus_fixture();
        let x = vars.add_program_var("x");
        let guard: Guard = vec![Rel::eq(Expr::var(x), Expr::int(3))].into();
        let normalized = AccelerationProblem::normalize(&guard);
        assert_eq!(normalized.len(), 2);
        for rel in &normalized {
            assert_eq!(rel.op(), cadenza_term::RelOp::Gt);
            assert!(rel.rhs().is_zero());
        }
    }

    #[test]
    fn monotonic_guard_is_discharged() {
        let (mut vars, config) = calculus_fixture();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        // x < y, x := x + 1
        let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
        let up = Subs::single(x, Expr::var(x) + Expr::one());

        let calculus = Calculus::new(&config, &LinearFactory, Deadline::none());
        // closed form x := x + n, wired to the problem's own counter
        let mut p = counted_problem(&mut vars, guard, up, Subs::new());
        let n = p.n.unwrap();
        p.closed = Some(Subs::single(x, Expr::var(x) + Expr::var(n)));

        let mut proof = Proof::new();
        let solved = calculus
            .solve(&mut vars, p, &mut proof, false)
            .unwrap()
            .expect("solvable");
        assert!(solved.solved());
        assert!(solved.equivalent);
        assert_eq!(solved.results.len(), 1);
        // res contains n > 1 and the shifted closed-form atom y - x - (n-1) > 0
        let result = &solved.results[0];
        assert!(result.contains(&Rel::gt(Expr::var(n), Expr::one())));
        let shifted = (Expr::var(y) - Expr::var(x) - (Expr::var(n) - Expr::one())).expand();
        assert!(result
            .iter()
            .any(|r| (r.lhs().clone() - r.rhs().clone()).expand().equals(&shifted)));
    }

    #[test]
    fn recurrent_set_is_found_without_counter() {
        let (mut vars, config) = calculus_fixture();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        // y >= 0, x := x + 1: the guard is a recurrent set
        let guard: Guard = vec![Rel::ge(Expr::var(y), Expr::int(0))].into();
        let up = Subs::single(x, Expr::var(x) + Expr::one());
        let p = AccelerationProblem::init_nonterm(&guard, up);

        let calculus = Calculus::new(&config, &LinearFactory, Deadline::none());
        let mut proof = Proof::new();
        let solved = calculus
            .solve(&mut vars, p, &mut proof, true)
            .unwrap()
            .expect("recurrent");
        assert!(solved.equivalent);
        assert_eq!(solved.results.len(), 1);
    }

    #[test]
    fn decreasing_guard_is_no_recurrent_set() {
        let (mut vars, config) = calculus_fixture();
        let x = vars.add_program_var("x");
        // x > 0, x := x - 1 never loops forever
        let guard: Guard = vec![Rel::gt(Expr::var(x), Expr::int(0))].into();
        let up = Subs::single(x, Expr::var(x) - Expr::one());
        let p = AccelerationProblem::init_nonterm(&guard, up);

        let calculus = Calculus::new(&config, &LinearFactory, Deadline::none());
        let mut proof = Proof::new();
        let solved = calculus.solve(&mut vars, p, &mut proof, true).unwrap();
        assert!(solved.is_none());
    }

    #[test]
    fn expired_deadline_stops_the_calculus() {
        let (mut vars, config) = calculus_fixture();
        let x = vars.add_program_var("x");
        let guard: Guard = vec![Rel::gt(Expr::var(x), Expr::int(0))].into();
        let up = Subs::single(x, Expr::var(x) - Expr::one());
        let p = counted_problem(&mut vars, guard, up.clone(), up);

        let calculus = Calculus::new(
            &config,
            &LinearFactory,
            Deadline::after(std::time::Duration::from_secs(0)),
        );
        let mut proof = Proof::new();
        let res = calculus.solve(&mut vars, p, &mut proof, false);
        assert_eq!(res.unwrap_err(), AccelError::Timeout);
    }
}
