//! The acceleration orchestrator.
//!
//! Composes the phases on a linear simple loop: guard satisfiability check,
//! closed forms through the recurrence driver, the nontermination search,
//! the equivalence-preserving calculus, the Farkas metering fallback, and
//! finally upper-bound instantiation of the iteration counter. The caller
//! receives every accelerated rule plus a textual proof trace.

use cadenza_base::{Config, Deadline, Proof, Sort, Variable, VariableManager};
use cadenza_smt::{Encoder, SmtResult, SmtSolver, SolverFactory};
use cadenza_term::{Expr, Guard, Rel, Subs};
use log::debug;

use crate::eliminate::VarEliminator;
use crate::error::AccelError;
use crate::meter::{self, MeterResult};
use crate::order::{find_order, find_order_with_heuristic};
use crate::problem::{AccelerationProblem, Calculus};
use crate::recurrence::{iterate, IteratedUpdate, RecurrenceSolver};
use crate::rule::{Cost, Loc, Rule, Update};
use crate::toolbox::simplify_guard;

/// Overall outcome of an acceleration attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Accelerated rules were produced by an equivalence-preserving
    /// derivation; they replace the original rule.
    Success,
    /// Rules were produced, but only under a non-equivalence-preserving
    /// step (a split); the original rule stays relevant.
    PartialSuccess,
    /// Nothing was produced; the original rule is untouched.
    Failure,
}

/// The rules and proof of one acceleration attempt.
#[derive(Clone, Debug)]
pub struct AccelerationResult {
    /// Final status.
    pub status: Status,
    /// Accelerated rules (possibly several after splits or counter
    /// instantiation).
    pub rules: Vec<Rule>,
    /// Human-readable derivation trace.
    pub proof: Proof,
}

struct LoopAcceleration<'a, F: SolverFactory, R: RecurrenceSolver> {
    vars: &'a mut VariableManager,
    config: &'a Config,
    factory: &'a F,
    rec_solver: &'a R,
    sink: Loc,
    deadline: Deadline,
}

/// Accelerates a linear simple loop.
///
/// Nontermination witnesses are redirected to `sink`. The deadline is
/// polled between proof obligations; on expiry the partial rule set
/// produced so far is returned.
pub fn accelerate<F: SolverFactory, R: RecurrenceSolver>(
    vars: &mut VariableManager,
    config: &Config,
    factory: &F,
    rec_solver: &R,
    rule: &Rule,
    sink: Loc,
    deadline: Deadline,
) -> AccelerationResult {
    LoopAcceleration {
        vars,
        config,
        factory,
        rec_solver,
        sink,
        deadline,
    }
    .run(rule)
}

impl<'a, F: SolverFactory, R: RecurrenceSolver> LoopAcceleration<'a, F, R> {
    fn should_accelerate(&self, rule: &Rule, proof: &mut Proof) -> bool {
        if !rule.is_simple_loop() {
            proof.line("not a simple loop, skipping");
            return false;
        }
        if !rule.guard().is_well_formed() {
            proof.line("guard contains a disequality, skipping");
            return false;
        }
        if rule.cost().is_nonterm() || !rule.cost().is_poly() {
            proof.line("cost is not a polynomial, skipping");
            return false;
        }
        true
    }

    fn guard_is_unsat(&self, rule: &Rule) -> bool {
        let mut solver = self.factory.solver();
        solver.set_timeout(self.config.smt_timeout_millis);
        let encoder = Encoder::new(self.vars, self.config);
        match encoder.encode_guard(rule.guard()) {
            Ok(e) => {
                solver.add(e);
                solver.check() == SmtResult::Unsat
            }
            Err(_) => false,
        }
    }

    /// Closed forms for the loop, rejected when their validity bound
    /// exceeds one step.
    fn closed_form(&mut self, rule: &Rule, n: Variable, proof: &mut Proof) -> Option<IteratedUpdate> {
        let order = match find_order(rule.update()) {
            Some(order) => order,
            None => {
                proof.line("variables depend on each other cyclically");
                return None;
            }
        };
        let cost = rule.cost().as_expr().expect("polynomial cost").clone();
        match iterate(self.rec_solver, rule.update(), &order, &cost, n) {
            Ok(it) if it.validity_bound <= 1 => Some(it),
            Ok(_) => {
                proof.headline("Failed to compute closed form");
                None
            }
            Err(err) => {
                proof.headline("Failed to compute closed form");
                debug!("recurrence driver failed: {}", err);
                None
            }
        }
    }

    /// One accelerated rule per result guard, with the counter optionally
    /// eliminated.
    fn emit_accelerated(
        &mut self,
        original: &Rule,
        solved: &AccelerationProblem,
        rules: &mut Vec<Rule>,
        proof: &mut Proof,
    ) {
        let n = solved.n.expect("counted problem");
        let closed = solved.closed.as_ref().expect("counted problem");
        let cost = solved.cost.as_ref().expect("counted problem");

        let update: Update = original
            .update()
            .domain()
            .map(|v| {
                let rhs = closed
                    .get(v)
                    .cloned()
                    .unwrap_or_else(|| Expr::var(v));
                (v, rhs)
            })
            .collect();

        for guard in &solved.results {
            let accel = Rule::new_linear(
                original.loc(),
                simplify_guard(guard),
                Cost::Finite(cost.clone()),
                original.target(),
                update.clone(),
            );
            proof.line(format!("accelerated: {}", accel.fmt_with(self.vars)));
            self.push_with_instantiation(n, accel, rules, proof);
        }
    }

    /// Applies upper-bound instantiation when configured; keeps the
    /// symbolic rule when it is disabled or produces nothing.
    fn push_with_instantiation(
        &mut self,
        n: Variable,
        accel: Rule,
        rules: &mut Vec<Rule>,
        proof: &mut Proof,
    ) {
        if !self.config.replace_temp_var_by_upperbounds || self.deadline.expired() {
            rules.push(accel);
            return;
        }
        let instantiated = self.replace_by_upperbounds(n, &accel);
        if instantiated.is_empty() {
            rules.push(accel);
        } else {
            for rule in instantiated {
                proof.line(format!("instantiation: {}", rule.fmt_with(self.vars)));
                rules.push(rule);
            }
        }
    }

    /// One rule per upper bound of `n`; empty when there is no bound or the
    /// configured cap would be exceeded.
    fn replace_by_upperbounds(&self, n: Variable, rule: &Rule) -> Vec<Rule> {
        let eliminator = VarEliminator::new(rule.guard(), n, self.vars);
        let subs = eliminator.result();
        if subs.is_empty() || subs.len() > self.config.max_upperbounds_for_propagation {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(subs.len());
        for sigma in subs {
            if self.deadline.expired() {
                break;
            }
            let inst = rule.apply_subs(sigma);
            out.push(Rule::new_linear(
                inst.loc(),
                simplify_guard(inst.guard()),
                inst.cost().clone(),
                inst.target(),
                inst.update().clone(),
            ));
        }
        out
    }

    /// The Farkas fallback: find a metering function, then build the
    /// bounded accelerated rule through the recurrence driver.
    fn try_metering(
        &mut self,
        rule: &Rule,
        rules: &mut Vec<Rule>,
        proof: &mut Proof,
    ) -> Result<(), AccelError> {
        let mut attempt = meter::generate(self.vars, self.config, self.factory, rule);

        if let MeterResult::ConflictVar(a, b) = &attempt {
            // retry under both orderings of the conflicting counters
            let (a, b) = (*a, *b);
            proof.section("Conflict");
            proof.line(format!(
                "conflicting counters {} and {}",
                self.vars.name(a),
                self.vars.name(b)
            ));
            for (lo, hi) in [(b, a), (a, b)] {
                let mut guard = rule.guard().clone();
                guard.push(Rel::gt(Expr::var(hi), Expr::var(lo)));
                let strengthened = Rule::new_linear(
                    rule.loc(),
                    guard,
                    rule.cost().clone(),
                    rule.target(),
                    rule.update().clone(),
                );
                attempt = meter::generate(self.vars, self.config, self.factory, &strengthened);
                if matches!(attempt, MeterResult::Metered { .. }) {
                    break;
                }
            }
        }

        if matches!(attempt, MeterResult::Unsat) && self.config.try_additional_guard {
            if let Some(prepared) =
                meter::prepare_guard(self.vars, self.config, self.factory, rule)
            {
                proof.line("retrying with strengthened guard");
                attempt = meter::generate(self.vars, self.config, self.factory, &prepared);
            }
        }

        let (meter_fn, metered_rule) = match attempt {
            MeterResult::Metered { meter, rule } => (meter, rule),
            MeterResult::Unbounded => return Err(AccelError::Unbounded),
            MeterResult::Nonlinear => return Err(AccelError::NonLinear),
            _ => return Err(AccelError::NoMeteringFunction),
        };

        proof.section("Metering");
        proof.line(format!(
            "found metering function {}",
            meter_fn.fmt_with(self.vars)
        ));

        let n = self.vars.fresh_temp("n", Sort::Int);
        let mut update = metered_rule.update().clone();
        let mut guard = metered_rule.guard().clone();
        let order = match find_order_with_heuristic(&mut update, &mut guard) {
            Some(order) => order,
            None => return Err(AccelError::RecurrenceTooComplex),
        };
        let cost = metered_rule
            .cost()
            .as_expr()
            .expect("polynomial cost")
            .clone();
        let it = match iterate(self.rec_solver, &update, &order, &cost, n) {
            Ok(it) if it.validity_bound <= 1 => it,
            _ => return Err(AccelError::RecurrenceTooComplex),
        };

        guard.push(Rel::ge(meter_fn, Expr::var(n)));
        guard.push(Rel::ge(Expr::var(n), Expr::one()));
        let accel = Rule::new_linear(
            metered_rule.loc(),
            guard,
            Cost::Finite(it.cost),
            metered_rule.target(),
            it.update,
        );
        proof.line(format!("accelerated: {}", accel.fmt_with(self.vars)));
        self.push_with_instantiation(n, accel, rules, proof);
        Ok(())
    }

    fn run(&mut self, rule: &Rule) -> AccelerationResult {
        let mut proof = Proof::new();
        proof.headline("Accelerate");
        proof.line(format!("loop: {}", rule.fmt_with(self.vars)));

        let mut rules = Vec::new();
        let mut any_equivalent = false;
        let mut any_partial = false;

        if !self.should_accelerate(rule, &mut proof) {
            return self.finish(rules, false, false, proof);
        }
        if self.guard_is_unsat(rule) {
            proof.line("guard is unsatisfiable, the rule can be dropped");
            return self.finish(rules, false, false, proof);
        }

        let n = self.vars.fresh_temp("n", Sort::Int);
        let closed_form = self.closed_form(rule, n, &mut proof);
        let up = rule.update().to_subs();

        if let Some(it) = closed_form {
            let calculus = Calculus::new(self.config, self.factory, self.deadline);

            // nontermination first: a recurrent guard makes the loop
            // infinitely often applicable
            let nonterm_problem = AccelerationProblem::init_nonterm(rule.guard(), up.clone());
            match calculus.solve(self.vars, nonterm_problem, &mut proof, true) {
                Ok(Some(solved)) => {
                    proof.section("Nonterminating");
                    for guard in &solved.results {
                        let witness =
                            Rule::nonterm(rule.loc(), simplify_guard(guard), self.sink);
                        proof.line(format!("witness: {}", witness.fmt_with(self.vars)));
                        rules.push(witness);
                    }
                    if solved.equivalent {
                        // the witness covers the whole guard, no point in a
                        // finite acceleration on top
                        return self.finish(rules, true, false, proof);
                    }
                    any_partial = true;
                }
                Ok(None) => {}
                Err(AccelError::Timeout) => {
                    proof.line("deadline expired");
                    return self.finish(rules, any_equivalent, any_partial, proof);
                }
                Err(err) => {
                    debug!("nontermination search failed: {}", err);
                }
            }

            if self.config.nonterm_mode {
                return self.finish(rules, any_equivalent, any_partial, proof);
            }

            let closed = {
                let mut subs = Subs::new();
                for (v, e) in it.update.iter() {
                    subs.insert(*v, e.clone());
                }
                subs
            };
            let problem = AccelerationProblem::init(
                rule.guard(),
                up,
                closed,
                it.cost.clone(),
                n,
            );
            match calculus.solve(self.vars, problem, &mut proof, false) {
                Ok(Some(solved)) => {
                    self.emit_accelerated(rule, &solved, &mut rules, &mut proof);
                    if solved.equivalent {
                        any_equivalent = true;
                    } else {
                        any_partial = true;
                    }
                    return self.finish(rules, any_equivalent, any_partial, proof);
                }
                Ok(None) => {
                    proof.line("acceleration calculus failed");
                }
                Err(AccelError::Timeout) => {
                    proof.line("deadline expired");
                    return self.finish(rules, any_equivalent, any_partial, proof);
                }
                Err(err) => {
                    debug!("acceleration calculus failed: {}", err);
                }
            }
        }

        if !self.config.nonterm_mode {
            match self.try_metering(rule, &mut rules, &mut proof) {
                Ok(()) => {
                    any_equivalent = true;
                }
                Err(err) => {
                    proof.line(format!("metering fallback failed: {}", err));
                }
            }
        }

        self.finish(rules, any_equivalent, any_partial, proof)
    }

    fn finish(
        &self,
        rules: Vec<Rule>,
        any_equivalent: bool,
        any_partial: bool,
        proof: Proof,
    ) -> AccelerationResult {
        let status = if rules.is_empty() {
            Status::Failure
        } else if any_equivalent {
            Status::Success
        } else if any_partial {
            Status::PartialSuccess
        } else {
            Status::Failure
        };
        AccelerationResult {
            status,
            rules,
            proof,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::PolySolver;
    use cadenza_smt::LinearFactory;

    fn run(
        vars: &mut VariableManager,
        config: &Config,
        rule: &Rule,
    ) -> AccelerationResult {
        accelerate(
            vars,
            config,
            &LinearFactory,
            &PolySolver,
            rule,
            Loc(99),
            Deadline::none(),
        )
    }

    #[test]
    fn non_simple_loops_are_rejected() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let x = vars.add_program_var("x");
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::one());
        let rule = Rule::new_linear(Loc(0), Guard::new(), Cost::unit(), Loc(1), update);
        let result = run(&mut vars, &config, &rule);
        assert_eq!(result.status, Status::Failure);
        assert!(result.rules.is_empty());
    }

    #[test]
    fn unsatisfiable_guards_are_dropped() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let x = vars.add_program_var("x");
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::one());
        let guard: Guard = vec![
            Rel::gt(Expr::var(x), Expr::int(0)),
            Rel::lt(Expr::var(x), Expr::int(0)),
        ]
        .into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
        let result = run(&mut vars, &config, &rule);
        assert_eq!(result.status, Status::Failure);
        assert!(result.proof.to_string().contains("unsatisfiable"));
    }
}
