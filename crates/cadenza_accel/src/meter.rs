//! Metering-function synthesis via Farkas' lemma.
//!
//! A metering function `f` for a loop with guard `G` and update `U` is an
//! affine map with
//!
//! 1. `G ⇒ f(x) ≥ 1` — a step is possible,
//! 2. `G ∧ U ⇒ f(x) − f(x') ≤ 1` — one step lowers the bound by at most one,
//! 3. `¬G ⇒ f(x) ≤ 0` — terminated states have non-positive bound,
//!
//! so `f` under-approximates the iteration count. Each implication
//! `A·x ≤ b ⇒ c·x ≤ δ` is turned into the existential system
//! `∃λ ≥ 0. λᵀA = cᵀ ∧ λᵀb ≤ δ` (Farkas' lemma) and handed to the SMT
//! backend together with a non-triviality constraint on the coefficients.
//!
//! Before the encoding, the guard is reduced to the constraints that can
//! actually limit the iteration (SMT tautology checks remove the rest),
//! restricted to relevant variables, and linearised by substituting
//! nonlinear subterms with fresh variables. Free variables can be
//! instantiated by their guard bounds when the first attempt fails, and a
//! two-counter conflict is reported so the caller can retry with an
//! ordering hypothesis.

use std::collections::BTreeMap;

use cadenza_base::{Config, Sort, Variable, VariableManager};
use cadenza_smt::{Encoder, SmtResult, SmtSolver, SolverFactory};
use cadenza_term::{BoolExpr, Expr, Guard, Rational, Rel, Subs, VarSet};
use log::debug;
use num_integer::Integer;
use num_traits::One;

use crate::rule::{Rule, Update};
use crate::toolbox::{
    self, eliminate_by_transitive_closure, find_equalities, negate_leq, propagate_equalities,
    SolveLevel,
};

/// Outcome of the metering search.
#[derive(Clone, Debug)]
pub enum MeterResult {
    /// A metering function was found. The returned rule is the input rule
    /// after free-variable instantiation and, for rational coefficients,
    /// with the integer-scaling equation appended to its guard.
    Metered {
        /// The metering function.
        meter: Expr,
        /// The (possibly adjusted) rule the function belongs to.
        rule: Rule,
    },
    /// Two counters limit the loop; retrying with `a > b` or `b > a` added
    /// to the guard may succeed.
    ConflictVar(Variable, Variable),
    /// No guard constraint limits the iteration count.
    Unbounded,
    /// The problem could not be linearised.
    Nonlinear,
    /// The Farkas system is unsatisfiable (or the solver gave up).
    Unsat,
}

struct Constraints {
    /// Full guard, as `lhs ≤ const`.
    guard: Vec<Rel>,
    /// Reduced guard, as `lhs ≤ const`.
    reduced: Vec<Rel>,
    /// Guard plus update equations over primed variables.
    guard_update: Vec<Rel>,
}

struct MeteringFinder<'a, F: SolverFactory> {
    vars: &'a mut VariableManager,
    config: &'a Config,
    factory: &'a F,
    update: Update,
    guard: Guard,
    reduced_guard: Guard,
    nonlinear_subs: Subs,
    varlist: Vec<Variable>,
    primed: BTreeMap<Variable, Variable>,
    coeff0: Option<Variable>,
    coeffs: Vec<Variable>,
}

impl<'a, F: SolverFactory> MeteringFinder<'a, F> {
    fn new(
        vars: &'a mut VariableManager,
        config: &'a Config,
        factory: &'a F,
        rule: &Rule,
    ) -> Self {
        Self {
            vars,
            config,
            factory,
            update: rule.update().clone(),
            guard: rule.guard().clone(),
            reduced_guard: Guard::new(),
            nonlinear_subs: Subs::new(),
            varlist: Vec::new(),
            primed: BTreeMap::new(),
            coeff0: None,
            coeffs: Vec::new(),
        }
    }

    fn solver(&self) -> F::Solver {
        let mut solver = self.factory.solver();
        solver.set_timeout(self.config.smt_timeout_millis);
        solver
    }

    /// Equality propagation and transitive-closure elimination to remove as
    /// many free variables as possible before the encoding.
    fn preprocess_freevars(&mut self) {
        let (guard, _) = find_equalities(&self.guard);
        self.guard = guard;

        let mut vars_in_update = VarSet::new();
        self.update.collect_rhs_vars(&mut vars_in_update);

        // remove free variables from the update right-hand sides first
        let mut sigma = Subs::new();
        let (guard, _) = {
            let vars = &*self.vars;
            propagate_equalities(&self.guard, SolveLevel::NoCoefficients, &mut sigma, |v| {
                vars.is_temp(v) && vars_in_update.contains(&v)
            })
        };
        self.guard = guard;
        self.update = self.update.subs(&sigma);

        // then from the remaining equalities
        let mut sigma = Subs::new();
        let (guard, _) = {
            let vars = &*self.vars;
            propagate_equalities(&self.guard, SolveLevel::NoCoefficients, &mut sigma, |v| {
                vars.is_temp(v)
            })
        };
        self.guard = guard;
        self.update = self.update.subs(&sigma);

        // free variables that do not feed the update can be squeezed out by
        // combining their bounds
        let mut vars_in_update = VarSet::new();
        self.update.collect_rhs_vars(&mut vars_in_update);
        let (guard, _) = {
            let vars = &*self.vars;
            eliminate_by_transitive_closure(&self.guard, true, |v| {
                vars.is_temp(v) && !vars_in_update.contains(&v)
            })
        };
        self.guard = guard;
    }

    /// Replaces equalities by both bounds; `≠` cannot be handled.
    fn make_relational_guard(&mut self) -> bool {
        let mut out = Guard::new();
        for rel in &self.guard {
            if rel.is_ne() {
                return false;
            }
            if rel.is_eq() {
                out.push(Rel::le(rel.lhs().clone(), rel.rhs().clone()));
                out.push(Rel::ge(rel.lhs().clone(), rel.rhs().clone()));
            } else {
                out.push(rel.clone());
            }
        }
        self.guard = out;
        true
    }

    /// Keeps only the guard constraints that can limit the iteration: a
    /// constraint is irrelevant if it mentions no updated variable, or if it
    /// is a tautology under its own update.
    fn reduce_guard(&mut self) {
        self.reduced_guard = Guard::new();
        let up = self.update.to_subs();

        let mut solver = self.solver();
        let encoder = Encoder::new(self.vars, self.config);
        for rel in &self.guard {
            if let Ok(e) = encoder.encode_rel(rel) {
                solver.add(e);
            }
        }

        for rel in &self.guard {
            let rel_vars = rel.vars();
            let has_free = rel_vars.iter().any(|v| self.vars.is_temp(*v));
            let has_updated = rel_vars.iter().any(|v| self.update.contains(*v));
            if has_free {
                self.reduced_guard.push(rel.clone());
            } else if has_updated {
                solver.push();
                let negated_step = rel.subs(&up).negation();
                let tautology = match encoder.encode_rel(&negated_step) {
                    Ok(e) => {
                        solver.add(e);
                        solver.check() == SmtResult::Unsat
                    }
                    Err(_) => false,
                };
                solver.pop();
                if !tautology {
                    self.reduced_guard.push(rel.clone());
                }
            }
        }
    }

    /// Relevant variables: those of the reduced guard, closed under the
    /// update right-hand sides of already relevant variables.
    fn find_relevant_variables(&mut self) {
        let mut relevant = self.reduced_guard.vars();
        let mut changed = true;
        while changed {
            changed = false;
            for (v, rhs) in self.update.iter() {
                if !relevant.contains(v) {
                    continue;
                }
                for dep in rhs.vars() {
                    changed = relevant.insert(dep) || changed;
                }
            }
        }
        self.varlist = relevant.into_iter().collect();
    }

    fn is_relevant(&self, v: Variable) -> bool {
        self.varlist.contains(&v)
    }

    /// Drops updates of irrelevant variables and guard constraints without
    /// relevant variables.
    fn restrict_to_relevant(&mut self) {
        let irrelevant: Vec<Variable> = self
            .update
            .domain()
            .filter(|v| !self.is_relevant(*v))
            .collect();
        for v in irrelevant {
            self.update.remove(v);
        }
        let keep = |rel: &Rel, varlist: &[Variable]| {
            rel.vars().iter().any(|v| varlist.contains(v))
        };
        self.guard = self
            .guard
            .iter()
            .filter(|r| keep(r, &self.varlist))
            .cloned()
            .collect();
        self.reduced_guard = self
            .reduced_guard
            .iter()
            .filter(|r| keep(r, &self.varlist))
            .cloned()
            .collect();
    }

    /// Replaces `x^d` by a fresh variable in every addend where `x` has
    /// exactly degree `d`.
    fn replace_power(term: &Expr, x: Variable, d: u32, fresh: Variable) -> Expr {
        let expanded = term.expand();
        let addends = match expanded {
            Expr::Add(xs) => xs,
            other => vec![other],
        };
        let rewritten = addends
            .into_iter()
            .map(|a| {
                let factors = match a {
                    Expr::Mul(xs) => xs,
                    other => vec![other],
                };
                let target = Expr::pow(Expr::var(x), Expr::int(d as i64));
                let mut out = Vec::with_capacity(factors.len());
                for f in factors {
                    if f == target {
                        out.push(Expr::var(fresh));
                    } else {
                        out.push(f);
                    }
                }
                Expr::mul(out)
            })
            .collect();
        Expr::add(rewritten)
    }

    /// Replaces the product `x·y` by a fresh variable in every addend
    /// containing both factors linearly.
    fn replace_product(term: &Expr, x: Variable, y: Variable, fresh: Variable) -> Expr {
        let expanded = term.expand();
        let addends = match expanded {
            Expr::Add(xs) => xs,
            other => vec![other],
        };
        let rewritten = addends
            .into_iter()
            .map(|a| {
                let mut factors = match a {
                    Expr::Mul(xs) => xs,
                    other => vec![other],
                };
                let xi = factors.iter().position(|f| *f == Expr::var(x));
                let yi = factors.iter().position(|f| *f == Expr::var(y));
                if let (Some(xi), Some(yi)) = (xi, yi) {
                    let (first, second) = if xi < yi { (yi, xi) } else { (xi, yi) };
                    factors.remove(first);
                    factors.remove(second);
                    factors.push(Expr::var(fresh));
                }
                Expr::mul(factors)
            })
            .collect();
        Expr::add(rewritten)
    }

    /// Makes `term` linear in the relevant variables by substitution,
    /// recording the reverse mapping. Extra guard constraints (`z ≥ 0` for
    /// even powers) are appended directly.
    fn make_linear(
        &mut self,
        term: Expr,
        subs_vars: &mut VarSet,
        extra_guard: &mut Vec<Rel>,
    ) -> Option<Expr> {
        let mut term = term;
        // earlier substitutions apply to this term as well
        let recorded: Vec<(Variable, Expr)> = self
            .nonlinear_subs
            .iter()
            .map(|(v, e)| (*v, e.clone()))
            .collect();
        for (fresh, orig) in recorded {
            match &orig {
                Expr::Pow(base, exp) => {
                    if let (Expr::Var(x), Expr::Const(c)) = (base.as_ref(), exp.as_ref()) {
                        if let Some(d) = num_traits::ToPrimitive::to_u32(&c.to_integer()) {
                            term = Self::replace_power(&term, *x, d, fresh);
                        }
                    }
                }
                Expr::Mul(factors) => {
                    if let [Expr::Var(x), Expr::Var(y)] = factors.as_slice() {
                        term = Self::replace_product(&term, *x, *y, fresh);
                    }
                }
                _ => {}
            }
        }
        for i in 0..self.varlist.len() {
            let x = self.varlist[i];
            loop {
                let deg = term.degree(x);
                if deg > 1 {
                    if subs_vars.contains(&x) || self.update.contains(x) {
                        return None;
                    }
                    subs_vars.insert(x);
                    let name = format!("{}{}", self.vars.name(x), deg);
                    let fresh = self.vars.fresh_program_var(&name);
                    self.nonlinear_subs.insert(
                        fresh,
                        Expr::pow(Expr::var(x), Expr::int(deg as i64)),
                    );
                    term = Self::replace_power(&term, x, deg, fresh);
                    if deg % 2 == 0 {
                        // squared terms are never negative
                        extra_guard.push(Rel::ge(Expr::var(fresh), Expr::zero()));
                    }
                } else if deg == 1 {
                    let coeff = term.coeff(x, 1);
                    if coeff.is_rational_constant() {
                        break;
                    }
                    let coeff_vars = coeff.vars();
                    if coeff_vars.len() > 1 {
                        debug!("nonlinear substitution too complex");
                        return None;
                    }
                    let y = *coeff_vars.iter().next().expect("nonconstant coefficient");
                    if subs_vars.contains(&x) || self.update.contains(x) {
                        return None;
                    }
                    subs_vars.insert(x);
                    subs_vars.insert(y);
                    let name = format!("{}{}", self.vars.name(x), self.vars.name(y));
                    let fresh = self.vars.fresh_program_var(&name);
                    self.nonlinear_subs
                        .insert(fresh, Expr::var(x) * Expr::var(y));
                    term = Self::replace_product(&term, x, y, fresh);
                } else {
                    break;
                }
            }
        }
        Some(term)
    }

    /// Linearises guard and update; fails when the heuristic substitutions
    /// do not suffice.
    fn make_linear_transition(&mut self) -> bool {
        let mut subs_vars = VarSet::new();
        let mut extra_guard = Vec::new();

        let rels: Vec<Rel> = self.guard.iter().cloned().collect();
        let mut new_guard = Vec::with_capacity(rels.len());
        for rel in rels {
            if rel.is_eq() || rel.is_ne() {
                return false;
            }
            let lhs = match self.make_linear(rel.lhs().clone(), &mut subs_vars, &mut extra_guard)
            {
                Some(e) => e,
                None => return false,
            };
            let rhs = match self.make_linear(rel.rhs().clone(), &mut subs_vars, &mut extra_guard)
            {
                Some(e) => e,
                None => return false,
            };
            new_guard.push(Rel::new(lhs, rel.op(), rhs));
        }

        // a substituted variable must not also occur linearly elsewhere
        for rel in &new_guard {
            for v in &subs_vars {
                if rel.lhs().degree(*v) == 1 || rel.rhs().degree(*v) == 1 {
                    return false;
                }
            }
        }

        let updates: Vec<(Variable, Expr)> = self
            .update
            .iter()
            .map(|(v, e)| (*v, e.clone()))
            .collect();
        for (v, rhs) in updates {
            if !self.is_relevant(v) {
                continue;
            }
            let rewritten = match self.make_linear(rhs, &mut subs_vars, &mut extra_guard) {
                Some(e) => e,
                None => return false,
            };
            self.update.insert(v, rewritten);
        }

        self.guard = new_guard.into_iter().chain(extra_guard).collect();
        true
    }

    /// Fresh primed variable for an updated variable.
    fn primed_var(&mut self, v: Variable) -> Variable {
        if let Some(p) = self.primed.get(&v) {
            return *p;
        }
        let name = format!("{}!", self.vars.name(v));
        let p = self.vars.fresh_temp(&name, Sort::Int);
        self.primed.insert(v, p);
        p
    }

    /// Brings everything into `linear term ≤ constant` shape.
    fn build_constraints(&mut self) -> Constraints {
        let mut constraints = Constraints {
            guard: Vec::new(),
            reduced: Vec::new(),
            guard_update: Vec::new(),
        };
        let make = |rel: &Rel, out: &mut Vec<Rel>| {
            let leq = rel.to_leq().split_variables_and_constants(&VarSet::new());
            if !leq.is_trivially_true() {
                out.push(leq);
            }
        };
        for rel in &self.reduced_guard {
            make(rel, &mut constraints.reduced);
        }
        for rel in &self.guard {
            make(rel, &mut constraints.guard);
            make(rel, &mut constraints.guard_update);
        }
        let updates: Vec<(Variable, Expr)> = self
            .update
            .iter()
            .map(|(v, e)| (*v, e.clone()))
            .collect();
        for (v, rhs) in updates {
            let p = self.primed_var(v);
            make(&Rel::le(Expr::var(p), rhs.clone()), &mut constraints.guard_update);
            make(&Rel::ge(Expr::var(p), rhs), &mut constraints.guard_update);
        }
        constraints
    }

    /// Fresh coefficient unknowns for the metering template.
    fn create_coefficients(&mut self) {
        let sort = if self.config.allow_real_coefficients {
            Sort::Real
        } else {
            Sort::Int
        };
        self.coeff0 = Some(self.vars.fresh_temp("c", sort));
        self.coeffs = (0..self.varlist.len())
            .map(|_| self.vars.fresh_temp("c", sort))
            .collect();
    }

    /// Farkas' lemma for one implication `A·x ≤ b ⇒ c·x + c0 ≤ delta`:
    /// `∃λ ≥ 0. λᵀA = cᵀ ∧ λᵀb + c0 ≤ delta`.
    fn apply_farkas(
        &mut self,
        constraints: &[Rel],
        vars_list: &[Variable],
        coeffs: &[Expr],
        c0: Expr,
        delta: i64,
    ) -> BoolExpr {
        debug_assert_eq!(vars_list.len(), coeffs.len());
        let lambdas: Vec<Variable> = (0..constraints.len())
            .map(|_| self.vars.fresh_temp("l", Sort::Real))
            .collect();

        let mut parts = Vec::new();
        for l in &lambdas {
            parts.push(BoolExpr::lit(Rel::ge(Expr::var(*l), Expr::zero())));
        }

        let mut var_to_coeff: BTreeMap<Variable, Expr> = vars_list
            .iter()
            .zip(coeffs.iter())
            .map(|(v, c)| (*v, c.clone()))
            .collect();
        // constraint variables that do not contribute to the metering
        // function still need a row, with coefficient zero
        for rel in constraints {
            for v in rel.vars() {
                var_to_coeff.entry(v).or_insert_with(Expr::zero);
            }
        }

        // λᵀA = cᵀ, one row per variable
        for (v, coeff) in &var_to_coeff {
            let mut sum = Expr::zero();
            for (rel, l) in constraints.iter().zip(&lambdas) {
                let a = rel.lhs().coeff(*v, 1);
                sum = sum + Expr::var(*l) * a;
            }
            parts.push(BoolExpr::lit(Rel::eq(sum, coeff.clone())));
        }

        // λᵀb + c0 ≤ delta
        let mut sum = c0;
        for (rel, l) in constraints.iter().zip(&lambdas) {
            sum = sum + Expr::var(*l) * rel.rhs().clone();
        }
        parts.push(BoolExpr::lit(Rel::le(sum, Expr::int(delta))));

        BoolExpr::build_and(parts)
    }

    /// `¬G ⇒ f(x) ≤ 0`, one Farkas system per reduced constraint.
    fn gen_not_guard_implication(&mut self, constraints: &Constraints) -> BoolExpr {
        let coeffs: Vec<Expr> = self.coeffs.iter().map(|c| Expr::var(*c)).collect();
        let c0 = Expr::var(self.coeff0.expect("coefficients created"));
        let varlist = self.varlist.clone();
        let mut parts = Vec::new();
        for g in &constraints.reduced {
            let negated = negate_leq(g).split_variables_and_constants(&VarSet::new());
            parts.push(self.apply_farkas(&[negated], &varlist, &coeffs, c0.clone(), 0));
        }
        BoolExpr::build_and(parts)
    }

    /// `G ⇒ f(x) ≥ 1` (strict) or `f(x) ≥ 0` (relaxed), stated as
    /// `−f(x) ≤ −1` resp. `−f(x) ≤ 0`.
    fn gen_guard_positive_implication(&mut self, constraints: &Constraints, strict: bool) -> BoolExpr {
        let neg_coeffs: Vec<Expr> = self.coeffs.iter().map(|c| -Expr::var(*c)).collect();
        let neg_c0 = -Expr::var(self.coeff0.expect("coefficients created"));
        let varlist = self.varlist.clone();
        self.apply_farkas(
            &constraints.guard,
            &varlist,
            &neg_coeffs,
            neg_c0,
            if strict { -1 } else { 0 },
        )
    }

    /// `G ∧ U ⇒ f(x) − f(x') ≤ 1`; only updated variables carry nonzero
    /// coefficients here.
    fn gen_update_implication(&mut self, constraints: &Constraints) -> BoolExpr {
        let mut vars_list = Vec::new();
        let mut coeffs = Vec::new();
        for (i, v) in self.varlist.clone().into_iter().enumerate() {
            if !self.update.contains(v) {
                continue;
            }
            let p = self.primed_var(v);
            vars_list.push(v);
            coeffs.push(Expr::var(self.coeffs[i]));
            vars_list.push(p);
            coeffs.push(-Expr::var(self.coeffs[i]));
        }
        self.apply_farkas(&constraints.guard_update, &vars_list, &coeffs, Expr::zero(), 1)
    }

    /// `∨ᵢ cᵢ ≠ 0` so the zero function never wins.
    fn gen_non_trivial(&self) -> BoolExpr {
        BoolExpr::build_or(
            self.coeffs
                .iter()
                .map(|c| BoolExpr::lit(Rel::ne(Expr::var(*c), Expr::zero()))),
        )
    }

    fn solve_farkas(&mut self, constraints: &Constraints) -> (F::Solver, SmtResult) {
        let not_guard = self.gen_not_guard_implication(constraints);
        let update_impl = self.gen_update_implication(constraints);
        let non_trivial = self.gen_non_trivial();

        let mut solver = self.solver();
        let encoder = Encoder::new(self.vars, self.config);
        for part in [not_guard, update_impl, non_trivial] {
            match encoder.encode_bool(&part) {
                Ok(e) => solver.add(e),
                Err(err) => {
                    debug!("cannot encode farkas system: {}", err);
                    return (solver, SmtResult::Unknown);
                }
            }
        }
        let res = solver.check();
        (solver, res)
    }

    /// The metering function from a model, with the nonlinear substitutions
    /// undone.
    fn build_result(&self, model: &cadenza_smt::Model) -> Expr {
        let mut result = model.value_expr(self.coeff0.expect("coefficients created"));
        for (c, v) in self.coeffs.iter().zip(&self.varlist) {
            result = result + model.value_expr(*c) * Expr::var(*v);
        }
        result.subs(&self.nonlinear_subs).expand()
    }

    /// All combinations of instantiating free variables by bounds from the
    /// guard, capped per variable.
    fn instantiate_free_variables(&self) -> Vec<Subs> {
        let cap = self.config.freevar_instantiate_max_bounds;
        if cap == 0 {
            return Vec::new();
        }
        let mut bounds: BTreeMap<Variable, Vec<Expr>> = BTreeMap::new();
        for v in self.guard.vars() {
            if !self.vars.is_temp(v) {
                continue;
            }
            for rel in &self.guard {
                if bounds.get(&v).map(|b| b.len()).unwrap_or(0) >= cap {
                    break;
                }
                if !rel.has(v) || !rel.is_ineq() {
                    continue;
                }
                let leq = rel.to_leq();
                let term = leq.lhs().clone() - leq.rhs().clone();
                if let Some(sol) = toolbox::solve_term_for(&term, v, SolveLevel::NoCoefficients) {
                    let entry = bounds.entry(v).or_default();
                    if !entry.iter().any(|e| e.equals(&sol)) {
                        entry.push(sol);
                    }
                }
            }
        }
        if bounds.is_empty() {
            return Vec::new();
        }
        let mut combos = vec![Subs::new()];
        for (v, options) in bounds {
            let mut next = Vec::with_capacity(combos.len() * options.len());
            for combo in &combos {
                for option in &options {
                    let mut extended = combo.clone();
                    extended.insert(v, option.clone());
                    next.push(extended);
                }
            }
            combos = next;
        }
        combos
    }

    /// The two-counter conflict heuristic: exactly two simple counters
    /// limited by the reduced guard suggest a min/max metering function.
    fn conflict_vars(&self) -> Option<(Variable, Variable)> {
        let mut fail_vars = Vec::new();
        for (v, rhs) in self.update.iter() {
            let rhs_vars = rhs.vars();
            // the update must be simple counting, e.g. a := a + 2
            if rhs_vars.len() != 1 || !rhs_vars.contains(v) {
                continue;
            }
            if self.reduced_guard.iter().any(|rel| rel.has(*v)) {
                fail_vars.push(*v);
            }
        }
        if fail_vars.len() == 2 {
            Some((fail_vars[0], fail_vars[1]))
        } else {
            None
        }
    }
}

/// Searches a metering function for a linear simple loop.
pub fn generate<F: SolverFactory>(
    vars: &mut VariableManager,
    config: &Config,
    factory: &F,
    rule: &Rule,
) -> MeterResult {
    let mut f = MeteringFinder::new(vars, config, factory, rule);

    f.preprocess_freevars();
    if !f.make_relational_guard() {
        debug!("metering aborts: guard contains a disequality");
        return MeterResult::Nonlinear;
    }

    f.reduce_guard();
    f.find_relevant_variables();
    f.restrict_to_relevant();

    if !f.make_linear_transition() {
        debug!("metering aborts: nonlinear transition");
        return MeterResult::Nonlinear;
    }
    if !f.nonlinear_subs.is_empty() {
        // the substitutions changed guard and update
        f.reduce_guard();
        f.find_relevant_variables();
        f.restrict_to_relevant();
    }

    if f.reduced_guard.is_empty() {
        return MeterResult::Unbounded;
    }

    let mut constraints = f.build_constraints();
    f.create_coefficients();
    let (mut solver, mut res) = f.solve_farkas(&constraints);

    // retry with instantiated free variables
    let mut replace_free: Option<Subs> = None;
    if res != SmtResult::Sat {
        let original_guard = f.guard.clone();
        let original_update = f.update.clone();
        for sigma in f.instantiate_free_variables() {
            debug!("trying free-variable instantiation");
            f.guard = original_guard.subs(&sigma);
            f.update = original_update.subs(&sigma);
            f.reduce_guard();
            f.find_relevant_variables();
            f.restrict_to_relevant();
            if f.reduced_guard.is_empty() {
                continue;
            }
            constraints = f.build_constraints();
            f.create_coefficients();
            let (s, r) = f.solve_farkas(&constraints);
            solver = s;
            res = r;
            if res == SmtResult::Sat {
                replace_free = Some(sigma);
                break;
            }
        }
    }

    if res != SmtResult::Sat {
        if let Some((a, b)) = f.conflict_vars() {
            return MeterResult::ConflictVar(a, b);
        }
        return MeterResult::Unsat;
    }

    // prefer a strictly positive bound, fall back to non-negative
    solver.push();
    let strict = f.gen_guard_positive_implication(&constraints, true);
    let encoder = Encoder::new(f.vars, f.config);
    let strict_encoded = encoder.encode_bool(&strict);
    match strict_encoded {
        Ok(e) => solver.add(e),
        Err(_) => return MeterResult::Unsat,
    }
    let mut final_res = solver.check();
    if final_res != SmtResult::Sat {
        solver.pop();
        let relaxed = f.gen_guard_positive_implication(&constraints, false);
        let encoder = Encoder::new(f.vars, f.config);
        match encoder.encode_bool(&relaxed) {
            Ok(e) => solver.add(e),
            Err(_) => return MeterResult::Unsat,
        }
        final_res = solver.check();
    }
    if final_res != SmtResult::Sat {
        debug!("farkas positivity failed: {:?}", final_res);
        return MeterResult::Unsat;
    }

    let model = match solver.model() {
        Some(m) => m.clone(),
        None => {
            debug!("solver reported sat without a model");
            return MeterResult::Unsat;
        }
    };
    let mut meter = f.build_result(&model);

    // apply the instantiation to the rule we hand back
    let mut out_rule = match &replace_free {
        Some(sigma) => rule.apply_subs(sigma),
        None => rule.clone(),
    };

    // scale rational coefficients back to an integer-valued function
    if f.config.allow_real_coefficients {
        let mut mult = num_bigint::BigInt::one();
        for c in f.coeffs.iter().chain(f.coeff0.iter()) {
            if let Some(value) = model.get(*c) {
                if !value.is_integer() {
                    mult = mult.lcm(value.denom());
                }
            }
        }
        if !mult.is_one() {
            let meter_var = f.vars.fresh_temp("meter", Sort::Int);
            let factor = Expr::constant(Rational::from_integer(mult));
            let mut guard = out_rule.guard().clone();
            guard.push(Rel::eq(
                Expr::var(meter_var) * factor.clone(),
                meter.clone() * factor,
            ));
            out_rule = Rule::new_linear(
                out_rule.loc(),
                guard,
                out_rule.cost().clone(),
                out_rule.target(),
                out_rule.update().clone(),
            );
            meter = Expr::var(meter_var);
        }
    }

    MeterResult::Metered { meter, rule: out_rule }
}

/// Strengthens the guard with constraints implied by guard and update:
/// for every relevant update `v := rhs` whose right-hand side reads no
/// updated variable, relevant constraints over `v` also hold one step later.
/// Returns the strengthened rule, or `None` when nothing was added.
pub fn prepare_guard<F: SolverFactory>(
    vars: &mut VariableManager,
    config: &Config,
    factory: &F,
    rule: &Rule,
) -> Option<Rule> {
    let mut f = MeteringFinder::new(vars, config, factory, rule);
    f.reduce_guard();
    f.find_relevant_variables();

    let mut guard = rule.guard().clone();
    let mut changed = false;
    for (v, rhs) in f.update.iter() {
        if !f.is_relevant(*v) {
            continue;
        }
        let reads_updated = rhs.vars().into_iter().any(|w| f.update.contains(w));
        if reads_updated {
            continue;
        }
        let sigma = Subs::single(*v, rhs.clone());
        for rel in &f.reduced_guard {
            if rel.has(*v) {
                let implied = rel.subs(&sigma);
                if !guard.contains(&implied) {
                    guard.push(implied);
                    changed = true;
                }
            }
        }
    }
    if !changed {
        return None;
    }
    Some(Rule::new_linear(
        rule.loc(),
        guard,
        rule.cost().clone(),
        rule.target(),
        rule.update().clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Cost, Loc};
    use cadenza_smt::LinearFactory;

    fn counting_rule(vars: &mut VariableManager) -> (Rule, Variable, Variable) {
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::one());
        let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
        (
            Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update),
            x,
            y,
        )
    }

    #[test]
    fn counting_loop_meters_to_distance() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let (rule, x, y) = counting_rule(&mut vars);
        match generate(&mut vars, &config, &LinearFactory, &rule) {
            MeterResult::Metered { meter, .. } => {
                // G => f >= 1, G /\ U => f - f' <= 1, !G => f <= 0 all hold
                // for f = y - x; any valid f agrees with y - x up to model
                // choice, so check the defining properties instead.
                assert!(meter.is_linear(None));
                let up = Subs::single(x, Expr::var(x) + Expr::one());
                let drop = (meter.clone() - meter.subs(&up)).expand();
                // the drop per step is a constant at most 1
                let value = drop.as_rational().expect("affine in x");
                assert!(value <= Rational::one());
                assert!(meter.has(y) || meter.has(x));
            }
            other => panic!("expected metering function, got {:?}", other),
        }
    }

    #[test]
    fn unbounded_loop_is_detected() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        // guard only constrains a variable the update never touches
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::one());
        let guard: Guard = vec![Rel::gt(Expr::var(y), Expr::int(0))].into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
        assert!(matches!(
            generate(&mut vars, &config, &LinearFactory, &rule),
            MeterResult::Unbounded
        ));
    }

    #[test]
    fn conflicting_counters_are_reported() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let a = vars.add_program_var("a");
        let b = vars.add_program_var("b");
        let n = vars.add_program_var("N");
        let m = vars.add_program_var("M");
        // a < N, b < M with both counters rising: needs min(N-a, M-b)
        let mut update = Update::new();
        update.insert(a, Expr::var(a) + Expr::one());
        update.insert(b, Expr::var(b) + Expr::one());
        let guard: Guard = vec![
            Rel::lt(Expr::var(a), Expr::var(n)),
            Rel::lt(Expr::var(b), Expr::var(m)),
        ]
        .into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
        match generate(&mut vars, &config, &LinearFactory, &rule) {
            MeterResult::ConflictVar(u, v) => {
                assert!(u == a || u == b);
                assert!(v == a || v == b);
                assert_ne!(u, v);
            }
            MeterResult::Metered { meter, .. } => {
                panic!("min/max loops have no affine meter, got {:?}", meter)
            }
            other => panic!("expected conflict-var diagnosis, got {:?}", other),
        }
    }

    #[test]
    fn conflict_resolves_with_ordering_hypothesis() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let a = vars.add_program_var("a");
        let b = vars.add_program_var("b");
        let k = vars.add_program_var("K");
        let mut update = Update::new();
        update.insert(a, Expr::var(a) + Expr::one());
        update.insert(b, Expr::var(b) + Expr::one());
        // a < K, b < K conflict, but under a > b the second bound is
        // implied one step later and drops out, leaving f = K - a
        let guard: Guard = vec![
            Rel::lt(Expr::var(a), Expr::var(k)),
            Rel::lt(Expr::var(b), Expr::var(k)),
            Rel::gt(Expr::var(a), Expr::var(b)),
        ]
        .into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
        assert!(matches!(
            generate(&mut vars, &config, &LinearFactory, &rule),
            MeterResult::Metered { .. }
        ));
    }

    #[test]
    fn free_variable_instantiation_kicks_in() {
        let mut vars = VariableManager::new();
        let config = Config::default();
        let x = vars.add_program_var("x");
        let y = vars.fresh_temp("y", Sort::Int);
        // x <= 100, y >= 1 with x := x + y: no affine meter for free y,
        // but instantiating y = 1 gives f = 101 - x
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::var(y));
        let guard: Guard = vec![
            Rel::le(Expr::var(x), Expr::int(100)),
            Rel::ge(Expr::var(y), Expr::one()),
        ]
        .into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
        match generate(&mut vars, &config, &LinearFactory, &rule) {
            MeterResult::Metered { meter, rule: metered } => {
                // the instantiation y = 1 must have been applied to the rule
                assert!(metered
                    .update()
                    .get(x)
                    .unwrap()
                    .equals(&(Expr::var(x) + Expr::one())));
                assert!(meter.is_linear(None));
            }
            other => panic!("expected metering via instantiation, got {:?}", other),
        }
    }
}
