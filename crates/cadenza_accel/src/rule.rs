//! Transition rules.
//!
//! A rule `(loc, guard, cost, update, loc')` fires when its guard holds,
//! applies the parallel update atomically, and accrues its cost. The engine
//! only accelerates linear simple loops (one right-hand side, same source
//! and target location); the data model still carries multiple right-hand
//! sides so callers can hand over their rules unchanged.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use cadenza_base::{Variable, VariableManager};
use cadenza_term::{Expr, Guard, Subs, VarSet};

/// A location of the transition system, opaque to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc(pub usize);

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

/// A parallel assignment from program variables to expressions.
///
/// Variables outside the map are updated to themselves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Update {
    map: BTreeMap<Variable, Expr>,
}

impl Update {
    /// The identity update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the assignment for `v`.
    pub fn insert(&mut self, v: Variable, e: Expr) {
        self.map.insert(v, e);
    }

    /// The right-hand side of `v`, if assigned.
    pub fn get(&self, v: Variable) -> Option<&Expr> {
        self.map.get(&v)
    }

    /// `true` iff `v` is assigned.
    pub fn contains(&self, v: Variable) -> bool {
        self.map.contains_key(&v)
    }

    /// Removes the assignment of `v`.
    pub fn remove(&mut self, v: Variable) {
        self.map.remove(&v);
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// `true` iff this is the identity update.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The assigned variables, in order.
    pub fn domain(&self) -> impl Iterator<Item = Variable> + '_ {
        self.map.keys().copied()
    }

    /// Iterates over assignments in variable order.
    pub fn iter(&self) -> btree_map::Iter<'_, Variable, Expr> {
        self.map.iter()
    }

    /// Mutable iteration over the right-hand sides.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, Variable, Expr> {
        self.map.iter_mut()
    }

    /// The update as a substitution (one forward step).
    pub fn to_subs(&self) -> Subs {
        self.map
            .iter()
            .map(|(v, e)| (*v, e.clone()))
            .collect()
    }

    /// Applies a substitution to every right-hand side.
    pub fn subs(&self, sigma: &Subs) -> Update {
        Update {
            map: self
                .map
                .iter()
                .map(|(v, e)| (*v, e.subs(sigma)))
                .collect(),
        }
    }

    /// Collects the variables of all right-hand sides.
    pub fn collect_rhs_vars(&self, out: &mut VarSet) {
        for e in self.map.values() {
            e.collect_vars(out);
        }
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        let parts: Vec<String> = self
            .map
            .iter()
            .map(|(v, e)| format!("{} := {}", vars.name(*v), e.fmt_with(vars)))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

impl FromIterator<(Variable, Expr)> for Update {
    fn from_iter<T: IntoIterator<Item = (Variable, Expr)>>(iter: T) -> Self {
        Update {
            map: iter.into_iter().collect(),
        }
    }
}

/// The cost accrued per firing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cost {
    /// An ordinary expression cost.
    Finite(Expr),
    /// Sentinel for nonterminating rules; such a rule must carry an empty
    /// update.
    Nonterm,
}

impl Cost {
    /// Cost of one.
    pub fn unit() -> Self {
        Cost::Finite(Expr::one())
    }

    /// Cost of zero.
    pub fn zero() -> Self {
        Cost::Finite(Expr::zero())
    }

    /// `true` iff this is the nontermination sentinel.
    pub fn is_nonterm(&self) -> bool {
        matches!(self, Cost::Nonterm)
    }

    /// The underlying expression of a finite cost.
    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Cost::Finite(e) => Some(e),
            Cost::Nonterm => None,
        }
    }

    /// `true` iff the cost is a finite polynomial.
    pub fn is_poly(&self) -> bool {
        match self {
            Cost::Finite(e) => e.is_poly(),
            Cost::Nonterm => false,
        }
    }

    /// Applies a substitution to a finite cost.
    pub fn subs(&self, sigma: &Subs) -> Cost {
        match self {
            Cost::Finite(e) => Cost::Finite(e.subs(sigma)),
            Cost::Nonterm => Cost::Nonterm,
        }
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        match self {
            Cost::Finite(e) => e.fmt_with(vars),
            Cost::Nonterm => "NONTERM".to_string(),
        }
    }
}

/// Source location, guard and cost of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleLhs {
    /// Source location.
    pub loc: Loc,
    /// Enabling condition.
    pub guard: Guard,
    /// Cost per firing.
    pub cost: Cost,
}

/// Target location and update of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleRhs {
    /// Target location.
    pub target: Loc,
    /// Parallel update applied on firing.
    pub update: Update,
}

/// A transition rule with one or more right-hand sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    lhs: RuleLhs,
    rhss: Vec<RuleRhs>,
}

impl Rule {
    /// A linear rule (exactly one right-hand side).
    ///
    /// # Panics
    ///
    /// Panics (debug) when a nonterm cost is paired with a non-empty
    /// update; nonterm rules never make progress, so an update would be
    /// meaningless.
    pub fn new_linear(loc: Loc, guard: Guard, cost: Cost, target: Loc, update: Update) -> Self {
        debug_assert!(!cost.is_nonterm() || update.is_empty());
        Rule {
            lhs: RuleLhs { loc, guard, cost },
            rhss: vec![RuleRhs { target, update }],
        }
    }

    /// A nontermination witness rule: guard only, nonterm cost, empty
    /// update, redirected to `sink`.
    pub fn nonterm(loc: Loc, guard: Guard, sink: Loc) -> Self {
        Rule::new_linear(loc, guard, Cost::Nonterm, sink, Update::new())
    }

    /// Source location.
    pub fn loc(&self) -> Loc {
        self.lhs.loc
    }

    /// The guard.
    pub fn guard(&self) -> &Guard {
        &self.lhs.guard
    }

    /// The cost.
    pub fn cost(&self) -> &Cost {
        &self.lhs.cost
    }

    /// The right-hand sides.
    pub fn rhss(&self) -> &[RuleRhs] {
        &self.rhss
    }

    /// `true` iff the rule has exactly one right-hand side.
    pub fn is_linear(&self) -> bool {
        self.rhss.len() == 1
    }

    /// Target location of a linear rule.
    pub fn target(&self) -> Loc {
        self.rhss[0].target
    }

    /// Update of a linear rule.
    pub fn update(&self) -> &Update {
        &self.rhss[0].update
    }

    /// `true` iff the rule is a linear self-loop.
    pub fn is_simple_loop(&self) -> bool {
        self.is_linear() && self.lhs.loc == self.rhss[0].target
    }

    /// `true` iff guard is trivial, cost zero and update empty.
    pub fn is_dummy(&self) -> bool {
        self.lhs.guard.is_empty()
            && self.lhs.cost == Cost::zero()
            && self.rhss.iter().all(|r| r.update.is_empty())
    }

    /// Applies a substitution to guard, cost, and all updates.
    pub fn apply_subs(&self, sigma: &Subs) -> Rule {
        Rule {
            lhs: RuleLhs {
                loc: self.lhs.loc,
                guard: self.lhs.guard.subs(sigma),
                cost: self.lhs.cost.subs(sigma),
            },
            rhss: self
                .rhss
                .iter()
                .map(|r| RuleRhs {
                    target: r.target,
                    update: r.update.subs(sigma),
                })
                .collect(),
        }
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        let rhss: Vec<String> = self
            .rhss
            .iter()
            .map(|r| format!("{} {}", r.target, r.update.fmt_with(vars)))
            .collect();
        format!(
            "{} -> {} [{}] cost {}",
            self.lhs.loc,
            rhss.join(", "),
            self.lhs.guard.fmt_with(vars),
            self.lhs.cost.fmt_with(vars)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_term::Rel;

    #[test]
    fn simple_loop_detection() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::int(1));
        let guard: Guard = vec![Rel::gt(Expr::var(x), Expr::int(0))].into();

        let self_loop = Rule::new_linear(Loc(0), guard.clone(), Cost::unit(), Loc(0), update.clone());
        assert!(self_loop.is_simple_loop());

        let edge = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(1), update);
        assert!(edge.is_linear());
        assert!(!edge.is_simple_loop());
    }

    #[test]
    fn nonterm_rules_have_empty_updates() {
        let rule = Rule::nonterm(Loc(0), Guard::new(), Loc(9));
        assert!(rule.cost().is_nonterm());
        assert!(rule.update().is_empty());
        assert_eq!(rule.target(), Loc(9));
    }

    #[test]
    fn apply_subs_reaches_all_parts() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let n = vars.fresh_temp("n", cadenza_base::Sort::Int);
        let mut update = Update::new();
        update.insert(x, Expr::var(x) + Expr::var(n));
        let guard: Guard = vec![Rel::gt(Expr::var(n), Expr::int(1))].into();
        let rule = Rule::new_linear(Loc(0), guard, Cost::Finite(Expr::var(n)), Loc(0), update);

        let inst = rule.apply_subs(&Subs::single(n, Expr::int(5)));
        assert!(inst.cost().as_expr().unwrap().equals(&Expr::int(5)));
        assert!(inst.update().get(x).unwrap().equals(&(Expr::var(x) + Expr::int(5))));
        assert!(inst.guard().iter().next().unwrap().is_trivially_true());
    }

    #[test]
    fn update_to_subs_roundtrip() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        let mut update = Update::new();
        update.insert(x, Expr::var(y));
        let sigma = update.to_subs();
        assert!(Expr::var(x).subs(&sigma).equals(&Expr::var(y)));
        assert!(Expr::var(y).subs(&sigma).equals(&Expr::var(y)));
    }
}
