//! Boolean combinations of relations.
//!
//! A [`BoolExpr`] is a flattened and/or tree over relation literals: a
//! conjunction never has a conjunction child, junction children live in a
//! set, and the constants ⊤/⊥ are absorbed during construction. Structural
//! equality therefore coincides with equality up to associativity,
//! commutativity and idempotence.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use cadenza_base::VariableManager;

use crate::expr::VarSet;
use crate::guard::Guard;
use crate::rel::Rel;
use crate::subs::Subs;

/// A boolean formula over relation literals.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BoolExpr {
    /// ⊤ or ⊥.
    Const(bool),
    /// A single relation.
    Lit(Rel),
    /// A conjunction of at least two distinct children, none a conjunction.
    And(BTreeSet<BoolExpr>),
    /// A disjunction of at least two distinct children, none a disjunction.
    Or(BTreeSet<BoolExpr>),
}

impl BoolExpr {
    /// ⊤
    pub fn top() -> Self {
        BoolExpr::Const(true)
    }

    /// ⊥
    pub fn bot() -> Self {
        BoolExpr::Const(false)
    }

    /// A literal.
    pub fn lit(rel: Rel) -> Self {
        BoolExpr::Lit(rel)
    }

    /// Conjunction of arbitrarily many formulas, flattened and simplified.
    pub fn build_and<I: IntoIterator<Item = BoolExpr>>(xs: I) -> Self {
        let mut children = BTreeSet::new();
        for x in xs {
            match x {
                BoolExpr::Const(true) => {}
                BoolExpr::Const(false) => return BoolExpr::bot(),
                BoolExpr::And(inner) => children.extend(inner),
                other => {
                    children.insert(other);
                }
            }
        }
        match children.len() {
            0 => BoolExpr::top(),
            1 => children.into_iter().next().unwrap(),
            _ => BoolExpr::And(children),
        }
    }

    /// Disjunction of arbitrarily many formulas, flattened and simplified.
    pub fn build_or<I: IntoIterator<Item = BoolExpr>>(xs: I) -> Self {
        let mut children = BTreeSet::new();
        for x in xs {
            match x {
                BoolExpr::Const(false) => {}
                BoolExpr::Const(true) => return BoolExpr::top(),
                BoolExpr::Or(inner) => children.extend(inner),
                other => {
                    children.insert(other);
                }
            }
        }
        match children.len() {
            0 => BoolExpr::bot(),
            1 => children.into_iter().next().unwrap(),
            _ => BoolExpr::Or(children),
        }
    }

    /// Conjunction of a guard's literals.
    pub fn from_guard(guard: &Guard) -> Self {
        Self::build_and(guard.iter().cloned().map(BoolExpr::Lit))
    }

    /// The negation, with De Morgan pushed all the way to the literals.
    pub fn negation(&self) -> BoolExpr {
        match self {
            BoolExpr::Const(b) => BoolExpr::Const(!b),
            BoolExpr::Lit(rel) => BoolExpr::Lit(rel.negation()),
            BoolExpr::And(xs) => Self::build_or(xs.iter().map(|x| x.negation())),
            BoolExpr::Or(xs) => Self::build_and(xs.iter().map(|x| x.negation())),
        }
    }

    /// Applies a substitution to every literal.
    pub fn subs(&self, sigma: &Subs) -> BoolExpr {
        match self {
            BoolExpr::Const(_) => self.clone(),
            BoolExpr::Lit(rel) => BoolExpr::Lit(rel.subs(sigma)),
            BoolExpr::And(xs) => Self::build_and(xs.iter().map(|x| x.subs(sigma))),
            BoolExpr::Or(xs) => Self::build_or(xs.iter().map(|x| x.subs(sigma))),
        }
    }

    /// Collects all literals.
    pub fn collect_lits(&self, out: &mut BTreeSet<Rel>) {
        match self {
            BoolExpr::Const(_) => {}
            BoolExpr::Lit(rel) => {
                out.insert(rel.clone());
            }
            BoolExpr::And(xs) | BoolExpr::Or(xs) => {
                for x in xs {
                    x.collect_lits(out);
                }
            }
        }
    }

    /// All literals of the formula.
    pub fn lits(&self) -> BTreeSet<Rel> {
        let mut out = BTreeSet::new();
        self.collect_lits(&mut out);
        out
    }

    /// Collects all variables.
    pub fn collect_vars(&self, out: &mut VarSet) {
        for lit in self.lits() {
            lit.collect_vars(out);
        }
    }

    /// All variables of the formula.
    pub fn vars(&self) -> VarSet {
        let mut out = VarSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// `true` iff every literal is linear.
    pub fn is_linear(&self) -> bool {
        self.lits().iter().all(|r| r.is_linear(None))
    }

    /// `true` iff every literal is polynomial.
    pub fn is_poly(&self) -> bool {
        self.lits().iter().all(|r| r.is_poly())
    }

    /// `true` iff the formula contains no disjunction.
    pub fn is_conjunction(&self) -> bool {
        match self {
            BoolExpr::Const(_) | BoolExpr::Lit(_) => true,
            BoolExpr::And(xs) => xs.iter().all(|x| x.is_conjunction()),
            BoolExpr::Or(_) => false,
        }
    }

    /// Disjunctive normal form: a list of guards whose disjunction is
    /// equivalent to the formula. ⊤ yields one empty guard, ⊥ yields none.
    /// The size is bounded by the product of the disjunctive children sizes.
    pub fn dnf(&self) -> Vec<Guard> {
        match self {
            BoolExpr::Const(true) => vec![Guard::new()],
            BoolExpr::Const(false) => vec![],
            BoolExpr::Lit(rel) => vec![vec![rel.clone()].into()],
            BoolExpr::Or(xs) => xs.iter().flat_map(|x| x.dnf()).collect(),
            BoolExpr::And(xs) => {
                let mut acc: Vec<Guard> = vec![Guard::new()];
                for x in xs {
                    let child = x.dnf();
                    if child.is_empty() {
                        return vec![];
                    }
                    let mut next = Vec::with_capacity(acc.len() * child.len());
                    for g in &acc {
                        for h in &child {
                            let mut merged = g.clone();
                            merged.extend(h.iter().cloned());
                            next.push(merged);
                        }
                    }
                    acc = next;
                }
                acc
            }
        }
    }

    /// Number of nodes, for diagnostics.
    pub fn size(&self) -> usize {
        match self {
            BoolExpr::Const(_) | BoolExpr::Lit(_) => 1,
            BoolExpr::And(xs) | BoolExpr::Or(xs) => 1 + xs.iter().map(|x| x.size()).sum::<usize>(),
        }
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        match self {
            BoolExpr::Const(true) => "true".to_string(),
            BoolExpr::Const(false) => "false".to_string(),
            BoolExpr::Lit(rel) => rel.fmt_with(vars),
            BoolExpr::And(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.fmt_with(vars)).collect();
                format!("({})", parts.join(" && "))
            }
            BoolExpr::Or(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.fmt_with(vars)).collect();
                format!("({})", parts.join(" || "))
            }
        }
    }
}

impl BitAnd for BoolExpr {
    type Output = BoolExpr;
    fn bitand(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr::build_and([self, rhs])
    }
}

impl BitOr for BoolExpr {
    type Output = BoolExpr;
    fn bitor(self, rhs: BoolExpr) -> BoolExpr {
        BoolExpr::build_or([self, rhs])
    }
}

impl Not for BoolExpr {
    type Output = BoolExpr;
    fn not(self) -> BoolExpr {
        self.negation()
    }
}

impl From<Rel> for BoolExpr {
    fn from(rel: Rel) -> Self {
        BoolExpr::Lit(rel)
    }
}

impl fmt::Display for BoolExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoolExpr::Const(b) => write!(f, "{}", b),
            BoolExpr::Lit(rel) => write!(f, "{}", rel),
            BoolExpr::And(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
                write!(f, "({})", parts.join(" && "))
            }
            BoolExpr::Or(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
                write!(f, "({})", parts.join(" || "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use cadenza_base::{Variable, VariableManager};

    fn lits() -> (Variable, BoolExpr, BoolExpr, BoolExpr) {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let a = BoolExpr::lit(Rel::gt(Expr::var(x), Expr::int(0)));
        let b = BoolExpr::lit(Rel::lt(Expr::var(x), Expr::int(10)));
        let c = BoolExpr::lit(Rel::eq(Expr::var(x), Expr::int(5)));
        (x, a, b, c)
    }

    #[test]
    fn conjunctions_flatten() {
        let (_, a, b, c) = lits();
        let nested = BoolExpr::build_and([a.clone(), BoolExpr::build_and([b.clone(), c.clone()])]);
        let flat = BoolExpr::build_and([a, b, c]);
        assert_eq!(nested, flat);
        if let BoolExpr::And(xs) = &flat {
            assert_eq!(xs.len(), 3);
        } else {
            panic!("expected conjunction");
        }
    }

    #[test]
    fn constants_absorb() {
        let (_, a, _, _) = lits();
        assert_eq!(BoolExpr::build_and([a.clone(), BoolExpr::top()]), a);
        assert_eq!(
            BoolExpr::build_and([a.clone(), BoolExpr::bot()]),
            BoolExpr::bot()
        );
        assert_eq!(BoolExpr::build_or([a.clone(), BoolExpr::top()]), BoolExpr::top());
        assert_eq!(BoolExpr::build_or([a.clone(), BoolExpr::bot()]), a);
    }

    #[test]
    fn structural_equality_is_set_based() {
        let (_, a, b, _) = lits();
        assert_eq!(
            BoolExpr::build_and([a.clone(), b.clone()]),
            BoolExpr::build_and([b, a])
        );
    }

    #[test]
    fn dnf_distributes() {
        let (_, a, b, c) = lits();
        // a && (b || c) -> [a && b, a && c]
        let e = a.clone() & (b.clone() | c.clone());
        let dnf = e.dnf();
        assert_eq!(dnf.len(), 2);
        for guard in &dnf {
            assert_eq!(guard.len(), 2);
        }
    }

    #[test]
    fn negation_reaches_literals() {
        let (_, a, b, _) = lits();
        let e = (a.clone() & b.clone()).negation();
        assert!(matches!(e, BoolExpr::Or(_)));
        assert_eq!(e.negation(), a & b);
    }

    #[test]
    fn dnf_of_bot_is_empty() {
        assert!(BoolExpr::bot().dnf().is_empty());
        assert_eq!(BoolExpr::top().dnf().len(), 1);
    }
}
