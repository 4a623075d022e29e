//! Conjunctive guards.

use std::fmt;

use cadenza_base::VariableManager;

use crate::expr::VarSet;
use crate::rel::Rel;
use crate::subs::Subs;

/// An ordered conjunction of relations; the enabling condition of a rule.
///
/// A guard is well-formed iff it contains no `≠` literal; the acceleration
/// engine rejects ill-formed guards up front.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Guard {
    rels: Vec<Rel>,
}

impl Guard {
    /// The empty (trivially true) guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a conjunct.
    pub fn push(&mut self, rel: Rel) {
        self.rels.push(rel);
    }

    /// Number of conjuncts.
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    /// `true` iff there are no conjuncts.
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// Iterates over the conjuncts in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Rel> {
        self.rels.iter()
    }

    /// The `i`-th conjunct, if any.
    pub fn get(&self, i: usize) -> Option<&Rel> {
        self.rels.get(i)
    }

    /// `true` iff `rel` is literally among the conjuncts.
    pub fn contains(&self, rel: &Rel) -> bool {
        self.rels.contains(rel)
    }

    /// Applies a substitution to every conjunct.
    pub fn subs(&self, sigma: &Subs) -> Guard {
        self.rels.iter().map(|r| r.subs(sigma)).collect()
    }

    /// Collects the variables of every conjunct.
    pub fn collect_vars(&self, out: &mut VarSet) {
        for rel in &self.rels {
            rel.collect_vars(out);
        }
    }

    /// The variables of the guard.
    pub fn vars(&self) -> VarSet {
        let mut out = VarSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// `true` iff no conjunct uses `≠`.
    pub fn is_well_formed(&self) -> bool {
        self.rels.iter().all(|r| !r.is_ne())
    }

    /// `true` iff every conjunct is linear.
    pub fn is_linear(&self) -> bool {
        self.rels.iter().all(|r| r.is_linear(None))
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        if self.rels.is_empty() {
            return "true".to_string();
        }
        self.rels
            .iter()
            .map(|r| r.fmt_with(vars))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

impl From<Vec<Rel>> for Guard {
    fn from(rels: Vec<Rel>) -> Self {
        Guard { rels }
    }
}

impl FromIterator<Rel> for Guard {
    fn from_iter<T: IntoIterator<Item = Rel>>(iter: T) -> Self {
        Guard {
            rels: iter.into_iter().collect(),
        }
    }
}

impl Extend<Rel> for Guard {
    fn extend<T: IntoIterator<Item = Rel>>(&mut self, iter: T) {
        self.rels.extend(iter);
    }
}

impl IntoIterator for Guard {
    type Item = Rel;
    type IntoIter = std::vec::IntoIter<Rel>;
    fn into_iter(self) -> Self::IntoIter {
        self.rels.into_iter()
    }
}

impl<'a> IntoIterator for &'a Guard {
    type Item = &'a Rel;
    type IntoIter = std::slice::Iter<'a, Rel>;
    fn into_iter(self) -> Self::IntoIter {
        self.rels.iter()
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rels.is_empty() {
            return write!(f, "true");
        }
        let parts: Vec<String> = self.rels.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(" && "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use cadenza_base::VariableManager;

    #[test]
    fn well_formedness_rejects_neq() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let mut guard = Guard::new();
        guard.push(Rel::lt(Expr::var(x), Expr::int(5)));
        assert!(guard.is_well_formed());
        guard.push(Rel::ne(Expr::var(x), Expr::int(0)));
        assert!(!guard.is_well_formed());
    }

    #[test]
    fn subs_maps_every_conjunct() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let guard: Guard = vec![
            Rel::gt(Expr::var(x), Expr::int(0)),
            Rel::le(Expr::var(x), Expr::int(10)),
        ]
        .into();
        let stepped = guard.subs(&Subs::single(x, Expr::var(x) + Expr::int(1)));
        assert!(stepped
            .iter()
            .next()
            .unwrap()
            .lhs()
            .equals(&(Expr::var(x) + Expr::int(1))));
    }
}
