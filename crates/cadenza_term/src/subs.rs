//! Parallel substitutions.

use std::collections::btree_map;
use std::collections::BTreeMap;

use cadenza_base::{Variable, VariableManager};

use crate::expr::{Expr, VarSet};

/// A finite map from variables to expressions, applied in parallel.
///
/// Variables outside the domain are left untouched. Sequential composition
/// is explicit through [`Subs::compose`]; plain application never chains.
///
/// # Example
///
/// ```
/// use cadenza_base::VariableManager;
/// use cadenza_term::{Expr, Subs};
///
/// let mut vars = VariableManager::new();
/// let x = vars.add_program_var("x");
///
/// let up = Subs::single(x, Expr::var(x) + Expr::int(1));
/// // applying `up` twice equals applying its self-composition once
/// let twice = up.compose(&up);
/// let e = Expr::var(x);
/// assert!(e.subs(&up).subs(&up).equals(&e.subs(&twice)));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subs {
    map: BTreeMap<Variable, Expr>,
}

impl Subs {
    /// The empty substitution.
    pub fn new() -> Self {
        Self::default()
    }

    /// A substitution with a single binding.
    pub fn single(v: Variable, e: Expr) -> Self {
        let mut s = Self::new();
        s.insert(v, e);
        s
    }

    /// Adds or replaces the binding for `v`.
    pub fn insert(&mut self, v: Variable, e: Expr) {
        self.map.insert(v, e);
    }

    /// The image of `v`, if bound.
    pub fn get(&self, v: Variable) -> Option<&Expr> {
        self.map.get(&v)
    }

    /// `true` iff `v` is in the domain.
    pub fn contains(&self, v: Variable) -> bool {
        self.map.contains_key(&v)
    }

    /// `true` iff the domain is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// The domain, in order.
    pub fn domain(&self) -> impl Iterator<Item = Variable> + '_ {
        self.map.keys().copied()
    }

    /// Iterates over bindings in domain order.
    pub fn iter(&self) -> btree_map::Iter<'_, Variable, Expr> {
        self.map.iter()
    }

    /// Sequential composition: the substitution that behaves like applying
    /// `self` first and `other` afterwards.
    ///
    /// Every image of `self` is rewritten with `other`; bindings of `other`
    /// whose variable is outside the domain of `self` are kept as-is.
    pub fn compose(&self, other: &Subs) -> Subs {
        let mut map = BTreeMap::new();
        for (v, e) in &self.map {
            map.insert(*v, e.subs(other));
        }
        for (v, e) in &other.map {
            map.entry(*v).or_insert_with(|| e.clone());
        }
        Subs { map }
    }

    /// Collects all variables occurring in the images.
    pub fn collect_image_vars(&self, out: &mut VarSet) {
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

impl FromIterator<(Variable, Expr)> for Subs {
    fn from_iter<T: IntoIterator<Item = (Variable, Expr)>>(iter: T) -> Self {
        Subs {
            map: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Subs {
    type Item = (&'a Variable, &'a Expr);
    type IntoIter = btree_map::Iter<'a, Variable, Expr>;
    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::VariableManager;

    #[test]
    fn compose_applies_left_then_right() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");

        let first = Subs::single(x, Expr::var(y));
        let second = Subs::single(y, Expr::int(3));
        let both = first.compose(&second);

        // x -> y -> 3, and y itself also maps to 3
        assert!(Expr::var(x).subs(&both).equals(&Expr::int(3)));
        assert!(Expr::var(y).subs(&both).equals(&Expr::int(3)));
    }

    #[test]
    fn compose_keeps_left_binding_on_clash() {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");

        let first = Subs::single(x, Expr::int(1));
        let second = Subs::single(x, Expr::int(2));
        let both = first.compose(&second);

        // `x` is consumed by the first substitution before the second runs
        assert!(Expr::var(x).subs(&both).equals(&Expr::int(1)));
    }
}
