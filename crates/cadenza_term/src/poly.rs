//! Canonical polynomial form.
//!
//! A [`Poly`] is a map from monomials to rational coefficients; a
//! [`Monomial`] is a map from atoms to exponents. `BTreeMap` keeps both in a
//! deterministic order, so structural equality of the canonical form is
//! semantic equality of the terms. Subterms that are not polynomial (powers
//! with symbolic, negative, or oversized exponents) participate as opaque
//! [`Atom::Irreducible`] factors and compare structurally.

use std::collections::BTreeMap;

use cadenza_base::Variable;
use num_traits::{One, Zero};

use crate::expr::{Expr, Rational, VarSet};

/// A multiplicative atom: a variable, or an irreducible subterm treated as a
/// unit (e.g. `2^n`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Atom {
    /// A plain variable.
    Var(Variable),
    /// A canonicalised subterm that does not expand to a polynomial.
    Irreducible(Box<Expr>),
}

impl Atom {
    fn to_expr(&self) -> Expr {
        match self {
            Atom::Var(v) => Expr::var(*v),
            Atom::Irreducible(e) => (**e).clone(),
        }
    }

    fn contains_var(&self, v: Variable) -> bool {
        match self {
            Atom::Var(w) => *w == v,
            Atom::Irreducible(e) => e.has(v),
        }
    }
}

/// A product of atoms with positive exponents. The empty monomial is the
/// constant one.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Monomial {
    powers: BTreeMap<Atom, u32>,
}

impl Monomial {
    /// The constant monomial.
    pub fn one() -> Self {
        Monomial::default()
    }

    /// A single atom to the first power.
    pub fn atom(a: Atom) -> Self {
        let mut powers = BTreeMap::new();
        powers.insert(a, 1);
        Monomial { powers }
    }

    /// Multiplies two monomials by adding exponents.
    pub fn mul(&self, other: &Monomial) -> Monomial {
        let mut powers = self.powers.clone();
        for (a, e) in &other.powers {
            *powers.entry(a.clone()).or_insert(0) += e;
        }
        Monomial { powers }
    }

    /// The exponent of variable `v` in this monomial (0 if absent).
    pub fn var_power(&self, v: Variable) -> u32 {
        self.powers.get(&Atom::Var(v)).copied().unwrap_or(0)
    }

    /// Removes every power of `v` from the monomial.
    fn without_var(&self, v: Variable) -> Monomial {
        let mut powers = self.powers.clone();
        powers.remove(&Atom::Var(v));
        Monomial { powers }
    }

    fn to_expr(&self) -> Option<Expr> {
        if self.powers.is_empty() {
            return None;
        }
        let mut factors = Vec::new();
        for (a, e) in &self.powers {
            if *e == 1 {
                factors.push(a.to_expr());
            } else {
                factors.push(Expr::pow(a.to_expr(), Expr::int(*e as i64)));
            }
        }
        Some(Expr::mul(factors))
    }
}

/// A sum of monomials with rational coefficients, in canonical order.
/// Zero coefficients are never stored.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Poly {
    terms: BTreeMap<Monomial, Rational>,
}

impl Poly {
    /// The zero polynomial.
    pub fn zero() -> Self {
        Poly::default()
    }

    /// A constant polynomial.
    pub fn constant(c: Rational) -> Self {
        let mut terms = BTreeMap::new();
        if !c.is_zero() {
            terms.insert(Monomial::one(), c);
        }
        Poly { terms }
    }

    /// A single atom.
    pub fn atom(a: Atom) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(Monomial::atom(a), Rational::one());
        Poly { terms }
    }

    /// Polynomial sum.
    pub fn add(&self, other: &Poly) -> Poly {
        let mut terms = self.terms.clone();
        for (m, c) in &other.terms {
            let entry = terms.entry(m.clone()).or_insert_with(Rational::zero);
            *entry += c;
            if entry.is_zero() {
                terms.remove(m);
            }
        }
        Poly { terms }
    }

    /// Polynomial negation.
    pub fn neg(&self) -> Poly {
        Poly {
            terms: self
                .terms
                .iter()
                .map(|(m, c)| (m.clone(), -c.clone()))
                .collect(),
        }
    }

    /// Polynomial difference.
    pub fn sub(&self, other: &Poly) -> Poly {
        self.add(&other.neg())
    }

    /// Polynomial product.
    pub fn mul(&self, other: &Poly) -> Poly {
        let mut result = Poly::zero();
        for (m1, c1) in &self.terms {
            for (m2, c2) in &other.terms {
                let mono = m1.mul(m2);
                let coeff = c1 * c2;
                let entry = result.terms.entry(mono).or_insert_with(Rational::zero);
                *entry += coeff;
            }
        }
        result.terms.retain(|_, c| !c.is_zero());
        result
    }

    /// Power by repeated squaring.
    pub fn pow(&self, mut k: u32) -> Poly {
        let mut base = self.clone();
        let mut acc = Poly::constant(Rational::one());
        while k > 0 {
            if k & 1 == 1 {
                acc = acc.mul(&base);
            }
            k >>= 1;
            if k > 0 {
                base = base.mul(&base);
            }
        }
        acc
    }

    /// `true` iff this is the zero polynomial.
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// The value of a constant polynomial, if it is one.
    pub fn constant_value(&self) -> Option<Rational> {
        if self.terms.is_empty() {
            return Some(Rational::zero());
        }
        if self.terms.len() == 1 {
            if let Some(c) = self.terms.get(&Monomial::one()) {
                return Some(c.clone());
            }
        }
        None
    }

    /// The degree of variable `v`: the maximum exponent of `v` across all
    /// monomials. Occurrences buried in irreducible atoms do not count.
    pub fn degree(&self, v: Variable) -> u32 {
        self.terms
            .keys()
            .map(|m| m.var_power(v))
            .max()
            .unwrap_or(0)
    }

    /// The coefficient polynomial of `v^k`.
    pub fn coeff(&self, v: Variable, k: u32) -> Poly {
        let mut terms = BTreeMap::new();
        for (m, c) in &self.terms {
            if m.var_power(v) == k {
                terms.insert(m.without_var(v), c.clone());
            }
        }
        Poly { terms }
    }

    /// Linearity in the considered variables: every monomial has combined
    /// degree at most one in them, and none of them hides inside an
    /// irreducible atom.
    pub fn is_linear(&self, considered: &VarSet) -> bool {
        for m in self.terms.keys() {
            let mut degree = 0u32;
            for (a, e) in &m.powers {
                match a {
                    Atom::Var(v) if considered.contains(v) => degree += e,
                    Atom::Var(_) => {}
                    Atom::Irreducible(inner) => {
                        if considered.iter().any(|v| inner.has(*v)) {
                            return false;
                        }
                    }
                }
            }
            if degree > 1 {
                return false;
            }
        }
        true
    }

    /// All coefficients, in canonical order.
    pub fn coefficients(&self) -> impl Iterator<Item = &Rational> {
        self.terms.values()
    }

    /// Rebuilds a canonical expression: a sorted sum of coefficient-monomial
    /// products.
    pub fn to_expr(&self) -> Expr {
        if self.terms.is_empty() {
            return Expr::zero();
        }
        let mut addends = Vec::with_capacity(self.terms.len());
        for (m, c) in &self.terms {
            match m.to_expr() {
                None => addends.push(Expr::constant(c.clone())),
                Some(me) => {
                    if c.is_one() {
                        addends.push(me);
                    } else {
                        addends.push(Expr::mul(vec![Expr::constant(c.clone()), me]));
                    }
                }
            }
        }
        Expr::add(addends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::VariableManager;

    fn two_vars() -> (Variable, Variable) {
        let mut vars = VariableManager::new();
        (vars.add_program_var("x"), vars.add_program_var("y"))
    }

    #[test]
    fn add_is_commutative() {
        let (x, y) = two_vars();
        let px = Poly::atom(Atom::Var(x));
        let py = Poly::atom(Atom::Var(y));
        assert_eq!(px.add(&py), py.add(&px));
    }

    #[test]
    fn sub_cancels() {
        let (x, _) = two_vars();
        let px = Poly::atom(Atom::Var(x));
        assert!(px.sub(&px).is_zero());
    }

    #[test]
    fn distributivity() {
        let (x, y) = two_vars();
        let px = Poly::atom(Atom::Var(x));
        let py = Poly::atom(Atom::Var(y));
        let one = Poly::constant(Rational::one());
        // x*(y+1) == x*y + x
        let lhs = px.mul(&py.add(&one));
        let rhs = px.mul(&py).add(&px);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn repeated_squaring_matches_naive() {
        let (x, _) = two_vars();
        let p = Poly::atom(Atom::Var(x)).add(&Poly::constant(Rational::one()));
        let mut naive = Poly::constant(Rational::one());
        for _ in 0..5 {
            naive = naive.mul(&p);
        }
        assert_eq!(p.pow(5), naive);
    }

    #[test]
    fn constant_detection() {
        let (x, _) = two_vars();
        let px = Poly::atom(Atom::Var(x));
        assert_eq!(px.sub(&px).constant_value(), Some(Rational::zero()));
        assert!(px.constant_value().is_none());
    }
}
