//! Expression trees with canonicalising constructors.
//!
//! An [`Expr`] is a sum-of-products tree over interned variables and
//! arbitrary-precision rational constants. The constructors flatten nested
//! sums and products, fold constants, and keep operand lists sorted, so
//! structurally equal trees denote equal terms. Full semantic equality
//! (modulo distribution) goes through [`Expr::expand`], which rebuilds the
//! tree from the canonical polynomial form in [`crate::poly`].

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use cadenza_base::{Variable, VariableManager};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::poly::{Atom, Poly};
use crate::subs::Subs;

/// Arbitrary-precision rational number used for all constants.
pub type Rational = num_rational::BigRational;

/// A set of variables, ordered for deterministic iteration.
pub type VarSet = BTreeSet<Variable>;

/// Exponents up to this size are expanded when building the polynomial
/// normal form; larger powers are kept as opaque atoms.
const MAX_EXPANDED_EXPONENT: u32 = 16;

/// A symbolic arithmetic expression.
///
/// Build expressions through the canonicalising constructors ([`Expr::int`],
/// [`Expr::var`], [`Expr::add`], [`Expr::mul`], [`Expr::pow`]) or the
/// arithmetic operators; never construct variants directly, or the structural
/// invariants (flat, sorted, constant-folded operand lists) are lost.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    /// A rational constant.
    Const(Rational),
    /// A variable reference.
    Var(Variable),
    /// A sum with at least two operands, none of which is itself a sum.
    Add(Vec<Expr>),
    /// A product with at least two operands, none of which is a product.
    Mul(Vec<Expr>),
    /// A power `base ^ exponent`.
    Pow(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// The constant zero.
    pub fn zero() -> Self {
        Expr::Const(Rational::zero())
    }

    /// The constant one.
    pub fn one() -> Self {
        Expr::Const(Rational::one())
    }

    /// An integer constant.
    pub fn int(n: i64) -> Self {
        Expr::Const(Rational::from_integer(BigInt::from(n)))
    }

    /// A rational constant `numer / denom`.
    ///
    /// # Panics
    ///
    /// Panics if `denom` is zero.
    pub fn rational(numer: i64, denom: i64) -> Self {
        Expr::Const(Rational::new(BigInt::from(numer), BigInt::from(denom)))
    }

    /// A constant from a ready-made rational.
    pub fn constant(r: Rational) -> Self {
        Expr::Const(r)
    }

    /// A variable reference.
    pub fn var(v: Variable) -> Self {
        Expr::Var(v)
    }

    /// A sum. Flattens nested sums, folds constants, drops zeros.
    pub fn add(operands: Vec<Expr>) -> Self {
        let mut constant = Rational::zero();
        let mut terms: Vec<Expr> = Vec::new();
        let mut stack = operands;
        stack.reverse();
        while let Some(e) = stack.pop() {
            match e {
                Expr::Const(c) => constant += c,
                Expr::Add(inner) => {
                    for x in inner.into_iter().rev() {
                        stack.push(x);
                    }
                }
                other => terms.push(other),
            }
        }
        if !constant.is_zero() || terms.is_empty() {
            terms.push(Expr::Const(constant));
        }
        terms.sort();
        if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            Expr::Add(terms)
        }
    }

    /// A product. Flattens nested products, folds constants, short-circuits
    /// on zero and drops unit factors.
    pub fn mul(operands: Vec<Expr>) -> Self {
        let mut constant = Rational::one();
        let mut factors: Vec<Expr> = Vec::new();
        let mut stack = operands;
        stack.reverse();
        while let Some(e) = stack.pop() {
            match e {
                Expr::Const(c) => constant *= c,
                Expr::Mul(inner) => {
                    for x in inner.into_iter().rev() {
                        stack.push(x);
                    }
                }
                other => factors.push(other),
            }
        }
        if constant.is_zero() {
            return Expr::Const(constant);
        }
        if !constant.is_one() || factors.is_empty() {
            factors.push(Expr::Const(constant));
        }
        factors.sort();
        if factors.len() == 1 {
            factors.pop().unwrap()
        } else {
            Expr::Mul(factors)
        }
    }

    /// A power `base ^ exponent`.
    ///
    /// Canonicalisations over the integers: `e^0 = 1` (including `0^0 = 1`),
    /// `e^1 = e`, and constant bases with small constant integer exponents
    /// are folded.
    pub fn pow(base: Expr, exponent: Expr) -> Self {
        if let Expr::Const(e) = &exponent {
            if e.is_zero() {
                return Expr::one();
            }
            if e.is_one() {
                return base;
            }
            if let Expr::Const(b) = &base {
                if e.is_integer() {
                    if let Some(k) = to_i32(&e.to_integer()) {
                        if k.unsigned_abs() <= MAX_EXPANDED_EXPONENT && !(b.is_zero() && k < 0) {
                            return Expr::Const(b.pow(k));
                        }
                    }
                }
            }
        }
        Expr::Pow(Box::new(base), Box::new(exponent))
    }

    /// `true` iff this is the literal constant zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if c.is_zero())
    }

    /// Returns the value of a constant expression, expanding first so that
    /// e.g. `x - x` counts as the constant zero.
    pub fn as_rational(&self) -> Option<Rational> {
        match self {
            Expr::Const(c) => Some(c.clone()),
            _ => match self.to_poly().constant_value() {
                Some(c) => Some(c),
                None => None,
            },
        }
    }

    /// `true` iff the expression denotes a rational constant.
    pub fn is_rational_constant(&self) -> bool {
        self.as_rational().is_some()
    }

    /// `true` iff the expression denotes an integer constant.
    pub fn is_int(&self) -> bool {
        self.as_rational().map(|c| c.is_integer()).unwrap_or(false)
    }

    /// Collects every variable occurring anywhere in the tree, including
    /// inside exponents.
    pub fn collect_vars(&self, out: &mut VarSet) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(v) => {
                out.insert(*v);
            }
            Expr::Add(xs) | Expr::Mul(xs) => {
                for x in xs {
                    x.collect_vars(out);
                }
            }
            Expr::Pow(b, e) => {
                b.collect_vars(out);
                e.collect_vars(out);
            }
        }
    }

    /// The set of variables of this expression.
    pub fn vars(&self) -> VarSet {
        let mut out = VarSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// `true` iff `v` occurs anywhere in the tree.
    pub fn has(&self, v: Variable) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var(w) => *w == v,
            Expr::Add(xs) | Expr::Mul(xs) => xs.iter().any(|x| x.has(v)),
            Expr::Pow(b, e) => b.has(v) || e.has(v),
        }
    }

    /// Applies a substitution. All replacements happen in parallel: the
    /// images are not substituted again.
    pub fn subs(&self, sigma: &Subs) -> Expr {
        match self {
            Expr::Const(_) => self.clone(),
            Expr::Var(v) => match sigma.get(*v) {
                Some(e) => e.clone(),
                None => self.clone(),
            },
            Expr::Add(xs) => Expr::add(xs.iter().map(|x| x.subs(sigma)).collect()),
            Expr::Mul(xs) => Expr::mul(xs.iter().map(|x| x.subs(sigma)).collect()),
            Expr::Pow(b, e) => Expr::pow(b.subs(sigma), e.subs(sigma)),
        }
    }

    /// The canonical polynomial form of this expression, with irreducible
    /// subterms (symbolic or oversized powers) as opaque atoms.
    pub fn to_poly(&self) -> Poly {
        match self {
            Expr::Const(c) => Poly::constant(c.clone()),
            Expr::Var(v) => Poly::atom(Atom::Var(*v)),
            Expr::Add(xs) => {
                let mut acc = Poly::zero();
                for x in xs {
                    acc = acc.add(&x.to_poly());
                }
                acc
            }
            Expr::Mul(xs) => {
                let mut acc = Poly::constant(Rational::one());
                for x in xs {
                    acc = acc.mul(&x.to_poly());
                }
                acc
            }
            Expr::Pow(b, e) => {
                if let Expr::Const(c) = e.as_ref() {
                    if c.is_integer() {
                        if let Some(k) = to_i32(&c.to_integer()) {
                            if k >= 0 && k as u32 <= MAX_EXPANDED_EXPONENT {
                                return b.to_poly().pow(k as u32);
                            }
                        }
                    }
                }
                Poly::atom(Atom::Irreducible(Box::new(self.clone())))
            }
        }
    }

    /// Rewrites into distributed normal form: a sorted sum of coefficient
    /// times monomial products. Two expressions denote the same term iff
    /// their expansions are structurally equal.
    pub fn expand(&self) -> Expr {
        self.to_poly().to_expr()
    }

    /// Semantic equality: `self - other` expands to zero.
    pub fn equals(&self, other: &Expr) -> bool {
        self.to_poly().sub(&other.to_poly()).is_zero()
    }

    /// The degree of `v`, treating occurrences inside irreducible powers as
    /// degree zero (matching the polynomial view).
    pub fn degree(&self, v: Variable) -> u32 {
        self.to_poly().degree(v)
    }

    /// The coefficient of `v^k`: the sum of all monomials whose power of `v`
    /// is exactly `k`, with `v^k` divided out.
    pub fn coeff(&self, v: Variable, k: u32) -> Expr {
        self.to_poly().coeff(v, k).to_expr()
    }

    /// `true` iff the tree is a polynomial: every exponent is a non-negative
    /// integer constant.
    pub fn is_poly(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Var(_) => true,
            Expr::Add(xs) | Expr::Mul(xs) => xs.iter().all(|x| x.is_poly()),
            Expr::Pow(b, e) => {
                b.is_poly()
                    && matches!(e.as_ref(), Expr::Const(c) if c.is_integer() && !c.is_negative())
            }
        }
    }

    /// `true` iff the expression is linear in the given variables (all
    /// variables when `vars` is `None`): a polynomial where no monomial has
    /// combined degree above one in the considered variables, and no
    /// considered variable hides inside an irreducible subterm.
    pub fn is_linear(&self, vars: Option<&VarSet>) -> bool {
        let all;
        let considered = match vars {
            Some(vs) => vs,
            None => {
                all = self.vars();
                &all
            }
        };
        self.to_poly().is_linear(considered)
    }

    /// Least common multiple of the denominators of all polynomial
    /// coefficients. Multiplying by it clears the expression of rationals.
    pub fn denom_lcm(&self) -> BigInt {
        let mut acc = BigInt::one();
        for coeff in self.to_poly().coefficients() {
            acc = acc.lcm(coeff.denom());
        }
        acc
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        match self {
            Expr::Const(c) => format_rational(c),
            Expr::Var(v) => vars.name(*v).to_string(),
            Expr::Add(xs) => xs
                .iter()
                .map(|x| x.fmt_with(vars))
                .collect::<Vec<_>>()
                .join(" + "),
            Expr::Mul(xs) => xs
                .iter()
                .map(|x| match x {
                    Expr::Add(_) => format!("({})", x.fmt_with(vars)),
                    Expr::Const(c) if c.is_negative() => format!("({})", x.fmt_with(vars)),
                    _ => x.fmt_with(vars),
                })
                .collect::<Vec<_>>()
                .join("*"),
            Expr::Pow(b, e) => {
                let bs = match b.as_ref() {
                    Expr::Add(_) | Expr::Mul(_) | Expr::Pow(..) => {
                        format!("({})", b.fmt_with(vars))
                    }
                    _ => b.fmt_with(vars),
                };
                let es = match e.as_ref() {
                    Expr::Add(_) | Expr::Mul(_) | Expr::Pow(..) => {
                        format!("({})", e.fmt_with(vars))
                    }
                    _ => e.fmt_with(vars),
                };
                format!("{}^{}", bs, es)
            }
        }
    }
}

fn format_rational(c: &Rational) -> String {
    if c.is_integer() {
        c.to_integer().to_string()
    } else {
        format!("{}/{}", c.numer(), c.denom())
    }
}

fn to_i32(n: &BigInt) -> Option<i32> {
    use num_traits::ToPrimitive;
    n.to_i32()
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::int(n)
    }
}

impl From<Variable> for Expr {
    fn from(v: Variable) -> Self {
        Expr::var(v)
    }
}

impl Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::add(vec![self, rhs])
    }
}

impl Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::add(vec![self, -rhs])
    }
}

impl Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::mul(vec![self, rhs])
    }
}

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::mul(vec![Expr::int(-1), self])
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", format_rational(c)),
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Add(xs) => {
                let parts: Vec<String> = xs.iter().map(|x| x.to_string()).collect();
                write!(f, "{}", parts.join(" + "))
            }
            Expr::Mul(xs) => {
                let parts: Vec<String> = xs
                    .iter()
                    .map(|x| match x {
                        Expr::Add(_) => format!("({})", x),
                        _ => x.to_string(),
                    })
                    .collect();
                write!(f, "{}", parts.join("*"))
            }
            Expr::Pow(b, e) => write!(f, "({})^({})", b, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::VariableManager;

    fn setup() -> (VariableManager, Variable, Variable) {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        let y = vars.add_program_var("y");
        (vars, x, y)
    }

    #[test]
    fn addition_is_commutative_structurally() {
        let (_, x, y) = setup();
        let a = Expr::var(x) + Expr::var(y);
        let b = Expr::var(y) + Expr::var(x);
        assert_eq!(a, b);
    }

    #[test]
    fn constants_fold() {
        assert_eq!(Expr::int(2) + Expr::int(3), Expr::int(5));
        assert_eq!(Expr::int(2) * Expr::int(3), Expr::int(6));
        assert_eq!(Expr::rational(1, 2) + Expr::rational(1, 2), Expr::int(1));
    }

    #[test]
    fn zero_annihilates_products() {
        let (_, x, _) = setup();
        assert!(Expr::int(0) * Expr::var(x) == Expr::int(0));
    }

    #[test]
    fn power_canonicalisation() {
        let (_, x, _) = setup();
        assert_eq!(Expr::pow(Expr::var(x), Expr::int(0)), Expr::one());
        assert_eq!(Expr::pow(Expr::int(0), Expr::int(0)), Expr::one());
        assert_eq!(Expr::pow(Expr::var(x), Expr::int(1)), Expr::var(x));
        assert_eq!(Expr::pow(Expr::int(2), Expr::int(10)), Expr::int(1024));
    }

    #[test]
    fn expand_distributes() {
        let (_, x, y) = setup();
        // (x + y)^2 == x^2 + 2xy + y^2
        let lhs = Expr::pow(Expr::var(x) + Expr::var(y), Expr::int(2));
        let rhs = Expr::pow(Expr::var(x), Expr::int(2))
            + Expr::int(2) * Expr::var(x) * Expr::var(y)
            + Expr::pow(Expr::var(y), Expr::int(2));
        assert!(lhs.equals(&rhs));
        assert_eq!(lhs.expand(), rhs.expand());
    }

    #[test]
    fn x_minus_x_is_constant_zero() {
        let (_, x, _) = setup();
        let e = Expr::var(x) - Expr::var(x);
        assert!(e.is_rational_constant());
        assert!(e.expand().is_zero());
    }

    #[test]
    fn subs_is_parallel() {
        let (_, x, y) = setup();
        let mut sigma = Subs::new();
        sigma.insert(x, Expr::var(y));
        sigma.insert(y, Expr::int(1));
        // x + y under {x -> y, y -> 1} is y + 1, not 1 + 1
        let e = (Expr::var(x) + Expr::var(y)).subs(&sigma);
        assert!(e.equals(&(Expr::var(y) + Expr::int(1))));
    }

    #[test]
    fn subs_reaches_exponents() {
        let (mut vars, _, _) = setup();
        let n = vars.fresh_temp("n", cadenza_base::Sort::Int);
        let e = Expr::pow(Expr::int(2), Expr::var(n));
        let mut sigma = Subs::new();
        sigma.insert(n, Expr::var(n) - Expr::int(1));
        let shifted = e.subs(&sigma);
        assert!(shifted.has(n));
        assert_ne!(shifted, e);
    }

    #[test]
    fn degree_and_coeff() {
        let (_, x, y) = setup();
        // 3x^2*y + 2x + 5
        let e = Expr::int(3) * Expr::pow(Expr::var(x), Expr::int(2)) * Expr::var(y)
            + Expr::int(2) * Expr::var(x)
            + Expr::int(5);
        assert_eq!(e.degree(x), 2);
        assert_eq!(e.degree(y), 1);
        assert!(e.coeff(x, 2).equals(&(Expr::int(3) * Expr::var(y))));
        assert!(e.coeff(x, 1).equals(&Expr::int(2)));
        assert!(e.coeff(x, 0).equals(&Expr::int(5)));
    }

    #[test]
    fn degree_ignores_symbolic_exponents() {
        let (mut vars, x, _) = setup();
        let n = vars.fresh_temp("n", cadenza_base::Sort::Int);
        let e = Expr::pow(Expr::int(2), Expr::var(n)) * Expr::var(x);
        assert_eq!(e.degree(n), 0);
        assert!(e.has(n));
    }

    #[test]
    fn linearity() {
        let (_, x, y) = setup();
        let lin = Expr::int(2) * Expr::var(x) + Expr::int(3) * Expr::var(y) + Expr::int(7);
        assert!(lin.is_linear(None));
        let quad = Expr::var(x) * Expr::var(y);
        assert!(!quad.is_linear(None));
        // x*y is linear in {x} alone, y acts as a parameter
        let only_x: VarSet = [x].into_iter().collect();
        assert!(quad.is_linear(Some(&only_x)));
    }

    #[test]
    fn poly_recognition() {
        let (mut vars, x, _) = setup();
        let n = vars.fresh_temp("n", cadenza_base::Sort::Int);
        assert!(Expr::pow(Expr::var(x), Expr::int(3)).is_poly());
        assert!(!Expr::pow(Expr::var(x), Expr::var(n)).is_poly());
        assert!(!Expr::pow(Expr::var(x), Expr::int(-1)).is_poly());
    }

    #[test]
    fn denom_lcm_clears_rationals() {
        let (_, x, y) = setup();
        let e = Expr::rational(1, 2) * Expr::var(x) + Expr::rational(2, 3) * Expr::var(y);
        assert_eq!(e.denom_lcm(), BigInt::from(6));
    }

    #[test]
    fn symbolic_powers_compare_by_structure() {
        let (mut vars, x, _) = setup();
        let n = vars.fresh_temp("n", cadenza_base::Sort::Int);
        let a = Expr::pow(Expr::int(2), Expr::var(n)) * Expr::var(x);
        let b = Expr::var(x) * Expr::pow(Expr::int(2), Expr::var(n));
        assert!(a.equals(&b));
    }
}
