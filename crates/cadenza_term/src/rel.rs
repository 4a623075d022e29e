//! Binary relations over expressions.
//!
//! Relations carry their operator explicitly and normalise lazily: the
//! calculus orients atoms with [`Rel::normalize_ineq`], the metering
//! synthesiser rewrites to `≤` form with [`Rel::to_leq`]. All strict/
//! non-strict conversions assume integer arithmetic (`l < r` becomes
//! `l ≤ r − 1` after clearing rational coefficients).

use std::fmt;

use cadenza_base::{Variable, VariableManager};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

use crate::expr::{Expr, Rational, VarSet};
use crate::subs::Subs;

/// A relational operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelOp {
    /// `<`
    Lt,
    /// `≤`
    Le,
    /// `>`
    Gt,
    /// `≥`
    Ge,
    /// `=`
    Eq,
    /// `≠`
    Ne,
}

impl RelOp {
    /// The complementary operator (`¬(l op r)` ⇔ `l op' r`).
    pub fn complement(self) -> RelOp {
        match self {
            RelOp::Lt => RelOp::Ge,
            RelOp::Le => RelOp::Gt,
            RelOp::Gt => RelOp::Le,
            RelOp::Ge => RelOp::Lt,
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
        }
    }
}

/// A relation `lhs op rhs`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rel {
    lhs: Expr,
    op: RelOp,
    rhs: Expr,
}

impl Rel {
    /// Builds a relation from parts.
    pub fn new(lhs: Expr, op: RelOp, rhs: Expr) -> Self {
        Rel { lhs, op, rhs }
    }

    /// `lhs < rhs`
    pub fn lt(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Lt, rhs)
    }

    /// `lhs ≤ rhs`
    pub fn le(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Le, rhs)
    }

    /// `lhs > rhs`
    pub fn gt(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Gt, rhs)
    }

    /// `lhs ≥ rhs`
    pub fn ge(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Ge, rhs)
    }

    /// `lhs = rhs`
    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Eq, rhs)
    }

    /// `lhs ≠ rhs`
    pub fn ne(lhs: Expr, rhs: Expr) -> Self {
        Rel::new(lhs, RelOp::Ne, rhs)
    }

    /// Left-hand side.
    pub fn lhs(&self) -> &Expr {
        &self.lhs
    }

    /// Right-hand side.
    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }

    /// The operator.
    pub fn op(&self) -> RelOp {
        self.op
    }

    /// `true` for `<, ≤, >, ≥`.
    pub fn is_ineq(&self) -> bool {
        self.op != RelOp::Eq && self.op != RelOp::Ne
    }

    /// `true` for `=`.
    pub fn is_eq(&self) -> bool {
        self.op == RelOp::Eq
    }

    /// `true` for `≠`.
    pub fn is_ne(&self) -> bool {
        self.op == RelOp::Ne
    }

    /// `true` for `<` and `>`.
    ///
    /// # Panics
    ///
    /// Panics (debug) on equalities; strictness only makes sense for
    /// inequalities.
    pub fn is_strict(&self) -> bool {
        debug_assert!(self.is_ineq());
        self.op == RelOp::Lt || self.op == RelOp::Gt
    }

    /// `true` iff both sides are polynomial.
    pub fn is_poly(&self) -> bool {
        self.lhs.is_poly() && self.rhs.is_poly()
    }

    /// `true` iff both sides are linear in the given variables.
    pub fn is_linear(&self, vars: Option<&VarSet>) -> bool {
        self.lhs.is_linear(vars) && self.rhs.is_linear(vars)
    }

    /// Expands both sides.
    pub fn expand(&self) -> Rel {
        Rel::new(self.lhs.expand(), self.op, self.rhs.expand())
    }

    /// Applies a substitution to both sides.
    pub fn subs(&self, sigma: &Subs) -> Rel {
        Rel::new(self.lhs.subs(sigma), self.op, self.rhs.subs(sigma))
    }

    /// Collects the variables of both sides.
    pub fn collect_vars(&self, out: &mut VarSet) {
        self.lhs.collect_vars(out);
        self.rhs.collect_vars(out);
    }

    /// The variables of both sides.
    pub fn vars(&self) -> VarSet {
        let mut out = VarSet::new();
        self.collect_vars(&mut out);
        out
    }

    /// `true` iff `v` occurs on either side.
    pub fn has(&self, v: Variable) -> bool {
        self.lhs.has(v) || self.rhs.has(v)
    }

    /// Moves the right-hand side over: `l − r op 0`.
    pub fn make_rhs_zero(&self) -> Rel {
        Rel::new(self.lhs.clone() - self.rhs.clone(), self.op, Expr::zero())
    }

    /// Rewrites an inequality to `≤` form over the integers.
    ///
    /// Strict inequalities are first multiplied through by the least common
    /// multiple of both sides' denominators, then `<` becomes `≤ rhs − 1`.
    ///
    /// # Panics
    ///
    /// Panics (debug) when called on an equality.
    pub fn to_leq(&self) -> Rel {
        debug_assert!(self.is_ineq());
        let mut res = if self.is_strict() {
            self.cleared()
        } else {
            self.clone()
        };
        // flip > and >=
        res = match res.op {
            RelOp::Gt => Rel::lt(res.rhs, res.lhs),
            RelOp::Ge => Rel::le(res.rhs, res.lhs),
            _ => res,
        };
        if res.op == RelOp::Lt {
            res = Rel::le(res.lhs, res.rhs - Expr::one());
        }
        debug_assert_eq!(res.op, RelOp::Le);
        res
    }

    /// Rewrites an inequality to strict `>` form over the integers
    /// (`l ≥ r` becomes `l + 1 > r` after clearing rationals).
    ///
    /// # Panics
    ///
    /// Panics (debug) when called on an equality.
    pub fn to_gt(&self) -> Rel {
        debug_assert!(self.is_ineq());
        let mut res = if !self.is_strict() {
            self.cleared()
        } else {
            self.clone()
        };
        res = match res.op {
            RelOp::Lt => Rel::gt(res.rhs, res.lhs),
            RelOp::Le => Rel::ge(res.rhs, res.lhs),
            _ => res,
        };
        if res.op == RelOp::Ge {
            res = Rel::gt(res.lhs + Expr::one(), res.rhs);
        }
        debug_assert_eq!(res.op, RelOp::Gt);
        res
    }

    /// Orients towards `<`/`≤` without changing strictness.
    pub fn to_l(&self) -> Rel {
        debug_assert!(self.is_ineq());
        match self.op {
            RelOp::Gt => Rel::lt(self.rhs.clone(), self.lhs.clone()),
            RelOp::Ge => Rel::le(self.rhs.clone(), self.lhs.clone()),
            _ => self.clone(),
        }
    }

    /// Orients towards `>`/`≥` without changing strictness.
    pub fn to_g(&self) -> Rel {
        debug_assert!(self.is_ineq());
        match self.op {
            RelOp::Lt => Rel::gt(self.rhs.clone(), self.lhs.clone()),
            RelOp::Le => Rel::ge(self.rhs.clone(), self.lhs.clone()),
            _ => self.clone(),
        }
    }

    /// Canonical atom form used by the acceleration calculus: strictly
    /// oriented to `t > 0` over the integers, so `t ≤ 0` is exactly the
    /// negation.
    pub fn normalize_ineq(&self) -> Rel {
        self.to_gt().make_rhs_zero()
    }

    /// The negated relation.
    pub fn negation(&self) -> Rel {
        Rel::new(self.lhs.clone(), self.op.complement(), self.rhs.clone())
    }

    /// Moves all addends containing non-parameter variables to the left and
    /// everything else to the right; used to bring metering constraints into
    /// `A·x ≤ b` shape.
    pub fn split_variables_and_constants(&self, params: &VarSet) -> Rel {
        let diff = (self.lhs.clone() - self.rhs.clone()).expand();
        let poly = diff.to_poly();
        // constant part: monomials whose variables are all parameters
        let mut constant = crate::poly::Poly::zero();
        let mut variable = crate::poly::Poly::zero();
        let reconstructed = poly.to_expr();
        match reconstructed {
            Expr::Add(addends) => {
                for a in addends {
                    if a.vars().iter().all(|v| params.contains(v)) {
                        constant = constant.add(&a.to_poly());
                    } else {
                        variable = variable.add(&a.to_poly());
                    }
                }
            }
            single => {
                if single.vars().iter().all(|v| params.contains(v)) {
                    constant = single.to_poly();
                } else {
                    variable = single.to_poly();
                }
            }
        }
        Rel::new(variable.to_expr(), self.op, constant.neg().to_expr())
    }

    fn check_trivial(&self) -> Option<bool> {
        let diff = (self.lhs.clone() - self.rhs.clone()).expand();
        let c = diff.as_rational()?;
        Some(match self.op {
            RelOp::Eq => c.is_zero(),
            RelOp::Ne => !c.is_zero(),
            RelOp::Lt => c.is_negative(),
            RelOp::Le => !c.is_positive(),
            RelOp::Gt => c.is_positive(),
            RelOp::Ge => !c.is_negative(),
        })
    }

    /// `true` iff the relation holds for every assignment because both sides
    /// differ by a constant that satisfies the operator.
    pub fn is_trivially_true(&self) -> bool {
        self.check_trivial() == Some(true)
    }

    /// `true` iff the relation fails for every assignment.
    pub fn is_trivially_false(&self) -> bool {
        self.check_trivial() == Some(false)
    }

    /// Multiplies both sides by the joint denominator lcm, producing an
    /// equivalent relation with integer coefficients.
    fn cleared(&self) -> Rel {
        let lcm: BigInt = self.lhs.denom_lcm().lcm(&self.rhs.denom_lcm());
        if lcm.is_one() {
            return self.clone();
        }
        let factor = Expr::constant(Rational::from_integer(lcm));
        Rel::new(
            self.lhs.clone() * factor.clone(),
            self.op,
            self.rhs.clone() * factor,
        )
    }

    /// Renders with variable names resolved through the manager.
    pub fn fmt_with(&self, vars: &VariableManager) -> String {
        format!(
            "{} {} {}",
            self.lhs.fmt_with(vars),
            self.op.symbol(),
            self.rhs.fmt_with(vars)
        )
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op.symbol(), self.rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_base::VariableManager;

    fn x_var() -> (VariableManager, Variable) {
        let mut vars = VariableManager::new();
        let x = vars.add_program_var("x");
        (vars, x)
    }

    #[test]
    fn to_leq_shifts_strict() {
        let (_, x) = x_var();
        // x < 5 over the integers is x <= 4
        let r = Rel::lt(Expr::var(x), Expr::int(5)).to_leq();
        assert_eq!(r.op(), RelOp::Le);
        assert!(r.lhs().equals(&Expr::var(x)));
        assert!(r.rhs().equals(&Expr::int(4)));
    }

    #[test]
    fn to_leq_flips_and_clears() {
        let (_, x) = x_var();
        // x/2 > 1 becomes 2 < x, then 2 <= x - 1
        let r = Rel::gt(
            Expr::rational(1, 2) * Expr::var(x),
            Expr::int(1),
        )
        .to_leq();
        assert_eq!(r.op(), RelOp::Le);
        assert!((r.lhs().clone() - r.rhs().clone())
            .equals(&(Expr::int(3) - Expr::var(x))));
    }

    #[test]
    fn to_gt_tightens_nonstrict() {
        let (_, x) = x_var();
        // x >= 0 over the integers is x + 1 > 0
        let r = Rel::ge(Expr::var(x), Expr::int(0)).to_gt();
        assert_eq!(r.op(), RelOp::Gt);
        assert!(r.lhs().equals(&(Expr::var(x) + Expr::int(1))));
    }

    #[test]
    fn normalize_orients_and_zeroes() {
        let (mut vars, x) = x_var();
        let y = vars.add_program_var("y");
        // x < y normalises to y - x > 0
        let r = Rel::lt(Expr::var(x), Expr::var(y)).normalize_ineq();
        assert_eq!(r.op(), RelOp::Gt);
        assert!(r.rhs().is_zero());
        assert!(r.lhs().equals(&(Expr::var(y) - Expr::var(x))));
    }

    #[test]
    fn orientation_preserves_strictness() {
        let (_, x) = x_var();
        let r = Rel::gt(Expr::var(x), Expr::int(0));
        assert_eq!(r.to_l().op(), RelOp::Lt);
        assert_eq!(r.to_g().op(), RelOp::Gt);
        let r = Rel::le(Expr::var(x), Expr::int(0));
        assert_eq!(r.to_g().op(), RelOp::Ge);
        assert_eq!(r.to_l().op(), RelOp::Le);
    }

    #[test]
    fn negation_complements() {
        let (_, x) = x_var();
        let r = Rel::le(Expr::var(x), Expr::int(0));
        assert_eq!(r.negation().op(), RelOp::Gt);
        assert_eq!(r.negation().negation(), r);
    }

    #[test]
    fn triviality() {
        assert!(Rel::lt(Expr::int(1), Expr::int(2)).is_trivially_true());
        assert!(Rel::gt(Expr::int(1), Expr::int(2)).is_trivially_false());
        let (_, x) = x_var();
        assert!(Rel::le(Expr::var(x), Expr::var(x)).is_trivially_true());
        assert!(!Rel::le(Expr::var(x), Expr::int(0)).is_trivially_true());
        assert!(!Rel::le(Expr::var(x), Expr::int(0)).is_trivially_false());
    }

    #[test]
    fn split_moves_constants_right() {
        let (mut vars, x) = x_var();
        let y = vars.add_program_var("y");
        // x + y - 3 <= 2  ==>  x + y <= 5
        let r = Rel::le(
            Expr::var(x) + Expr::var(y) - Expr::int(3),
            Expr::int(2),
        )
        .split_variables_and_constants(&VarSet::new());
        assert!(r.lhs().equals(&(Expr::var(x) + Expr::var(y))));
        assert!(r.rhs().equals(&Expr::int(5)));
    }
}
