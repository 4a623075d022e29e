//! Lowering from the term kernel to the solver IR.
//!
//! Variable sorts are taken from the [`VariableManager`]. Integer powers with
//! small constant exponents are unfolded to repeated multiplication, which
//! every backend handles far better than `pow`; the threshold is the
//! `max_exponent_without_pow` knob. Larger constant exponents and symbolic
//! exponents are emitted as [`SmtOp::Pow`]. Negative exponents denote true
//! division and are rejected.

use cadenza_base::{Config, Sort, VariableManager};
use num_traits::{Signed, ToPrimitive};

use cadenza_term::{BoolExpr, Expr, Guard, Rel, RelOp};

use crate::error::SmtError;
use crate::ir::{SmtExpr, SmtOp, SmtSort};

/// Encoder from kernel terms to [`SmtExpr`].
pub struct Encoder<'a> {
    vars: &'a VariableManager,
    max_exponent_without_pow: u32,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder resolving sorts through `vars`, with the unfolding
    /// threshold from `config`.
    pub fn new(vars: &'a VariableManager, config: &Config) -> Self {
        Self {
            vars,
            max_exponent_without_pow: config.max_exponent_without_pow,
        }
    }

    /// Encodes an arithmetic expression.
    pub fn encode_expr(&self, e: &Expr) -> Result<SmtExpr, SmtError> {
        match e {
            Expr::Const(c) => {
                let numer = c.numer().to_i64().ok_or_else(|| {
                    SmtError::large_constant(format!("numerator {}", c.numer()))
                })?;
                let denom = c.denom().to_i64().ok_or_else(|| {
                    SmtError::large_constant(format!("denominator {}", c.denom()))
                })?;
                if denom == 1 {
                    Ok(SmtExpr::Int(numer))
                } else {
                    Ok(SmtExpr::Real(numer, denom))
                }
            }
            Expr::Var(v) => {
                let sort = match self.vars.sort(*v) {
                    Sort::Int => SmtSort::Int,
                    Sort::Real => SmtSort::Real,
                };
                Ok(SmtExpr::Var(*v, sort))
            }
            Expr::Add(xs) => {
                let operands = xs
                    .iter()
                    .map(|x| self.encode_expr(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SmtExpr::fold(SmtOp::Add, operands))
            }
            Expr::Mul(xs) => {
                let operands = xs
                    .iter()
                    .map(|x| self.encode_expr(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SmtExpr::fold(SmtOp::Mul, operands))
            }
            Expr::Pow(base, exponent) => self.encode_pow(base, exponent),
        }
    }

    fn encode_pow(&self, base: &Expr, exponent: &Expr) -> Result<SmtExpr, SmtError> {
        if let Expr::Const(c) = exponent {
            if c.is_integer() {
                if c.is_negative() {
                    return Err(SmtError::NonPolynomial);
                }
                let k = c
                    .to_integer()
                    .to_u32()
                    .ok_or_else(|| SmtError::large_constant(format!("exponent {}", c)))?;
                if k == 0 {
                    return Ok(SmtExpr::Int(1));
                }
                if k <= self.max_exponent_without_pow {
                    let b = self.encode_expr(base)?;
                    return Ok(SmtExpr::fold(SmtOp::Mul, vec![b; k as usize]));
                }
            } else {
                return Err(SmtError::conversion(format!(
                    "non-integer exponent {}",
                    c
                )));
            }
        }
        // pow fallback, only poorly supported by most backends
        Ok(SmtExpr::binary(
            SmtOp::Pow,
            self.encode_expr(base)?,
            self.encode_expr(exponent)?,
        ))
    }

    /// Encodes a relation.
    pub fn encode_rel(&self, rel: &Rel) -> Result<SmtExpr, SmtError> {
        let op = match rel.op() {
            RelOp::Lt => SmtOp::Lt,
            RelOp::Le => SmtOp::Le,
            RelOp::Gt => SmtOp::Gt,
            RelOp::Ge => SmtOp::Ge,
            RelOp::Eq => SmtOp::Eq,
            RelOp::Ne => SmtOp::Ne,
        };
        Ok(SmtExpr::binary(
            op,
            self.encode_expr(rel.lhs())?,
            self.encode_expr(rel.rhs())?,
        ))
    }

    /// Encodes a boolean formula.
    pub fn encode_bool(&self, e: &BoolExpr) -> Result<SmtExpr, SmtError> {
        match e {
            BoolExpr::Const(b) => Ok(SmtExpr::Bool(*b)),
            BoolExpr::Lit(rel) => self.encode_rel(rel),
            BoolExpr::And(xs) => {
                let operands = xs
                    .iter()
                    .map(|x| self.encode_bool(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SmtExpr::fold(SmtOp::And, operands))
            }
            BoolExpr::Or(xs) => {
                let operands = xs
                    .iter()
                    .map(|x| self.encode_bool(x))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SmtExpr::fold(SmtOp::Or, operands))
            }
        }
    }

    /// Encodes a guard as a conjunction.
    pub fn encode_guard(&self, guard: &Guard) -> Result<SmtExpr, SmtError> {
        if guard.is_empty() {
            return Ok(SmtExpr::Bool(true));
        }
        let operands = guard
            .iter()
            .map(|r| self.encode_rel(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SmtExpr::fold(SmtOp::And, operands))
    }
}
