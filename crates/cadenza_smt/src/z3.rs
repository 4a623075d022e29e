//! Z3 backend (feature `z3`).
//!
//! Requires a native Z3 installation; local builds only. Each check builds a
//! fresh Z3 context, replays the asserted frames, and reads the model back
//! into rationals, so no Z3 lifetimes escape this module.
//!
//! All arithmetic is carried out in `Real`; integer-sorted variables are
//! declared as `Int` constants and lifted with `to_real`, which keeps their
//! integrality constraints while avoiding mixed-sort terms.

use std::collections::BTreeMap;

use cadenza_base::Variable;
use cadenza_term::Rational;
use log::debug;
use num_bigint::BigInt;
use z3::ast::{Ast, Bool, Int, Real};
use z3::{Config as Z3Config, Context, SatResult, Solver};

use crate::ir::{SmtExpr, SmtOp, SmtSort};
use crate::solver::{Model, SmtResult, SmtSolver, SolverFactory};

/// SMT solver backed by Z3.
pub struct Z3Solver {
    frames: Vec<Vec<SmtExpr>>,
    timeout_millis: u64,
    model: Option<Model>,
}

impl Z3Solver {
    /// A fresh solver with the given per-check timeout.
    pub fn new(timeout_millis: u64) -> Self {
        Self {
            frames: vec![Vec::new()],
            timeout_millis,
            model: None,
        }
    }
}

struct Lowerer<'ctx> {
    ctx: &'ctx Context,
    vars: BTreeMap<Variable, (SmtSort, Int<'ctx>, Real<'ctx>)>,
}

impl<'ctx> Lowerer<'ctx> {
    fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            vars: BTreeMap::new(),
        }
    }

    fn real_var(&mut self, v: Variable, sort: SmtSort) -> Real<'ctx> {
        if let Some((_, _, r)) = self.vars.get(&v) {
            return r.clone();
        }
        let name = format!("v{}", v.index());
        let (int_ast, real_ast) = match sort {
            SmtSort::Int => {
                let i = Int::new_const(self.ctx, name);
                let r = i.to_real();
                (i, r)
            }
            SmtSort::Real => {
                let r = Real::new_const(self.ctx, name);
                (Int::from_i64(self.ctx, 0), r)
            }
        };
        self.vars.insert(v, (sort, int_ast, real_ast.clone()));
        real_ast
    }

    fn term(&mut self, e: &SmtExpr) -> Option<Real<'ctx>> {
        match e {
            SmtExpr::Int(n) => Some(Int::from_i64(self.ctx, *n).to_real()),
            SmtExpr::Real(n, d) => {
                let num = i32::try_from(*n).ok()?;
                let den = i32::try_from(*d).ok()?;
                Some(Real::from_real(self.ctx, num, den))
            }
            SmtExpr::Var(v, sort) => Some(self.real_var(*v, *sort)),
            SmtExpr::Binary { op, left, right } => {
                let l = self.term(left)?;
                match op {
                    SmtOp::Add => {
                        let r = self.term(right)?;
                        Some(l + r)
                    }
                    SmtOp::Sub => {
                        let r = self.term(right)?;
                        Some(l - r)
                    }
                    SmtOp::Mul => {
                        let r = self.term(right)?;
                        Some(l * r)
                    }
                    SmtOp::Pow => {
                        // only constant non-negative exponents are replayed;
                        // anything else stays undecided
                        if let SmtExpr::Int(k) = right.as_ref() {
                            if *k >= 0 {
                                let mut acc = Real::from_real(self.ctx, 1, 1);
                                for _ in 0..*k {
                                    acc = acc * l.clone();
                                }
                                return Some(acc);
                            }
                        }
                        None
                    }
                    _ => None,
                }
            }
            SmtExpr::Bool(_) | SmtExpr::Not(_) => None,
        }
    }

    fn formula(&mut self, e: &SmtExpr) -> Option<Bool<'ctx>> {
        match e {
            SmtExpr::Bool(b) => Some(Bool::from_bool(self.ctx, *b)),
            SmtExpr::Not(inner) => Some(self.formula(inner)?.not()),
            SmtExpr::Binary { op, left, right } if op.is_comparison() => {
                let l = self.term(left)?;
                let r = self.term(right)?;
                Some(match op {
                    SmtOp::Eq => l._eq(&r),
                    SmtOp::Ne => l._eq(&r).not(),
                    SmtOp::Lt => l.lt(&r),
                    SmtOp::Le => l.le(&r),
                    SmtOp::Gt => l.gt(&r),
                    SmtOp::Ge => l.ge(&r),
                    _ => unreachable!("comparison op"),
                })
            }
            SmtExpr::Binary { op: SmtOp::And, left, right } => {
                let l = self.formula(left)?;
                let r = self.formula(right)?;
                Some(Bool::and(self.ctx, &[&l, &r]))
            }
            SmtExpr::Binary { op: SmtOp::Or, left, right } => {
                let l = self.formula(left)?;
                let r = self.formula(right)?;
                Some(Bool::or(self.ctx, &[&l, &r]))
            }
            _ => None,
        }
    }
}

impl SmtSolver for Z3Solver {
    fn add(&mut self, e: SmtExpr) {
        self.model = None;
        self.frames
            .last_mut()
            .expect("solver always has a base frame")
            .push(e);
    }

    fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
            self.model = None;
        }
    }

    fn check(&mut self) -> SmtResult {
        let mut cfg = Z3Config::new();
        cfg.set_param_value("timeout", &self.timeout_millis.to_string());
        let ctx = Context::new(&cfg);
        let solver = Solver::new(&ctx);
        let mut lowerer = Lowerer::new(&ctx);

        for e in self.frames.iter().flatten() {
            match lowerer.formula(e) {
                Some(f) => solver.assert(&f),
                None => {
                    debug!("z3 backend cannot replay assertion, returning unknown");
                    return SmtResult::Unknown;
                }
            }
        }

        match solver.check() {
            SatResult::Unsat => SmtResult::Unsat,
            SatResult::Unknown => SmtResult::Unknown,
            SatResult::Sat => {
                if let Some(m) = solver.get_model() {
                    let mut model = Model::new();
                    for (v, (sort, int_ast, real_ast)) in &lowerer.vars {
                        let value = match sort {
                            SmtSort::Int => m
                                .eval(int_ast, true)
                                .and_then(|a| a.as_i64())
                                .map(|n| Rational::from_integer(BigInt::from(n))),
                            SmtSort::Real => m.eval(real_ast, true).and_then(|a| {
                                a.as_real().map(|(n, d)| {
                                    Rational::new(BigInt::from(n), BigInt::from(d))
                                })
                            }),
                        };
                        if let Some(value) = value {
                            model.set(*v, value);
                        }
                    }
                    self.model = Some(model);
                }
                SmtResult::Sat
            }
        }
    }

    fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    fn set_timeout(&mut self, millis: u64) {
        self.timeout_millis = millis;
    }
}

/// Factory for [`Z3Solver`].
#[derive(Clone, Copy, Debug)]
pub struct Z3Factory {
    /// Per-check timeout handed to every produced solver.
    pub timeout_millis: u64,
}

impl SolverFactory for Z3Factory {
    type Solver = Z3Solver;

    fn solver(&self) -> Z3Solver {
        Z3Solver::new(self.timeout_millis)
    }
}
