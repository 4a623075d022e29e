//! # cadenza-smt
//!
//! The SMT layer of the acceleration engine. The engine never talks to a
//! solver directly; it encodes term-kernel formulas into the solver-neutral
//! [`SmtExpr`] IR and discharges them through the [`SmtSolver`] trait.
//!
//! ## Backends
//!
//! - [`LinearSolver`] — the built-in decision procedure for linear
//!   arithmetic: DNF expansion and Fourier–Motzkin elimination over the
//!   rationals with integer-aware tightening, including model extraction.
//!   Always available; nonlinear obligations come back [`SmtResult::Unknown`].
//! - `Z3Solver` — complete nonlinear backend behind the `z3` feature
//!   (requires a native Z3 installation, local builds only).
//!
//! `Unknown` is never evidence: callers treat it exactly like a failed
//! side condition.
//!
//! ## Example
//!
//! ```
//! use cadenza_base::{Config, VariableManager};
//! use cadenza_smt::{Encoder, LinearFactory, SmtResult, SmtSolver, SolverFactory};
//! use cadenza_term::{BoolExpr, Expr, Rel};
//!
//! let mut vars = VariableManager::new();
//! let x = vars.add_program_var("x");
//! let config = Config::default();
//!
//! let encoder = Encoder::new(&vars, &config);
//! // x > 0 && x < 0 is unsatisfiable
//! let contradiction = BoolExpr::lit(Rel::gt(Expr::var(x), Expr::int(0)))
//!     & BoolExpr::lit(Rel::lt(Expr::var(x), Expr::int(0)));
//!
//! let mut solver = LinearFactory.solver();
//! solver.add(encoder.encode_bool(&contradiction).unwrap());
//! assert_eq!(solver.check(), SmtResult::Unsat);
//! ```

pub mod encode;
pub mod error;
pub mod ir;
pub mod linear;
pub mod solver;
#[cfg(feature = "z3")]
pub mod z3;

pub use encode::Encoder;
pub use error::SmtError;
pub use ir::{SmtExpr, SmtOp, SmtSort};
pub use linear::{LinearFactory, LinearSolver};
pub use solver::{Model, SmtResult, SmtSolver, SolverFactory};
#[cfg(feature = "z3")]
pub use z3::{Z3Factory, Z3Solver};
