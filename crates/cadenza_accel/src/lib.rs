//! # cadenza-accel
//!
//! The loop-acceleration engine: given a single self-loop over integer
//! variables (a guarded multi-assignment), synthesise in one step a
//! closed-form rule that summarises an arbitrary positive number of
//! iterations, or prove the loop nonterminating.
//!
//! # Pipeline
//!
//! 1. [`order`] schedules the updated variables so every right-hand side
//!    only mentions already-scheduled variables.
//! 2. [`recurrence`] turns the ordered update into a closed form
//!    parameterised by a fresh iteration counter `n`, consulting a
//!    [`RecurrenceSolver`](recurrence::RecurrenceSolver) oracle per scalar
//!    recurrence.
//! 3. [`problem`] runs the acceleration calculus: SMT-certified
//!    transformation rules discharge the guard atom by atom, producing
//!    either a nontermination witness or an `n`-parametric guard.
//! 4. [`meter`] is the fallback: a linear metering function found through
//!    Farkas' lemma bounds the iteration count when the calculus fails.
//! 5. [`eliminate`] optionally replaces `n` by concrete upper bounds read
//!    off the guard.
//! 6. [`accelerate`] orchestrates the phases and reports
//!    an [`AccelerationResult`](accelerate::AccelerationResult).
//!
//! # Example
//!
//! ```
//! use cadenza_accel::accelerate::{accelerate, Status};
//! use cadenza_accel::recurrence::PolySolver;
//! use cadenza_accel::rule::{Cost, Loc, Rule, Update};
//! use cadenza_base::{Config, Deadline, VariableManager};
//! use cadenza_smt::LinearFactory;
//! use cadenza_term::{Expr, Guard, Rel};
//!
//! let mut vars = VariableManager::new();
//! let x = vars.add_program_var("x");
//! let y = vars.add_program_var("y");
//!
//! // loc(x, y) -> loc(x + 1, y)  [x < y]
//! let mut update = Update::new();
//! update.insert(x, Expr::var(x) + Expr::int(1));
//! let guard: Guard = vec![Rel::lt(Expr::var(x), Expr::var(y))].into();
//! let rule = Rule::new_linear(Loc(0), guard, Cost::unit(), Loc(0), update);
//!
//! let config = Config { replace_temp_var_by_upperbounds: false, ..Config::default() };
//! let result = accelerate(
//!     &mut vars,
//!     &config,
//!     &LinearFactory,
//!     &PolySolver,
//!     &rule,
//!     Loc(1),
//!     Deadline::none(),
//! );
//! assert_eq!(result.status, Status::Success);
//! ```

pub mod accelerate;
pub mod eliminate;
pub mod error;
pub mod meter;
pub mod order;
pub mod problem;
pub mod recurrence;
pub mod rule;
pub mod toolbox;

pub use accelerate::{accelerate, AccelerationResult, Status};
pub use error::AccelError;
pub use rule::{Cost, Loc, Rule, Update};
