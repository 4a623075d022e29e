//! # cadenza-term
//!
//! The symbolic algebra kernel: multivariate polynomial and rational
//! expressions over interned variables, with canonicalising constructors,
//! parallel substitution, relations, and boolean formulas.
//!
//! # Core Types
//!
//! - [`Expr`] — tagged-union expression tree (`Const | Var | Add | Mul | Pow`)
//! - [`Poly`] — canonical polynomial normal form backing `expand`/`equals`
//! - [`Subs`] — parallel substitution `Variable → Expr`
//! - [`Rel`] — binary relation with integer-aware normalisation
//! - [`BoolExpr`] — flattened and/or tree over relation literals
//! - [`Guard`] — ordered conjunction of relations
//!
//! # Example
//!
//! ```
//! use cadenza_base::VariableManager;
//! use cadenza_term::{Expr, Rel, Subs};
//!
//! let mut vars = VariableManager::new();
//! let x = vars.add_program_var("x");
//! let y = vars.add_program_var("y");
//!
//! // (x + 1) * (x - 1) == x^2 - 1
//! let lhs = (Expr::var(x) + Expr::int(1)) * (Expr::var(x) - Expr::int(1));
//! let rhs = Expr::pow(Expr::var(x), Expr::int(2)) - Expr::int(1);
//! assert!(lhs.equals(&rhs));
//!
//! // substitution is parallel
//! let mut sigma = Subs::new();
//! sigma.insert(x, Expr::var(y));
//! sigma.insert(y, Expr::var(x));
//! let swapped = (Expr::var(x) - Expr::var(y)).subs(&sigma);
//! assert!(swapped.equals(&(Expr::var(y) - Expr::var(x))));
//! ```

pub mod boolexpr;
pub mod expr;
pub mod guard;
pub mod poly;
pub mod rel;
pub mod subs;

pub use boolexpr::BoolExpr;
pub use expr::{Expr, Rational, VarSet};
pub use guard::Guard;
pub use poly::{Atom, Monomial, Poly};
pub use rel::{Rel, RelOp};
pub use subs::Subs;
