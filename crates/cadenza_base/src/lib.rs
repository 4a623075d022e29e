//! # cadenza-base
//!
//! Foundational types for the cadenza acceleration engine:
//!
//! - [`Variable`]/[`VariableManager`] — interned, name-unique symbolic
//!   variables with kinds and sorts
//! - [`Config`] — the engine's configuration knobs
//! - [`Proof`] — an explicit proof-trace sink
//! - [`Deadline`] — cooperative timeout flag
//!
//! # Design Principles
//!
//! This crate has **no knowledge of expressions, rules or solving**. It
//! provides only the shared infrastructure the higher-level crates build
//! upon, so that the term kernel, the SMT layer and the engine can depend on
//! it without depending on each other.
//!
//! # Example
//!
//! ```
//! use cadenza_base::{VariableManager, Sort};
//!
//! let mut vars = VariableManager::new();
//! let x = vars.add_program_var("x");
//! let n = vars.fresh_temp("n", Sort::Int);
//!
//! assert!(!vars.is_temp(x));
//! assert!(vars.is_temp(n));
//! assert_eq!(vars.name(x), "x");
//! ```

pub mod config;
pub mod deadline;
pub mod proof;
pub mod var;

pub use config::Config;
pub use deadline::Deadline;
pub use proof::Proof;
pub use var::{Sort, VarKind, Variable, VariableManager};
