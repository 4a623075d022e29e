//! Engine error kinds.
//!
//! Errors are tagged results, not exceptions: every phase reports why it
//! gave up, the orchestrator records the reason in the proof trace and
//! decides whether another phase can still make progress.

use std::fmt;

/// Why an acceleration phase gave up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccelError {
    /// The guard itself is unsatisfiable; the caller should drop the rule.
    Unsat,
    /// The reduced guard is empty: nothing limits the iteration count.
    Unbounded,
    /// Nonlinear subexpressions could not be linearised.
    NonLinear,
    /// The Farkas query came back unsat or unknown past all retries.
    NoMeteringFunction,
    /// The recurrence oracle could not produce a usable closed form.
    RecurrenceTooComplex,
    /// The cooperative deadline expired.
    Timeout,
    /// None of the branches applied.
    Failure,
}

impl fmt::Display for AccelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccelError::Unsat => write!(f, "guard is unsatisfiable"),
            AccelError::Unbounded => {
                write!(f, "no guard constraint limits the iteration count")
            }
            AccelError::NonLinear => write!(f, "could not linearise the problem"),
            AccelError::NoMeteringFunction => write!(f, "no metering function found"),
            AccelError::RecurrenceTooComplex => {
                write!(f, "recurrence solving failed")
            }
            AccelError::Timeout => write!(f, "deadline expired"),
            AccelError::Failure => write!(f, "no acceleration technique applied"),
        }
    }
}

impl std::error::Error for AccelError {}
