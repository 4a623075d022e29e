//! Cooperative deadlines.
//!
//! The engine performs no preemption: long-running phases poll an explicit
//! [`Deadline`] between work items (atoms, instantiations) and wind down with
//! a partial result when it has passed. In-flight SMT queries are bounded by
//! the solver's own timeout parameter instead.

use std::time::{Duration, Instant};

/// A point in time after which cooperative work should stop.
///
/// `Deadline::none()` never expires.
///
/// # Example
///
/// ```
/// use cadenza_base::Deadline;
/// use std::time::Duration;
///
/// let unlimited = Deadline::none();
/// assert!(!unlimited.expired());
///
/// let tight = Deadline::after(Duration::from_secs(3600));
/// assert!(!tight.expired());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    end: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { end: None }
    }

    /// A deadline `d` from now.
    pub fn after(d: Duration) -> Self {
        Self {
            end: Some(Instant::now() + d),
        }
    }

    /// `true` iff the deadline has passed.
    pub fn expired(&self) -> bool {
        match self.end {
            Some(end) => Instant::now() >= end,
            None => false,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_expires_immediately() {
        let deadline = Deadline::after(Duration::from_secs(0));
        assert!(deadline.expired());
    }

    #[test]
    fn none_never_expires() {
        assert!(!Deadline::none().expired());
    }
}
