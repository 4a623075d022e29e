//! Configuration knobs for the acceleration engine.

use serde::{Deserialize, Serialize};

/// Tunable parameters of a single acceleration run.
///
/// All knobs have conservative defaults; a run with `Config::default()`
/// performs full acceleration with upper-bound instantiation enabled.
///
/// # Example
///
/// ```
/// use cadenza_base::Config;
///
/// let config = Config {
///     replace_temp_var_by_upperbounds: false,
///     ..Config::default()
/// };
/// assert_eq!(config.max_exponent_without_pow, 5);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Replace the iteration counter by upper bounds drawn from the guard
    /// after acceleration.
    pub replace_temp_var_by_upperbounds: bool,

    /// Upper limit on the number of instantiations produced by upper-bound
    /// propagation before giving up and keeping the counter symbolic.
    pub max_upperbounds_for_propagation: usize,

    /// Largest integer exponent that is unfolded to repeated multiplication
    /// when encoding for the SMT backend; larger exponents are emitted as a
    /// `pow` term.
    pub max_exponent_without_pow: u32,

    /// Solve the Farkas coefficient system over the rationals. A rational
    /// metering function is scaled back to an integer one through an
    /// auxiliary guard equation.
    pub allow_real_coefficients: bool,

    /// Retry the metering search once after strengthening the guard with
    /// constraints implied by guard and update.
    pub try_additional_guard: bool,

    /// Per-variable cap on the bounds collected for free-variable
    /// instantiation in the metering search.
    pub freevar_instantiate_max_bounds: usize,

    /// Only search for nontermination witnesses; skip the
    /// equivalence-preserving acceleration phase and the metering fallback.
    pub nonterm_mode: bool,

    /// Per-query timeout forwarded to the SMT solver.
    pub smt_timeout_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replace_temp_var_by_upperbounds: true,
            max_upperbounds_for_propagation: 3,
            max_exponent_without_pow: 5,
            allow_real_coefficients: true,
            try_additional_guard: true,
            freevar_instantiate_max_bounds: 3,
            nonterm_mode: false,
            smt_timeout_millis: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_full_acceleration() {
        let config = Config::default();
        assert!(config.replace_temp_var_by_upperbounds);
        assert!(!config.nonterm_mode);
        assert!(config.max_upperbounds_for_propagation > 0);
    }
}
