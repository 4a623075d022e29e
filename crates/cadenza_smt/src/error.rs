//! Encoding errors.

use std::fmt;

/// An error raised while lowering kernel terms into the solver IR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmtError {
    /// The term has a shape the encoder does not understand.
    Conversion(String),
    /// A constant does not fit the backend's machine integers.
    LargeConstant(String),
    /// The term contains true division (a negative exponent), which the
    /// engine never produces and the backends do not accept.
    NonPolynomial,
}

impl SmtError {
    /// A conversion error with context.
    pub fn conversion(message: impl Into<String>) -> Self {
        SmtError::Conversion(message.into())
    }

    /// A constant-too-large error with context.
    pub fn large_constant(message: impl Into<String>) -> Self {
        SmtError::LargeConstant(message.into())
    }
}

impl fmt::Display for SmtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtError::Conversion(msg) => write!(f, "cannot encode term: {}", msg),
            SmtError::LargeConstant(msg) => {
                write!(f, "constant too large for the solver backend: {}", msg)
            }
            SmtError::NonPolynomial => write!(f, "term contains true division"),
        }
    }
}

impl std::error::Error for SmtError {}
