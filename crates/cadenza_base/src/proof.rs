//! Plain-text proof traces.
//!
//! The engine never writes to a global stream. Every transformation appends
//! human-readable lines to a [`Proof`] value that travels with the result, so
//! callers decide whether to print, store or discard the trace.

use std::fmt;

/// An append-only textual proof trace.
///
/// # Example
///
/// ```
/// use cadenza_base::Proof;
///
/// let mut proof = Proof::new();
/// proof.headline("Accelerate simple loop");
/// proof.section("Simplify");
/// proof.line("handled x < y via monotonic decrease");
/// assert!(proof.to_string().contains("monotonic decrease"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Proof {
    lines: Vec<String>,
}

impl Proof {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Appends a top-level headline.
    pub fn headline(&mut self, text: impl AsRef<str>) {
        self.lines.push(format!("### {} ###", text.as_ref()));
    }

    /// Appends a section marker.
    pub fn section(&mut self, text: impl AsRef<str>) {
        self.lines.push(format!("== {} ==", text.as_ref()));
    }

    /// Appends a plain line.
    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(text.into());
    }

    /// Appends all lines of another trace.
    pub fn concat(&mut self, other: Proof) {
        self.lines.extend(other.lines);
    }

    /// `true` iff nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The recorded lines, in order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
