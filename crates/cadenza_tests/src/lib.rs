//! Integration test crate for the cadenza workspace.
//!
//! The crate intentionally exports nothing: all coverage lives in
//! `tests/`, which exercises the public APIs of every member crate
//! end to end.
