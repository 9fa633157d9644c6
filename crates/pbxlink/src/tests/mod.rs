//! Crate-level tests that drive a manager against a fake switch.

mod support;
