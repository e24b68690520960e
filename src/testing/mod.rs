//! Testing utilities and fixtures
//!
//! Shared by the unit tests, the integration tests under `tests/`, and the
//! benchmarks, so it is compiled into the library rather than gated on
//! `cfg(test)`.

pub mod fixtures;

pub use fixtures::{fast_config, write_inputs, InputSet};
