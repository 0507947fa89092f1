//! Shared helpers for unit tests.

pub mod util;
