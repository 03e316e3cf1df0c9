//! Testing utilities for hub users and for this crate's own tests.
//!
//! - [`MockHandler`]: a scriptable stage handler that records its calls
//! - [`SlowStore`]: a memory store with delayed writes
//! - fixtures for common pipeline shapes

mod fixtures;
mod mocks;

pub use fixtures::{definition, fan_out, stage};
pub use mocks::{MockHandler, SlowStore};
