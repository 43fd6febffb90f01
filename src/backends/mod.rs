//! Reference backend drivers (§10): worked examples of the [`crate::backend::Backend`]
//! contract, used throughout the test suite.

pub mod flaky;
pub mod grouping;
pub mod memory;

pub use flaky::{FlakyBackend, FlakyHostConfig};
pub use grouping::GroupingMemoryBackend;
pub use memory::{InMemoryBackend, MemoryHostConfig};
