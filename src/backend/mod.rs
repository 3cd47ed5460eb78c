//! Backend implementations shipped with pvbench.
//!
//! Real Channel Access / PV Access libraries are external; they plug in by
//! implementing the traits in [`crate::subscription::traits`]. This module only
//! provides an in-process simulated source for both backend kinds.

pub mod sim;

#[cfg(test)]
pub(crate) mod testing;

pub use sim::{SimConfig, SimulatedBackend};
