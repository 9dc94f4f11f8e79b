// src/lib.rs

#![cfg_attr(not(any(test, feature = "std")), no_std)] // no_std unless testing or `std`

pub mod common;
pub mod driver;
pub mod node;

#[cfg(test)]
mod mock;

// Re-export key types for convenience
pub use common::{Reading, Scd4xError};
pub use driver::Scd4x;
pub use node::{MainCycle, NodeConfig};
