//! Shared harness for clusterprobe.
//!
//! Runs external commands against a live cluster, asserts on their exit class
//! and output, and polls eventually-consistent state until a predicate holds.

pub mod config;
pub mod e2e;
pub mod errors;
pub mod testing;

pub use config::{ClusterFlavor, HarnessConfig, PollConfig};
pub use errors::{HarnessError, HarnessResult};
