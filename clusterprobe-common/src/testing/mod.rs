//! Test utilities shared by the workspace's test suites.

pub mod log;

pub use log::{init_global_test_logging, init_test_logging};
