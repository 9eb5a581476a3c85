//! Error types for harness operations.
//!
//! Every variant that concerns an external process carries the full captured
//! output. Failures against a live cluster are undiagnosable without it.

use std::time::Duration;

use crate::e2e::matcher::MatchFailure;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A "must fail" assertion observed a zero exit status.
    #[error("command was expected to fail but succeeded\n{report}")]
    UnexpectedSuccess { report: String },

    /// A "must succeed" assertion observed a non-zero exit status.
    #[error("command was expected to succeed but failed\n{report}")]
    UnexpectedFailure { report: String },

    /// The poll deadline expired before the predicate held.
    #[error(
        "timed out after {elapsed:?} ({attempts} attempts) waiting for: {description}\n--- last output ---\n{last_output}"
    )]
    PollTimeout {
        description: String,
        elapsed: Duration,
        attempts: u32,
        last_output: String,
    },

    /// A polled command exited non-zero under a fail-fast exit policy.
    #[error("polled command failed on attempt {attempt} while waiting for: {description}\n{report}")]
    PollCommandFailed {
        description: String,
        attempt: u32,
        report: String,
    },

    #[error(transparent)]
    OutputMismatch(#[from] MatchFailure),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    /// True for the failure classes that mean the cluster did not converge
    /// in time, as opposed to the command under test misbehaving.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PollTimeout { .. })
    }
}
