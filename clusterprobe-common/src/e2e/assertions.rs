//! Outcome assertions: "must succeed" and "must fail".
//!
//! Both run the command synchronously, compare its exit class with the
//! expectation and hand back the captured output on a match. On a mismatch
//! the panicking forms abort the current test with the full process output;
//! the `try_` forms return the same diagnostic as a [`HarnessError`].

use std::fmt;

use tracing::{debug, error};

use super::runner::{Cmd, ExecutionResult, ProcessRunner, SystemRunner};
use crate::errors::{HarnessError, HarnessResult};

/// Expected exit class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Exit status zero.
    Pass,
    /// Non-zero exit status, a timeout, or a program that failed to start.
    Fail,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Run `cmd` and check its exit class against `expected`.
pub fn expect_outcome(
    runner: &dyn ProcessRunner,
    cmd: &Cmd,
    expected: Expectation,
) -> HarnessResult<ExecutionResult> {
    let result = runner.run(cmd);
    match (expected, result.succeeded()) {
        (Expectation::Pass, true) | (Expectation::Fail, false) => {
            debug!(command = %cmd, %expected, "outcome matched expectation");
            Ok(result)
        }
        (Expectation::Pass, false) => {
            error!(command = %cmd, exit_code = ?result.exit_code, "command was expected to succeed");
            Err(HarnessError::UnexpectedFailure {
                report: result.report(),
            })
        }
        (Expectation::Fail, true) => {
            error!(command = %cmd, "command was expected to fail");
            Err(HarnessError::UnexpectedSuccess {
                report: result.report(),
            })
        }
    }
}

impl Cmd {
    pub fn try_should_pass(&self) -> HarnessResult<ExecutionResult> {
        expect_outcome(&SystemRunner, self, Expectation::Pass)
    }

    pub fn try_should_fail(&self) -> HarnessResult<ExecutionResult> {
        expect_outcome(&SystemRunner, self, Expectation::Fail)
    }

    /// Run and require exit status zero; panics with the full output otherwise.
    #[track_caller]
    pub fn should_pass(&self) -> ExecutionResult {
        self.should_pass_with(&SystemRunner)
    }

    /// Run and require a non-zero exit; panics with the full output otherwise.
    #[track_caller]
    pub fn should_fail(&self) -> ExecutionResult {
        self.should_fail_with(&SystemRunner)
    }

    #[track_caller]
    pub fn should_pass_with(&self, runner: &dyn ProcessRunner) -> ExecutionResult {
        match expect_outcome(runner, self, Expectation::Pass) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }

    #[track_caller]
    pub fn should_fail_with(&self, runner: &dyn ProcessRunner) -> ExecutionResult {
        match expect_outcome(runner, self, Expectation::Fail) {
            Ok(result) => result,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Run `program args…`, require success and return its stdout.
#[track_caller]
pub fn cmd_should_pass<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Cmd::new(program).args(args).should_pass().stdout
}

/// Run `program args…`, require failure and return its stderr, where CLIs
/// report their errors.
#[track_caller]
pub fn cmd_should_fail<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Cmd::new(program).args(args).should_fail().stderr
}
