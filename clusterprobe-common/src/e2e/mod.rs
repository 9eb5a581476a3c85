//! Polling-and-assertion harness for end-to-end tests against a live cluster.

pub mod assertions;
pub mod logging;
pub mod matcher;
pub mod poller;
pub mod runner;
pub mod scenario;

pub use assertions::{Expectation, cmd_should_fail, cmd_should_pass, expect_outcome};
pub use logging::{LogEntry, LogLevel, LogSource, LoggerConfig, TestLogger, TestLogSummary};
pub use matcher::{
    MatchFailure, assert_all_in_output, assert_contains, match_all_in_output, missing_substrings,
};
pub use poller::{ExitPolicy, OutputStream, PollSession, wait_for_cmd_out};
pub use runner::{Cmd, ExecutionResult, ProcessRunner, SystemRunner, TIMEOUT_EXIT_CODE};
pub use scenario::{
    OdoProvisioner, Provisioner, ScenarioContext, ScenarioEnv, ScenarioOutcome, ScenarioSpec,
    rand_string, run_scenario,
};
