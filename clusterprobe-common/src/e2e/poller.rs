//! Condition poller.
//!
//! Re-runs a command until a predicate over its trimmed output holds or the
//! deadline passes. Used for eventually-consistent cluster state: operators
//! showing up in a catalog, a pod reaching `Running`.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::runner::{Cmd, ExecutionResult, ProcessRunner, SystemRunner};
use crate::config::PollConfig;
use crate::errors::{HarnessError, HarnessResult};

static SYSTEM_RUNNER: SystemRunner = SystemRunner;

/// What to do when a polled command exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Abort the poll with [`HarnessError::PollCommandFailed`].
    FailFast,
    /// Treat the attempt like any other and keep polling.
    Tolerate,
}

/// Which captured text the predicate sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputStream {
    #[default]
    Stdout,
    /// Stdout followed by stderr.
    Combined,
}

impl OutputStream {
    fn select(self, result: &ExecutionResult) -> String {
        match self {
            Self::Stdout => result.stdout.clone(),
            Self::Combined => result.combined(),
        }
    }
}

/// One poll of one command. Build it, then call [`PollSession::until`].
///
/// ```ignore
/// let result = PollSession::new(Cmd::new("oc").args(["get", "pods", pod, "-o", "template={{.status.phase}}"]))
///     .config(config.pod_poll())
///     .policy(ExitPolicy::FailFast)
///     .until(|out| out.contains("Running"))?;
/// ```
pub struct PollSession<'a> {
    cmd: Cmd,
    config: PollConfig,
    policy: ExitPolicy,
    stream: OutputStream,
    description: Option<String>,
    runner: &'a dyn ProcessRunner,
}

impl<'a> PollSession<'a> {
    /// A session with default poll settings that fails fast on command errors.
    pub fn new(cmd: Cmd) -> Self {
        Self {
            cmd,
            config: PollConfig::default(),
            policy: ExitPolicy::FailFast,
            stream: OutputStream::Stdout,
            description: None,
            runner: &SYSTEM_RUNNER,
        }
    }

    pub fn config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn policy(mut self, policy: ExitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn stream(mut self, stream: OutputStream) -> Self {
        self.stream = stream;
        self
    }

    /// Text used in logs and timeout errors. Defaults to the command line.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn runner(mut self, runner: &'a dyn ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Poll until `predicate` returns true for the trimmed output.
    ///
    /// Returns the result of the attempt that satisfied the predicate. The
    /// first attempt runs immediately and a satisfied predicate returns
    /// without sleeping. Every later attempt follows a full `interval`
    /// sleep, so attempt k starts no earlier than (k-1) intervals in. The
    /// deadline is checked after each unsatisfied attempt.
    pub fn until<F>(self, mut predicate: F) -> HarnessResult<ExecutionResult>
    where
        F: FnMut(&str) -> bool,
    {
        self.config.validate()?;
        let description = self
            .description
            .clone()
            .unwrap_or_else(|| self.cmd.command_line());
        let PollConfig { timeout, interval } = self.config;
        debug!(
            %description,
            timeout = %humantime::format_duration(timeout),
            interval = %humantime::format_duration(interval),
            policy = ?self.policy,
            "polling"
        );

        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = self.runner.run(&self.cmd);

            if !result.succeeded() {
                match self.policy {
                    ExitPolicy::FailFast => {
                        warn!(%description, attempt, "polled command failed");
                        return Err(HarnessError::PollCommandFailed {
                            description,
                            attempt,
                            report: result.report(),
                        });
                    }
                    ExitPolicy::Tolerate => {
                        debug!(%description, attempt, exit_code = ?result.exit_code, "tolerating failed attempt");
                    }
                }
            }

            let output = self.stream.select(&result);
            let output = output.trim();
            if predicate(output) {
                info!(
                    %description,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "condition satisfied"
                );
                return Ok(result);
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(%description, attempt, ?elapsed, "poll timed out");
                return Err(HarnessError::PollTimeout {
                    description,
                    elapsed,
                    attempts: attempt,
                    last_output: output.to_string(),
                });
            }

            thread::sleep(interval);
        }
    }
}

/// Poll `program args…` and abort the test if the predicate never holds.
#[track_caller]
pub fn wait_for_cmd_out<I, S, F>(
    program: &str,
    args: I,
    config: PollConfig,
    policy: ExitPolicy,
    predicate: F,
) -> ExecutionResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
    F: FnMut(&str) -> bool,
{
    let session = PollSession::new(Cmd::new(program).args(args))
        .config(config)
        .policy(policy);
    match session.until(predicate) {
        Ok(result) => result,
        Err(err) => panic!("{err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned results; the last one repeats once the script runs out.
    struct ScriptedRunner {
        script: Mutex<VecDeque<(Option<i32>, &'static str, &'static str)>>,
        calls: Mutex<u32>,
    }

    impl ScriptedRunner {
        fn new(script: Vec<(Option<i32>, &'static str, &'static str)>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ProcessRunner for ScriptedRunner {
        fn run(&self, cmd: &Cmd) -> ExecutionResult {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let (exit_code, stdout, stderr) = if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                *script.front().unwrap()
            };
            ExecutionResult {
                command_line: cmd.command_line(),
                exit_code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                duration: Duration::ZERO,
                timed_out: false,
                spawn_error: None,
            }
        }
    }

    fn pod_phase() -> Cmd {
        Cmd::new("oc").args(["get", "pods", "example-abc", "-o", "template=\"{{.status.phase}}\""])
    }

    #[test]
    fn satisfied_on_first_attempt_does_not_sleep() {
        let runner = ScriptedRunner::new(vec![(Some(0), "\"Running\"\n", "")]);
        let start = Instant::now();
        let result = PollSession::new(pod_phase())
            .config(PollConfig::new(Duration::from_secs(60), Duration::from_secs(5)))
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.calls(), 1);
        assert_eq!(result.stdout.trim(), "\"Running\"");
    }

    #[test]
    fn pending_then_running_returns_after_a_few_attempts() {
        let runner = ScriptedRunner::new(vec![
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Running\"", ""),
        ]);
        let result = PollSession::new(pod_phase())
            .config(PollConfig::new(Duration::from_secs(5), Duration::from_millis(10)))
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap();
        assert_eq!(runner.calls(), 3);
        assert!(result.stdout.contains("Running"));
    }

    #[test]
    fn late_attempts_wait_a_full_interval() {
        let runner = ScriptedRunner::new(vec![
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Running\"", ""),
        ]);
        let interval = Duration::from_millis(100);
        let start = Instant::now();
        PollSession::new(pod_phase())
            .timeout(Duration::from_millis(250))
            .interval(interval)
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(runner.calls(), 4);
        assert!(elapsed >= interval * 3, "attempt 4 started early: {elapsed:?}");
    }

    #[test]
    fn attempt_k_starts_after_k_minus_one_intervals() {
        let runner = ScriptedRunner::new(vec![
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Pending\"", ""),
            (Some(0), "\"Running\"", ""),
        ]);
        let interval = Duration::from_millis(60);
        let start = Instant::now();
        PollSession::new(pod_phase())
            .timeout(Duration::from_secs(10))
            .interval(interval)
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(runner.calls(), 4);
        assert!(elapsed >= interval * 3);
        assert!(elapsed < interval * 4 + Duration::from_millis(500), "{elapsed:?}");
    }

    #[test]
    fn interval_longer_than_timeout_is_rejected() {
        let runner = ScriptedRunner::new(vec![(Some(0), "\"Running\"", "")]);
        let err = PollSession::new(pod_phase())
            .timeout(Duration::from_secs(1))
            .interval(Duration::from_secs(5))
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
        assert!(err.to_string().contains("exceeds poll timeout"));
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn never_satisfied_times_out_after_deadline() {
        let runner = ScriptedRunner::new(vec![(Some(0), "  \"Pending\"  \n", "")]);
        let timeout = Duration::from_millis(200);
        let start = Instant::now();
        let err = PollSession::new(pod_phase())
            .config(PollConfig::new(timeout, Duration::from_millis(30)))
            .describe("pod to be Running")
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap_err();
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_secs(2));

        match err {
            HarnessError::PollTimeout {
                description,
                attempts,
                last_output,
                elapsed,
            } => {
                assert_eq!(description, "pod to be Running");
                assert!(attempts >= 2);
                assert_eq!(last_output, "\"Pending\"");
                assert!(elapsed >= timeout);
            }
            other => panic!("expected PollTimeout, got {other:?}"),
        }
    }

    #[test]
    fn fail_fast_aborts_on_first_failure() {
        let runner = ScriptedRunner::new(vec![
            (Some(1), "", "error: the server doesn't have a resource type \"pods\""),
            (Some(0), "\"Running\"", ""),
        ]);
        let err = PollSession::new(pod_phase())
            .config(PollConfig::new(Duration::from_secs(5), Duration::from_millis(10)))
            .policy(ExitPolicy::FailFast)
            .runner(&runner)
            .until(|out| out.contains("Running"))
            .unwrap_err();
        assert_eq!(runner.calls(), 1);
        match err {
            HarnessError::PollCommandFailed { attempt, report, .. } => {
                assert_eq!(attempt, 1);
                assert!(report.contains("doesn't have a resource type"));
            }
            other => panic!("expected PollCommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn tolerate_keeps_polling_through_failures() {
        let runner = ScriptedRunner::new(vec![
            (Some(1), "", "connection refused"),
            (Some(1), "", "connection refused"),
            (Some(0), "etcdoperator.v0.9.4-clusterwide", ""),
        ]);
        let result = PollSession::new(Cmd::new("odo").args(["catalog", "list", "services"]))
            .config(PollConfig::new(Duration::from_secs(5), Duration::from_millis(10)))
            .policy(ExitPolicy::Tolerate)
            .runner(&runner)
            .until(|out| out.contains("etcdoperator"))
            .unwrap();
        assert_eq!(runner.calls(), 3);
        assert!(result.succeeded());
    }

    #[test]
    fn combined_stream_exposes_stderr_to_predicate() {
        let runner = ScriptedRunner::new(vec![(Some(0), "", "warning: deprecated flag")]);
        let config = PollConfig::new(Duration::from_millis(50), Duration::from_millis(10));

        let stdout_only = PollSession::new(Cmd::new("odo"))
            .config(config)
            .runner(&runner)
            .until(|out| out.contains("deprecated"));
        assert!(stdout_only.unwrap_err().is_timeout());

        PollSession::new(Cmd::new("odo"))
            .config(config)
            .stream(OutputStream::Combined)
            .runner(&runner)
            .until(|out| out.contains("deprecated"))
            .unwrap();
    }

    #[test]
    fn predicate_sees_trimmed_output() {
        let runner = ScriptedRunner::new(vec![(Some(0), "\n  Running \n\n", "")]);
        PollSession::new(pod_phase())
            .config(PollConfig::new(Duration::from_millis(50), Duration::from_millis(10)))
            .runner(&runner)
            .until(|out| out == "Running")
            .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn wait_for_cmd_out_with_real_process() {
        let result = wait_for_cmd_out(
            "sh",
            ["-c", "echo ready"],
            PollConfig::new(Duration::from_secs(5), Duration::from_millis(50)),
            ExitPolicy::FailFast,
            |out| out == "ready",
        );
        assert!(result.succeeded());
    }

    #[cfg(unix)]
    #[test]
    #[should_panic(expected = "timed out after")]
    fn wait_for_cmd_out_panics_on_timeout() {
        wait_for_cmd_out(
            "echo",
            ["Pending"],
            PollConfig::new(Duration::from_millis(100), Duration::from_millis(20)),
            ExitPolicy::FailFast,
            |out| out.contains("Running"),
        );
    }
}
