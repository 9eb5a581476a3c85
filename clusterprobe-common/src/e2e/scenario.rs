//! Scenario orchestration.
//!
//! A scenario runs against its own freshly created project so concurrent or
//! leftover runs cannot see each other's resources. [`run_scenario`] owns the
//! lifecycle: skip when the cluster flavor does not apply, set up, run the
//! body, and always tear down, even when the body panics.

use std::any::Any;
use std::env;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

use super::assertions::{Expectation, expect_outcome};
use super::logging::{LoggerConfig, LogLevel, LogSource, TestLogger, default_log_dir};
use super::poller::{ExitPolicy, PollSession};
use super::runner::{Cmd, ExecutionResult, ProcessRunner, SystemRunner};
use crate::config::{ClusterFlavor, HarnessConfig, PollConfig};
use crate::errors::{HarnessError, HarnessResult};

/// Length of generated project names.
pub const PROJECT_NAME_LEN: usize = 10;

/// Random lowercase ASCII letters, usable as a Kubernetes namespace or
/// resource name.
pub fn rand_string(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for byte in Uuid::new_v4().as_bytes() {
            if out.len() == len {
                break;
            }
            out.push(char::from(b'a' + byte % 26));
        }
    }
    out
}

/// Creates and deletes the isolated project a scenario runs in.
pub trait Provisioner: Send + Sync {
    fn create_project(&self, name: &str) -> HarnessResult<()>;
    fn delete_project(&self, name: &str) -> HarnessResult<()>;
}

/// Provisions projects through the CLI under test and waits for each
/// operation to complete.
pub struct OdoProvisioner {
    config: HarnessConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl OdoProvisioner {
    pub fn new(config: &HarnessConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config: config.clone(),
            runner,
        }
    }

    fn odo(&self, args: &[&str]) -> Cmd {
        Cmd::new(&self.config.odo_binary)
            .args(args.iter().copied())
            .timeout(self.config.command_timeout)
    }
}

impl Provisioner for OdoProvisioner {
    fn create_project(&self, name: &str) -> HarnessResult<()> {
        let cmd = self.odo(&["project", "create", name, "-w"]);
        expect_outcome(&*self.runner, &cmd, Expectation::Pass)
            .map(|_| ())
            .map_err(|e| HarnessError::SetupFailed(format!("creating project {name}: {e}")))
    }

    fn delete_project(&self, name: &str) -> HarnessResult<()> {
        let cmd = self.odo(&["project", "delete", name, "-f", "-w"]);
        expect_outcome(&*self.runner, &cmd, Expectation::Pass)
            .map(|_| ())
            .map_err(|e| HarnessError::TeardownFailed(format!("deleting project {name}: {e}")))
    }
}

/// Everything a scenario needs from its surroundings.
#[derive(Clone)]
pub struct ScenarioEnv {
    pub config: HarnessConfig,
    pub provisioner: Arc<dyn Provisioner>,
    pub runner: Arc<dyn ProcessRunner>,
    /// Where scenario JSONL logs go; `None` keeps them in memory.
    pub log_dir: Option<PathBuf>,
}

impl ScenarioEnv {
    /// Real processes, projects provisioned through odo, logs under
    /// `target/test-logs`.
    pub fn from_config(config: HarnessConfig) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        let provisioner = Arc::new(OdoProvisioner::new(&config, Arc::clone(&runner)));
        Self {
            config,
            provisioner,
            runner,
            log_dir: Some(default_log_dir()),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }
}

/// Static description of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScenarioSpec {
    pub name: &'static str,
    /// Skipped on plain Kubernetes clusters.
    pub openshift_only: bool,
    /// Create an isolated project before the body runs.
    pub needs_project: bool,
    /// Run the body inside a fresh temporary working directory.
    pub needs_workdir: bool,
}

impl ScenarioSpec {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            openshift_only: false,
            needs_project: true,
            needs_workdir: false,
        }
    }

    pub const fn openshift_only(mut self) -> Self {
        self.openshift_only = true;
        self
    }

    pub const fn without_project(mut self) -> Self {
        self.needs_project = false;
        self
    }

    pub const fn with_workdir(mut self) -> Self {
        self.needs_workdir = true;
        self
    }

    /// Why this scenario does not apply to `flavor`, if it does not.
    pub fn skip_reason(&self, flavor: ClusterFlavor) -> Option<String> {
        if self.openshift_only && flavor == ClusterFlavor::Kubernetes {
            Some("This is a OpenShift specific scenario, skipping".to_string())
        } else {
            None
        }
    }
}

/// Per-scenario handle threaded through scenario bodies.
pub struct ScenarioContext {
    name: String,
    project: String,
    project_created: bool,
    config: HarnessConfig,
    provisioner: Arc<dyn Provisioner>,
    runner: Arc<dyn ProcessRunner>,
    logger: TestLogger,
    workdir: Option<TempDir>,
    previous_dir: Option<PathBuf>,
    torn_down: bool,
}

impl ScenarioContext {
    /// Create a random project for scenario `label` and return its context.
    pub fn setup(env: &ScenarioEnv, label: &str) -> HarnessResult<Self> {
        let mut ctx = Self::unprovisioned(env, label);
        ctx.logger.info(format!("creating project {}", ctx.project));
        ctx.provisioner.create_project(&ctx.project)?;
        ctx.project_created = true;
        info!(scenario = label, project = %ctx.project, "scenario project created");
        Ok(ctx)
    }

    /// A context with a generated project name that is never created on the
    /// cluster, for scenarios that only exercise client-side validation.
    pub fn unprovisioned(env: &ScenarioEnv, label: &str) -> Self {
        let logger = TestLogger::new(
            label,
            LoggerConfig {
                log_dir: env.log_dir.clone(),
                ..LoggerConfig::default()
            },
        );
        Self {
            name: label.to_string(),
            project: rand_string(PROJECT_NAME_LEN),
            project_created: false,
            config: env.config.clone(),
            provisioner: Arc::clone(&env.provisioner),
            runner: Arc::clone(&env.runner),
            logger,
            workdir: None,
            previous_dir: None,
            torn_down: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scenario's isolated namespace.
    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn logger(&self) -> &TestLogger {
        &self.logger
    }

    pub fn flavor(&self) -> ClusterFlavor {
        self.config.flavor
    }

    /// Create a temporary directory and make it the working directory until
    /// teardown.
    pub fn with_workdir(&mut self) -> HarnessResult<&Path> {
        if self.workdir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("clusterprobe-")
                .tempdir()
                .map_err(|e| HarnessError::SetupFailed(format!("creating workdir: {e}")))?;
            let previous = env::current_dir()?;
            env::set_current_dir(dir.path())?;
            self.logger
                .debug(format!("changed directory to {}", dir.path().display()));
            self.previous_dir = Some(previous);
            self.workdir = Some(dir);
        }
        self.workdir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| HarnessError::SetupFailed("workdir missing".to_string()))
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    /// Directory for scenario files: the workdir if there is one, otherwise
    /// the current directory.
    fn file_root(&self) -> HarnessResult<PathBuf> {
        match self.workdir() {
            Some(dir) => Ok(dir.to_path_buf()),
            None => Ok(env::current_dir()?),
        }
    }

    /// Copy a fixture from the configured devfile root into the scenario
    /// directory. `src` is relative to the devfile root and `dst` to the
    /// scenario directory.
    pub fn copy_example_devfile(&self, src: &Path, dst: &Path) -> HarnessResult<PathBuf> {
        let from = if src.is_absolute() {
            src.to_path_buf()
        } else {
            self.config.devfile_root.join(src)
        };
        let to = self.file_root()?.join(dst);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&from, &to).map_err(|e| {
            HarnessError::SetupFailed(format!(
                "copying {} to {}: {e}",
                from.display(),
                to.display()
            ))
        })?;
        Ok(to)
    }

    /// Write `content` to `name` in the scenario directory.
    pub fn write_file(&self, name: &str, content: &str) -> HarnessResult<PathBuf> {
        let path = self.file_root()?.join(name);
        fs::write(&path, content)?;
        self.logger.debug(format!("wrote {}", path.display()));
        Ok(path)
    }

    /// An invocation of the CLI under test, bounded by the command timeout.
    pub fn odo<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(&self.config.odo_binary)
            .args(args)
            .timeout(self.config.command_timeout)
    }

    /// An invocation of the cluster inspection tool.
    pub fn oc<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(&self.config.oc_binary)
            .args(args)
            .timeout(self.config.command_timeout)
    }

    /// Run `cmd` through the scenario's runner, check the outcome and log it.
    pub fn expect(&self, cmd: &Cmd, expected: Expectation) -> HarnessResult<ExecutionResult> {
        let outcome = expect_outcome(&*self.runner, cmd, expected);
        match &outcome {
            Ok(result) => self.logger.log_result(cmd.program(), result),
            Err(err) => self.logger.log(
                LogLevel::Error,
                LogSource::Command {
                    program: cmd.program().to_string(),
                },
                err.to_string(),
            ),
        }
        outcome
    }

    /// Require success and return stdout.
    pub fn pass(&self, cmd: &Cmd) -> HarnessResult<String> {
        Ok(self.expect(cmd, Expectation::Pass)?.stdout)
    }

    /// Require failure and return stderr.
    pub fn fail(&self, cmd: &Cmd) -> HarnessResult<String> {
        Ok(self.expect(cmd, Expectation::Fail)?.stderr)
    }

    /// Poll `cmd` through the scenario's runner.
    pub fn wait_for<F>(
        &self,
        cmd: Cmd,
        description: &str,
        poll: PollConfig,
        policy: ExitPolicy,
        predicate: F,
    ) -> HarnessResult<ExecutionResult>
    where
        F: FnMut(&str) -> bool,
    {
        self.logger.debug(format!("waiting for {description}"));
        let outcome = PollSession::new(cmd)
            .config(poll)
            .policy(policy)
            .describe(description)
            .runner(&*self.runner)
            .until(predicate);
        match &outcome {
            Ok(_) => self.logger.info(format!("condition met: {description}")),
            Err(err) => self.logger.error(err.to_string()),
        }
        outcome
    }

    /// Delete the project, restore the working directory and remove the
    /// temporary directory. Every step runs even if an earlier one fails;
    /// the first error is returned. Calling it twice is a no-op.
    pub fn teardown(&mut self) -> HarnessResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        let mut first_error: Option<HarnessError> = None;

        if self.project_created {
            self.logger.info(format!("deleting project {}", self.project));
            if let Err(err) = self.provisioner.delete_project(&self.project) {
                warn!(project = %self.project, error = %err, "project deletion failed");
                self.logger.error(err.to_string());
                first_error.get_or_insert(err);
            }
        }

        if let Some(previous) = self.previous_dir.take()
            && let Err(err) = env::set_current_dir(&previous)
        {
            let err = HarnessError::TeardownFailed(format!(
                "restoring working directory {}: {err}",
                previous.display()
            ));
            self.logger.error(err.to_string());
            first_error.get_or_insert(err);
        }

        if let Some(dir) = self.workdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                let err = HarnessError::TeardownFailed(format!(
                    "removing {}: {err}",
                    path.display()
                ));
                self.logger.error(err.to_string());
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ScenarioContext {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(scenario = %self.name, error = %err, "teardown on drop failed");
        }
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum ScenarioOutcome {
    Passed,
    Failed(String),
    Skipped(String),
}

impl ScenarioOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed(_) => "FAIL",
            Self::Skipped(_) => "SKIP",
        }
    }

    /// Abort the calling test if the scenario failed.
    #[track_caller]
    pub fn assert_passed(&self) {
        if let Self::Failed(message) = self {
            panic!("{message}");
        }
    }
}

/// Run one scenario end to end.
///
/// A body failure, returned or panicked, is reported even when teardown
/// also fails; the teardown error is only logged in that case.
pub fn run_scenario<F>(env: &ScenarioEnv, spec: &ScenarioSpec, body: F) -> ScenarioOutcome
where
    F: FnOnce(&mut ScenarioContext) -> HarnessResult<()>,
{
    if let Some(reason) = spec.skip_reason(env.config.flavor) {
        info!(scenario = spec.name, %reason, "scenario skipped");
        return ScenarioOutcome::Skipped(reason);
    }

    let start = Instant::now();
    let mut ctx = if spec.needs_project {
        match ScenarioContext::setup(env, spec.name) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(scenario = spec.name, error = %err, "scenario setup failed");
                return ScenarioOutcome::Failed(err.to_string());
            }
        }
    } else {
        ScenarioContext::unprovisioned(env, spec.name)
    };

    let workdir_error = if spec.needs_workdir {
        ctx.with_workdir().err()
    } else {
        None
    };

    let body_failure = if let Some(err) = workdir_error {
        Some(err.to_string())
    } else {
        ctx.logger.log(
            LogLevel::Info,
            LogSource::Scenario {
                name: spec.name.to_string(),
            },
            "running",
        );
        match panic::catch_unwind(AssertUnwindSafe(|| body(&mut ctx))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        }
    };

    let teardown = ctx.teardown();
    let outcome = match (body_failure, teardown) {
        (None, Ok(())) => ScenarioOutcome::Passed,
        (None, Err(err)) => ScenarioOutcome::Failed(err.to_string()),
        (Some(message), Ok(())) => ScenarioOutcome::Failed(message),
        (Some(message), Err(err)) => {
            warn!(scenario = spec.name, error = %err, "teardown failed after scenario failure");
            ctx.logger.warn(format!("teardown failed after scenario failure: {err}"));
            ScenarioOutcome::Failed(message)
        }
    };

    if outcome.is_failed() {
        ctx.logger.error(format!("scenario {} failed", spec.name));
    }
    let summary = ctx.logger.summary();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        scenario = spec.name,
        outcome = outcome.label(),
        elapsed_ms,
        commands = summary.commands_run,
        first_error = ?summary.first_error,
        log = ?ctx.logger.log_path(),
        "scenario finished"
    );
    let mut context = vec![
        ("outcome".to_string(), outcome.label().to_string()),
        ("elapsed_ms".to_string(), elapsed_ms.to_string()),
        ("commands".to_string(), summary.commands_run.to_string()),
    ];
    if let Some(first_error) = summary.first_error {
        context.push(("first_error".to_string(), first_error));
    }
    ctx.logger.log_with_context(
        LogLevel::Info,
        LogSource::Scenario {
            name: spec.name.to_string(),
        },
        "finished",
        context,
    );
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "scenario panicked".to_string()
    }
}
