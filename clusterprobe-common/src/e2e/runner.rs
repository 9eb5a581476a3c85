//! Process runner.
//!
//! Executes one external command to completion and captures its output. The
//! runner never fails: a program that cannot be started yields a failed
//! [`ExecutionResult`] so the caller decides whether that was expected.

use std::fmt;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

/// Exit code reported when the runner killed a command for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How often the runner checks whether the child has exited.
const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// An external command: program name plus ordered arguments.
///
/// Arguments are passed to the program verbatim, with no shell in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in `dir` instead of the current working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Kill the process if it runs longer than `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Human-readable command line for logs and failure messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("{arg:?}"));
            } else {
                line.push_str(arg);
            }
        }
        line
    }

    /// Execute with the system runner.
    pub fn run(&self) -> ExecutionResult {
        SystemRunner.run(self)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command_line: String,
    /// `None` when the program never started or was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    /// Why the program could not be started, if it could not.
    pub spawn_error: Option<String>,
}

impl ExecutionResult {
    /// True iff the process ran and exited with status zero.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Stdout followed by stderr.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Full diagnostic block used in every failure message.
    pub fn report(&self) -> String {
        let exit = match (self.exit_code, &self.spawn_error) {
            (_, Some(err)) => format!("not started ({err})"),
            (Some(code), None) => code.to_string(),
            (None, None) => "terminated by signal".to_string(),
        };
        format!(
            "command: {}\nexit code: {}{}\nduration: {:?}\n--- stdout ---\n{}\n--- stderr ---\n{}",
            self.command_line,
            exit,
            if self.timed_out { " (timed out)" } else { "" },
            self.duration,
            self.stdout.trim_end(),
            self.stderr.trim_end(),
        )
    }

    fn not_started(cmd: &Cmd, error: &std::io::Error) -> Self {
        Self {
            command_line: cmd.command_line(),
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to start {}: {error}", cmd.program),
            duration: Duration::ZERO,
            timed_out: false,
            spawn_error: Some(error.to_string()),
        }
    }
}

/// Executes commands. The seam lets pollers and scenarios run against
/// scripted outputs in tests.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, cmd: &Cmd) -> ExecutionResult;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &Cmd) -> ExecutionResult {
        debug!(command = %cmd, "executing");
        let start = Instant::now();

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        for (k, v) in &cmd.env {
            command.env(k, v);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout kill reaches grandchildren too.
            command.process_group(0);
        }

        let mut guard = match command.spawn() {
            Ok(child) => ChildGuard::new(child),
            Err(error) => {
                warn!(command = %cmd, %error, "failed to start command");
                return ExecutionResult::not_started(cmd, &error);
            }
        };
        let stdout_capture = guard.child.stdout.take().map(StreamCapture::spawn);
        let stderr_capture = guard.child.stderr.take().map(StreamCapture::spawn);

        let (exit_status, timed_out) = guard.wait_with_deadline(start, cmd.timeout);

        let collect_by = if timed_out {
            Some(Instant::now() + KILL_DRAIN_GRACE)
        } else {
            cmd.timeout.map(|limit| start + limit + KILL_DRAIN_GRACE)
        };
        let stdout = collect(stdout_capture, collect_by);
        let mut stderr = collect(stderr_capture, collect_by);
        let duration = start.elapsed();
        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            let limit = cmd.timeout.unwrap_or_default();
            stderr.push_str(&format!("Process timed out after {limit:?}."));
        }

        let exit_code = match exit_status {
            _ if timed_out => Some(TIMEOUT_EXIT_CODE),
            Some(status) => status.code(),
            None => None,
        };

        let result = ExecutionResult {
            command_line: cmd.command_line(),
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out,
            spawn_error: None,
        };

        if result.succeeded() {
            debug!(
                command = %cmd,
                exit_code = ?result.exit_code,
                duration_ms = duration.as_millis() as u64,
                "command completed"
            );
        } else {
            warn!(
                command = %cmd,
                exit_code = ?result.exit_code,
                duration_ms = duration.as_millis() as u64,
                timed_out,
                "command failed"
            );
        }
        for line in result.stdout.lines() {
            trace!(target: "clusterprobe::output", program = %cmd.program, "{line}");
        }
        for line in result.stderr.lines() {
            trace!(target: "clusterprobe::output", program = %cmd.program, stream = "stderr", "{line}");
        }

        result
    }
}

/// Owns a spawned child from the moment it starts until it has been reaped.
/// Dropping an unreaped guard kills the child's process group and waits for
/// it, so unwinding out of a test never leaves a process behind.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    /// Wait for exit, killing the child once `timeout` has elapsed since
    /// `start`. Returns the exit status (if one could be collected) and
    /// whether the deadline fired.
    fn wait_with_deadline(
        &mut self,
        start: Instant,
        timeout: Option<Duration>,
    ) -> (Option<ExitStatus>, bool) {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.reaped = true;
                    return (Some(status), false);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(%error, "failed to poll child status");
                    return (self.kill_and_reap(), false);
                }
            }

            if timeout.is_some_and(|limit| start.elapsed() >= limit) {
                return (self.kill_and_reap(), true);
            }

            thread::sleep(EXIT_CHECK_INTERVAL);
        }
    }

    fn kill_and_reap(&mut self) -> Option<ExitStatus> {
        // Only signal the group while the leader is unreaped; its pid (and
        // so the group id) cannot have been recycled yet.
        #[cfg(unix)]
        {
            if let Ok(pid) = i32::try_from(self.child.id()) {
                let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
        let _ = self.child.kill();
        let status = self.child.wait().ok();
        self.reaped = true;
        status
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill_and_reap();
        }
    }
}

/// How long to keep draining pipes after the deadline. Anything still holding
/// a pipe open past this point has escaped the process group.
const KILL_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Drains one pipe on a background thread into a shared buffer, so the bytes
/// read so far survive a read error or an abandoned reader.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<Option<String>>,
}

impl StreamCapture {
    fn spawn<R: Read + Send + 'static>(reader: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buffer);
        thread::spawn(move || {
            let _ = tx.send(drain(reader, &sink).err().map(|e| e.to_string()));
        });
        Self { buffer, done }
    }

    /// Text captured so far, waiting for end of stream until `deadline` (or
    /// indefinitely without one).
    fn finish(self, deadline: Option<Instant>) -> String {
        let status = match deadline {
            Some(deadline) => self
                .done
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok(),
            None => self.done.recv().ok(),
        };
        let bytes = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        drop(bytes);

        let note = match status {
            Some(None) => return text,
            Some(Some(error)) => format!("[read error: {error}]"),
            None => "[output truncated: stream still open after the command ended]".to_string(),
        };
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&note);
        text
    }
}

fn drain<R: Read>(mut reader: R, sink: &Mutex<Vec<u8>>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn collect(capture: Option<StreamCapture>, deadline: Option<Instant>) -> String {
    capture
        .map(|capture| capture.finish(deadline))
        .unwrap_or_default()
}
