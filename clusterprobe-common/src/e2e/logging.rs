//! Scenario logging.
//!
//! Each scenario gets a [`TestLogger`] that keeps its entries in memory and
//! appends them as JSONL to
//! `target/test-logs/<scenario>_<timestamp>.jsonl`. A failed live-cluster run
//! leaves behind the exact command sequence and outputs.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::runner::ExecutionResult;

/// Log severity levels for scenario logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.pad(s)
    }
}

/// Where a log entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// The harness itself (setup, teardown, polling).
    Harness,
    /// Output or outcome of an external command.
    Command { program: String },
    /// A scenario body.
    Scenario { name: String },
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSource::Harness => write!(f, "harness"),
            LogSource::Command { program } => write!(f, "cmd:{program}"),
            LogSource::Scenario { name } => write!(f, "scenario:{name}"),
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Elapsed time since the logger was created
    pub elapsed_ms: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<(String, String)>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}ms] [{:<5}] [{}] {}",
            self.elapsed_ms, self.level, self.source, self.message
        )?;
        if !self.context.is_empty() {
            let pairs: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " {{{}}}", pairs.join(", "))?;
        }
        Ok(())
    }
}

/// Configuration for the test logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Minimum log level to capture
    pub min_level: LogLevel,
    /// Maximum number of entries kept in memory (0 = unlimited)
    pub max_entries: usize,
    /// Directory for the JSONL file; `None` keeps logs in memory only
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Debug,
            max_entries: 10_000,
            log_dir: None,
        }
    }
}

/// Thread-safe per-scenario logger. Clones share the same entries.
#[derive(Clone)]
pub struct TestLogger {
    config: Arc<LoggerConfig>,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    start_time: Instant,
    name: Arc<String>,
    file_writer: Arc<Mutex<Option<BufWriter<File>>>>,
    log_path: Arc<Option<PathBuf>>,
}

impl TestLogger {
    pub fn new(name: &str, config: LoggerConfig) -> Self {
        let mut file_writer = None;
        let mut log_path = None;

        if let Some(dir) = &config.log_dir {
            match fs::create_dir_all(dir) {
                Ok(()) => {
                    let sanitized = sanitize_file_component(name);
                    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
                    let path = dir.join(format!("{sanitized}_{timestamp}.jsonl"));
                    match File::create(&path) {
                        Ok(file) => {
                            file_writer = Some(BufWriter::new(file));
                            log_path = Some(path);
                        }
                        Err(error) => {
                            tracing::warn!(path = %path.display(), %error, "failed to create scenario log file");
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(dir = %dir.display(), %error, "failed to create log directory");
                }
            }
        }

        Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(VecDeque::new())),
            start_time: Instant::now(),
            name: Arc::new(name.to_string()),
            file_writer: Arc::new(Mutex::new(file_writer)),
            log_path: Arc::new(log_path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Path of the JSONL file, when file logging is enabled.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn log(&self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        self.log_with_context(level, source, message, Vec::new());
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
        context: Vec<(String, String)>,
    ) {
        if level < self.config.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            level,
            source,
            message: message.into(),
            context,
        };

        {
            let mut file_writer = lock(&self.file_writer);
            if let Some(writer) = file_writer.as_mut()
                && let Ok(json) = serde_json::to_string(&entry)
            {
                let _ = writeln!(writer, "{json}");
                let _ = writer.flush();
            }
        }

        let mut entries = lock(&self.entries);
        entries.push_back(entry);
        if self.config.max_entries > 0 && entries.len() > self.config.max_entries {
            entries.pop_front();
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, LogSource::Harness, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, LogSource::Harness, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, LogSource::Harness, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, LogSource::Harness, message);
    }

    /// Record one command execution with its exit code and both streams.
    pub fn log_result(&self, program: &str, result: &ExecutionResult) {
        let level = if result.succeeded() {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
        let exit = result
            .exit_code
            .map_or_else(|| "none".to_string(), |code| code.to_string());
        let mut context = vec![
            ("exit_code".to_string(), exit),
            (
                "duration_ms".to_string(),
                result.duration.as_millis().to_string(),
            ),
        ];
        if !result.stdout.is_empty() {
            context.push(("stdout".to_string(), result.stdout.trim_end().to_string()));
        }
        if !result.stderr.is_empty() {
            context.push(("stderr".to_string(), result.stderr.trim_end().to_string()));
        }
        self.log_with_context(
            level,
            LogSource::Command {
                program: program.to_string(),
            },
            result.command_line.clone(),
            context,
        );
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).iter().cloned().collect()
    }

    pub fn summary(&self) -> TestLogSummary {
        let entries = lock(&self.entries);
        let mut summary = TestLogSummary {
            name: self.name.to_string(),
            total_entries: entries.len(),
            duration_ms: self.elapsed().as_millis() as u64,
            counts_by_level: HashMap::new(),
            commands_run: 0,
            first_error: None,
        };

        for entry in entries.iter() {
            *summary.counts_by_level.entry(entry.level).or_insert(0) += 1;
            if matches!(entry.source, LogSource::Command { .. }) {
                summary.commands_run += 1;
            }
            if entry.level == LogLevel::Error && summary.first_error.is_none() {
                summary.first_error = Some(entry.message.clone());
            }
        }

        summary
    }
}

/// Summary of a scenario's log
#[derive(Debug, Clone, Serialize)]
pub struct TestLogSummary {
    pub name: String,
    pub total_entries: usize,
    pub duration_ms: u64,
    pub counts_by_level: HashMap<LogLevel, usize>,
    pub commands_run: usize,
    pub first_error: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn sanitize_file_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "scenario".to_string()
    } else {
        cleaned
    }
}

/// `target/test-logs`, honouring `CARGO_TARGET_DIR` and searching upward
/// from the current directory for an existing `target/`.
pub fn default_log_dir() -> PathBuf {
    find_target_dir().join("test-logs")
}

pub(crate) fn find_target_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir);
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target;
        }
        if !cwd.pop() {
            return PathBuf::from("target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_result() -> ExecutionResult {
        ExecutionResult {
            command_line: "odo service create".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "please specify service type and plan\n".to_string(),
            duration: Duration::from_millis(12),
            timed_out: false,
            spawn_error: None,
        }
    }

    #[test]
    fn min_level_filters_entries() {
        let logger = TestLogger::new(
            "filter",
            LoggerConfig {
                min_level: LogLevel::Info,
                ..LoggerConfig::default()
            },
        );
        logger.debug("dropped");
        logger.info("kept");
        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "kept");
    }

    #[test]
    fn max_entries_evicts_oldest() {
        let logger = TestLogger::new(
            "bounded",
            LoggerConfig {
                max_entries: 2,
                ..LoggerConfig::default()
            },
        );
        logger.info("one");
        logger.info("two");
        logger.info("three");
        let messages: Vec<String> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn log_result_records_streams_and_counts_commands() {
        let logger = TestLogger::new("results", LoggerConfig::default());
        logger.log_result("odo", &failed_result());
        logger.error("scenario failed");

        let entry = &logger.entries()[0];
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.source.to_string(), "cmd:odo");
        assert!(entry
            .context
            .iter()
            .any(|(k, v)| k == "stderr" && v == "please specify service type and plan"));

        let summary = logger.summary();
        assert_eq!(summary.commands_run, 1);
        assert_eq!(summary.first_error.as_deref(), Some("scenario failed"));
        assert_eq!(summary.counts_by_level.get(&LogLevel::Error), Some(&1));
    }

    #[test]
    fn writes_jsonl_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TestLogger::new(
            "operatorhub::list services",
            LoggerConfig {
                log_dir: Some(dir.path().to_path_buf()),
                ..LoggerConfig::default()
            },
        );
        logger.info("first");
        logger.log_result("odo", &failed_result());

        let path = logger.log_path().unwrap().to_path_buf();
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("operatorhub__list_services_"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: LogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(
            parsed.source,
            LogSource::Command {
                program: "odo".to_string()
            }
        );
    }

    #[test]
    fn entry_display_includes_context() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            elapsed_ms: 7,
            level: LogLevel::Info,
            source: LogSource::Scenario {
                name: "link".to_string(),
            },
            message: "linked".to_string(),
            context: vec![("project".to_string(), "abcdefghij".to_string())],
        };
        let line = entry.to_string();
        assert!(line.contains("[scenario:link] linked"));
        assert!(line.contains("{project=abcdefghij}"));
    }
}
