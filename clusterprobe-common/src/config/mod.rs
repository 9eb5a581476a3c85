//! Harness configuration.
//!
//! Values are resolved in priority order: environment variables, an optional
//! TOML file, then built-in defaults. The resolved [`HarnessConfig`] is passed
//! explicitly to every component that needs timeouts or binary names; there
//! are no process-wide mutable defaults.

pub mod env;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{HarnessError, HarnessResult};

pub use env::{EnvError, EnvParser};

/// File name looked up under the user config directory when no explicit
/// config path is given.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which cluster distribution the suite is running against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterFlavor {
    #[default]
    OpenShift,
    Kubernetes,
}

impl ClusterFlavor {
    /// Resolve the flavor from `KUBERNETES=true`, defaulting to OpenShift.
    pub fn from_env() -> Self {
        match EnvParser::unprefixed().get_bool("KUBERNETES") {
            Some(true) => Self::Kubernetes,
            _ => Self::OpenShift,
        }
    }
}

impl fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenShift => write!(f, "openshift"),
            Self::Kubernetes => write!(f, "kubernetes"),
        }
    }
}

/// Deadline and cadence for one condition poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Give up once this much time has elapsed since the first attempt.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Pause between attempts.
    #[serde(with = "duration_str")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(1),
        }
    }
}

impl PollConfig {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Same cadence, different deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same deadline, different cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.interval.is_zero() {
            return Err(HarnessError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.interval > self.timeout {
            return Err(HarnessError::Config(format!(
                "poll interval {} exceeds poll timeout {}",
                humantime::format_duration(self.interval),
                humantime::format_duration(self.timeout)
            )));
        }
        Ok(())
    }
}

/// Resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Hard limit for a single command execution.
    #[serde(with = "duration_str")]
    pub command_timeout: Duration,
    /// How long to wait for operators to show up in a fresh namespace.
    #[serde(with = "duration_str")]
    pub operator_wait_timeout: Duration,
    /// How long to wait for an operand pod to reach `Running`.
    #[serde(with = "duration_str")]
    pub pod_wait_timeout: Duration,
    /// Program name or path of the CLI under test.
    pub odo_binary: String,
    /// Program name or path of the cluster inspection tool.
    pub oc_binary: String,
    pub flavor: ClusterFlavor,
    pub log_level: String,
    /// Directory holding example devfiles copied into scenario workdirs.
    pub devfile_root: PathBuf,
    /// Default poll deadline and interval.
    pub poll: PollConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(600),
            operator_wait_timeout: Duration::from_secs(300),
            pod_wait_timeout: Duration::from_secs(60),
            odo_binary: "odo".to_string(),
            oc_binary: "oc".to_string(),
            flavor: ClusterFlavor::OpenShift,
            log_level: "info".to_string(),
            devfile_root: PathBuf::from("tests").join("examples"),
            poll: PollConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration: defaults, then the config file (explicit path, or
    /// the user config directory if present), then environment overrides.
    pub fn load(explicit_path: Option<&Path>) -> HarnessResult<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loaded harness config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `CLUSTERPROBE_*` and `KUBERNETES` overrides. All parse errors
    /// are reported together.
    pub fn apply_env(&mut self) -> HarnessResult<()> {
        let mut parser = EnvParser::new();
        if let Some(v) = parser.get_duration("COMMAND_TIMEOUT") {
            self.command_timeout = v;
        }
        if let Some(v) = parser.get_duration("POLL_TIMEOUT") {
            self.poll.timeout = v;
        }
        if let Some(v) = parser.get_duration("POLL_INTERVAL") {
            self.poll.interval = v;
        }
        if let Some(v) = parser.get_duration("OPERATOR_WAIT_TIMEOUT") {
            self.operator_wait_timeout = v;
        }
        if let Some(v) = parser.get_duration("POD_WAIT_TIMEOUT") {
            self.pod_wait_timeout = v;
        }
        if let Some(v) = parser.get_string("ODO") {
            self.odo_binary = v;
        }
        if let Some(v) = parser.get_string("OC") {
            self.oc_binary = v;
        }
        if let Some(v) = parser.get_log_level("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = parser.get_path("DEVFILE_ROOT") {
            self.devfile_root = v;
        }

        let mut flavor_parser = EnvParser::unprefixed();
        match flavor_parser.get_bool("KUBERNETES") {
            Some(true) => self.flavor = ClusterFlavor::Kubernetes,
            Some(false) => self.flavor = ClusterFlavor::OpenShift,
            None => {}
        }

        let errors: Vec<String> = parser
            .take_errors()
            .into_iter()
            .chain(flavor_parser.take_errors())
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Config(errors.join("; ")))
        }
    }

    pub fn validate(&self) -> HarnessResult<()> {
        self.poll.validate()?;
        if self.command_timeout.is_zero() {
            return Err(HarnessError::Config(
                "command timeout must be greater than zero".to_string(),
            ));
        }
        if self.odo_binary.trim().is_empty() || self.oc_binary.trim().is_empty() {
            return Err(HarnessError::Config(
                "odo and oc binaries must be non-empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll settings for operator discovery.
    pub fn operator_poll(&self) -> PollConfig {
        self.poll.with_timeout(self.operator_wait_timeout)
    }

    /// Poll settings for pod readiness.
    pub fn pod_poll(&self) -> PollConfig {
        self.poll.with_timeout(self.pod_wait_timeout)
    }
}

/// `~/.config/clusterprobe/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("clusterprobe").join(CONFIG_FILE_NAME))
}

/// Serde adapter storing durations as humantime strings (`"1m 30s"`).
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
