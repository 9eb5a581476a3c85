pub mod logging;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub use clusterprobe_common::e2e::assert_contains;
pub use logging::init_test_logging;

/// `clusterprobe` with an isolated, empty config file so the developer's own
/// config never leaks into assertions.
pub fn clusterprobe(config_dir: &Path) -> Command {
    let config = config_dir.join("config.toml");
    if !config.exists() {
        std::fs::write(&config, "").expect("Failed to write empty config");
    }
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_clusterprobe"));
    cmd.arg("--config")
        .arg(&config)
        .env_remove("KUBERNETES")
        .env_remove("RUST_LOG");
    cmd
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Write an executable shell script standing in for a CLI under test.
#[cfg(unix)]
pub fn fake_cli(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write fake CLI");
    let mut perms = std::fs::metadata(&path)
        .expect("Failed to stat fake CLI")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("Failed to chmod fake CLI");
    path
}
