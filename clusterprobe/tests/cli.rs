//! End-to-end tests for the `clusterprobe` binary.

mod common;

use common::{assert_contains, clusterprobe, init_test_logging, stderr, stdout};
use tempfile::TempDir;

#[test]
fn test_help_lists_subcommands() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_lists_subcommands");

    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path()).arg("--help").output().unwrap();

    assert!(output.status.success());
    let out = stdout(&output);
    for sub in ["run", "wait", "scenarios", "config"] {
        assert_contains(&out, sub);
    }
    crate::test_log!("TEST PASS: test_help_lists_subcommands");
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::common::fake_cli;

    #[test]
    fn test_run_pass_prints_stdout() {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args(["run", "--", "echo", "Service 'example' was created"])
            .output()
            .unwrap();

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_contains(&stdout(&output), "Service 'example' was created");
    }

    #[test]
    fn test_run_expect_fail_accepts_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args(["run", "--expect", "fail", "--", "sh", "-c"])
            .arg("echo 'no service matched the query: dummy' >&2; exit 1")
            .output()
            .unwrap();

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_contains(&stderr(&output), "no service matched the query: dummy");
    }

    #[test]
    fn test_run_mismatch_exits_one_with_report() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args(["run", "--", "sh", "-c", "echo partial; exit 3"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let err = stderr(&output);
        assert_contains(&err, "expected to succeed");
        assert_contains(&err, "exit code: 3");
        assert_contains(&err, "partial");
    }

    #[test]
    fn test_run_timeout_kills_command() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args(["run", "--timeout", "200ms", "--", "sleep", "10"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        assert_contains(&stderr(&output), "timed out");
    }

    #[test]
    fn test_wait_succeeds_once_output_matches() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("count");
        let script = format!(
            "n=$(cat '{c}' 2>/dev/null || echo 0); n=$((n+1)); echo $n > '{c}'; \
             if [ $n -ge 3 ]; then echo etcdoperator service-binding-operator; else echo none; fi",
            c = counter.display()
        );

        let output = clusterprobe(dir.path())
            .args([
                "wait",
                "--contains",
                "etcdoperator",
                "--contains",
                "service-binding-operator",
                "--timeout",
                "10s",
                "--interval",
                "50ms",
                "--",
                "sh",
                "-c",
            ])
            .arg(script)
            .output()
            .unwrap();

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        assert_contains(&stdout(&output), "service-binding-operator");
        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
    }

    #[test]
    fn test_wait_times_out_with_last_output() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args([
                "wait",
                "--contains",
                "Running",
                "--timeout",
                "300ms",
                "--interval",
                "50ms",
                "--",
                "echo",
                "Pending",
            ])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let err = stderr(&output);
        assert_contains(&err, "timed out after");
        assert_contains(&err, "Pending");
    }

    #[test]
    fn test_wait_fail_fast_vs_tolerate() {
        let dir = TempDir::new().unwrap();
        let failing = ["--", "sh", "-c", "echo ready; exit 1"];

        let fail_fast = clusterprobe(dir.path())
            .args(["wait", "--contains", "ready", "--timeout", "2s", "--interval", "50ms"])
            .args(failing)
            .output()
            .unwrap();
        assert_eq!(fail_fast.status.code(), Some(1));
        assert_contains(&stderr(&fail_fast), "polled command failed on attempt 1");

        let tolerant = clusterprobe(dir.path())
            .args(["wait", "--contains", "ready", "--timeout", "2s", "--interval", "50ms"])
            .arg("--tolerate-failures")
            .args(failing)
            .output()
            .unwrap();
        assert!(tolerant.status.success(), "stderr: {}", stderr(&tolerant));
    }

    #[test]
    fn test_wait_include_stderr() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args([
                "wait",
                "--contains",
                "Running",
                "--include-stderr",
                "--timeout",
                "2s",
                "--interval",
                "50ms",
                "--",
                "sh",
                "-c",
                "echo Running >&2",
            ])
            .output()
            .unwrap();
        assert!(output.status.success(), "stderr: {}", stderr(&output));
    }

    #[test]
    fn test_wait_rejects_interval_longer_than_timeout() {
        let dir = TempDir::new().unwrap();
        let output = clusterprobe(dir.path())
            .args([
                "wait",
                "--contains",
                "x",
                "--timeout",
                "1s",
                "--interval",
                "5s",
                "--",
                "echo",
                "x",
            ])
            .output()
            .unwrap();
        assert!(!output.status.success());
        assert_contains(&stderr(&output), "exceeds poll timeout");
    }

    #[test]
    fn test_scenario_runs_against_fake_odo() {
        init_test_logging();
        let dir = TempDir::new().unwrap();
        let odo = fake_cli(
            dir.path(),
            "odo",
            r#"if [ "$1" = "service" ] && [ "$2" = "delete" ]; then
  echo "couldn't split \"$3\" into exactly two" >&2
  exit 1
fi
exit 0"#,
        );

        let output = clusterprobe(dir.path())
            .env("CLUSTERPROBE_ODO", &odo)
            .args([
                "scenarios",
                "run",
                "--filter",
                "service/delete-invalid-names",
                "--json",
            ])
            .output()
            .unwrap();

        assert!(output.status.success(), "stderr: {}", stderr(&output));
        let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
        assert_eq!(report["summary"]["passed"], 1);
        assert_eq!(report["scenarios"][0]["name"], "service/delete-invalid-names");
        assert_eq!(report["scenarios"][0]["status"], "passed");
    }

    #[test]
    fn test_scenario_failure_exits_nonzero() {
        let dir = TempDir::new().unwrap();
        let odo = fake_cli(dir.path(), "odo", "echo 'deleted' ; exit 0");

        let output = clusterprobe(dir.path())
            .env("CLUSTERPROBE_ODO", &odo)
            .args(["scenarios", "run", "--filter", "service/delete-invalid-names"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let out = stdout(&output);
        assert_contains(&out, "FAIL service/delete-invalid-names");
        assert_contains(&out, "expected to fail");
        assert_contains(&out, "0 passed, 1 failed, 0 skipped");
    }
}

#[test]
fn test_link_scenarios_skip_on_kubernetes() {
    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path())
        .env("KUBERNETES", "true")
        .args(["scenarios", "run", "--filter", "link/"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert_contains(&out, "SKIP link/link-and-unlink");
    assert_contains(&out, "0 passed, 0 failed, 4 skipped");
}

#[test]
fn test_scenarios_list() {
    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path())
        .args(["scenarios", "list"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let out = stdout(&output);
    assert_contains(&out, "operators/list-installed");
    assert_contains(&out, "service/delete-invalid-names");
    assert_contains(&out, "openshift-only");

    let output = clusterprobe(dir.path())
        .args(["scenarios", "list", "--json"])
        .output()
        .unwrap();
    let specs: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let specs = specs.as_array().unwrap();
    assert_eq!(specs.len(), 16);
    assert!(specs.iter().any(|s| s["name"] == "json/service-list"));
}

#[test]
fn test_unknown_filter_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path())
        .args(["scenarios", "run", "--filter", "no-such-scenario"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert_contains(&stderr(&output), "no scenario matches filter");
}

#[test]
fn test_config_show_applies_file_and_env() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "oc_binary = \"/opt/bin/oc\"\n\n[poll]\ninterval = \"2s\"\n",
    )
    .unwrap();

    let output = clusterprobe(dir.path())
        .env("CLUSTERPROBE_ODO", "/opt/bin/odo")
        .env("KUBERNETES", "true")
        .args(["config", "show", "--json"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let config: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(config["odo_binary"], "/opt/bin/odo");
    assert_eq!(config["oc_binary"], "/opt/bin/oc");
    assert_eq!(config["poll"]["interval"], "2s");
    assert_eq!(config["flavor"], "kubernetes");

    let output = clusterprobe(dir.path())
        .args(["config", "show"])
        .output()
        .unwrap();
    let toml_out = stdout(&output);
    assert_contains(&toml_out, "oc_binary");
    assert_contains(&toml_out, "/opt/bin/oc");
}

#[test]
fn test_invalid_env_reports_every_variable() {
    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path())
        .env("CLUSTERPROBE_POLL_TIMEOUT", "whenever")
        .env("CLUSTERPROBE_COMMAND_TIMEOUT", "eventually")
        .args(["config", "show"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let err = stderr(&output);
    assert_contains(&err, "CLUSTERPROBE_POLL_TIMEOUT");
    assert_contains(&err, "CLUSTERPROBE_COMMAND_TIMEOUT");
}

/// Needs a cluster with the etcd and service binding operators installed and
/// `odo`/`oc` logged in.
#[test]
#[ignore]
fn test_full_suite_against_live_cluster() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let output = clusterprobe(dir.path())
        .args(["scenarios", "run"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        stdout(&output),
        stderr(&output)
    );
}
