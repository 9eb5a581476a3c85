//! Tracing setup for tests.
//!
//! ```ignore
//! #[test]
//! fn polls_pod_phase() {
//!     clusterprobe_common::testing::init_test_logging();
//!     tracing::info!("captured by the test writer");
//! }
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::e2e::logging::find_target_dir;

static GLOBAL_LOGGING_INIT: Once = Once::new();

const CRATE_TARGETS: [&str; 2] = ["clusterprobe", "clusterprobe_common"];

fn filter_for(level: &str) -> EnvFilter {
    let directives = CRATE_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Human-readable logs through the test writer, so output only shows for
/// failing tests. `RUST_LOG` wins over the debug default. Safe to call from
/// every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for("debug"));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// Human-readable test-writer output plus every event as JSON in
/// `target/test-logs/all_tests.jsonl`.
///
/// - `CLUSTERPROBE_TEST_LOG_FILE` overrides the JSONL path.
/// - `CLUSTERPROBE_TEST_LOG_LEVEL` sets the level (default `info`).
///
/// Initialization happens once per process; if another subscriber is
/// already installed this is a no-op.
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let file_layer = create_global_log_file().map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let level =
            std::env::var("CLUSTERPROBE_TEST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let subscriber = tracing_subscriber::registry()
            .with(filter_for(&level))
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("CLUSTERPROBE_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = find_target_dir().join("test-logs");
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}
