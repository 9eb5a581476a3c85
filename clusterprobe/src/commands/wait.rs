//! `clusterprobe wait`: poll a command until its output contains every
//! requested substring.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use clusterprobe_common::{HarnessConfig, HarnessError};
use clusterprobe_common::e2e::{ExitPolicy, OutputStream, PollSession, missing_substrings};
use tracing::debug;

use super::command_from_words;

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Substring that must appear in the output (repeatable)
    #[arg(long = "contains", value_name = "TEXT", required = true)]
    pub contains: Vec<String>,

    /// Give up after this long (default: configured poll timeout)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Pause between attempts (default: configured poll interval)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Keep polling when the command exits non-zero
    #[arg(long)]
    pub tolerate_failures: bool,

    /// Match against stdout followed by stderr
    #[arg(long)]
    pub include_stderr: bool,

    /// Program and arguments, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub fn run(args: WaitArgs, config: &HarnessConfig) -> Result<ExitCode> {
    let policy = if args.tolerate_failures {
        ExitPolicy::Tolerate
    } else {
        ExitPolicy::FailFast
    };
    let stream = if args.include_stderr {
        OutputStream::Combined
    } else {
        OutputStream::Stdout
    };

    let cmd = command_from_words(&args.command)?.timeout(config.command_timeout);
    debug!(command = %cmd, wanted = ?args.contains, "waiting for output");

    let mut session = PollSession::new(cmd).config(config.poll);
    if let Some(timeout) = args.timeout {
        session = session.timeout(timeout);
    }
    if let Some(interval) = args.interval {
        session = session.interval(interval);
    }
    let outcome = session
        .policy(policy)
        .stream(stream)
        .describe(format!("output containing {:?}", args.contains))
        .until(|out| missing_substrings(out, &args.contains).is_empty());

    match outcome {
        Ok(result) => {
            print!("{}", result.stdout);
            Ok(ExitCode::SUCCESS)
        }
        Err(err @ HarnessError::Config(_)) => Err(err.into()),
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
