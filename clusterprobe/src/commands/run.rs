//! `clusterprobe run`: execute one command and check its exit class.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use clusterprobe_common::HarnessConfig;
use clusterprobe_common::e2e::{Expectation, SystemRunner, expect_outcome};

use super::command_from_words;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Expect {
    Pass,
    Fail,
}

impl From<Expect> for Expectation {
    fn from(value: Expect) -> Self {
        match value {
            Expect::Pass => Expectation::Pass,
            Expect::Fail => Expectation::Fail,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Required exit class
    #[arg(long, value_enum, default_value_t = Expect::Pass)]
    pub expect: Expect,

    /// Kill the command after this long (e.g. 30s, 10m)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Program and arguments, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

pub fn run(args: RunArgs, config: &HarnessConfig) -> Result<ExitCode> {
    let cmd = command_from_words(&args.command)?
        .timeout(args.timeout.unwrap_or(config.command_timeout));

    match expect_outcome(&SystemRunner, &cmd, args.expect.into()) {
        Ok(result) => {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
