//! Subcommand implementations.

pub mod config;
pub mod run;
pub mod scenarios;
pub mod wait;

use anyhow::{Context, Result};
use clusterprobe_common::e2e::Cmd;

/// Build a [`Cmd`] from trailing `PROGRAM ARGS…` words.
pub fn command_from_words(words: &[String]) -> Result<Cmd> {
    let (program, args) = words.split_first().context("no program given")?;
    Ok(Cmd::new(program).args(args.iter().cloned()))
}

/// Indent each line of text with a given prefix.
pub fn indent_lines(text: &str, prefix: &str) -> String {
    let mut out = String::new();
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(prefix);
        out.push_str(line);
    }
    out
}
