//! Substring matching over captured output.
//!
//! Pure functions only. Retrying until output matches is the poller's job.

use std::fmt;

/// Some required substrings were absent from a captured blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFailure {
    pub missing: Vec<String>,
    pub output: String,
}

impl fmt::Display for MatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "output is missing {} expected substring(s):", self.missing.len())?;
        for needle in &self.missing {
            writeln!(f, "  - {needle:?}")?;
        }
        write!(f, "--- output ---\n{}", self.output)
    }
}

impl std::error::Error for MatchFailure {}

/// The required substrings that do not occur in `output`, in input order.
pub fn missing_substrings<'a, S: AsRef<str>>(output: &str, required: &'a [S]) -> Vec<&'a str> {
    required
        .iter()
        .map(|needle| needle.as_ref())
        .filter(|needle| !output.contains(*needle))
        .collect()
}

/// Succeeds iff every required substring occurs literally in `output`.
pub fn match_all_in_output<S: AsRef<str>>(
    output: &str,
    required: &[S],
) -> Result<(), MatchFailure> {
    let missing = missing_substrings(output, required);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MatchFailure {
            missing: missing.into_iter().map(str::to_string).collect(),
            output: output.to_string(),
        })
    }
}

/// Panicking form of [`match_all_in_output`] for test bodies.
#[track_caller]
pub fn assert_all_in_output<S: AsRef<str>>(output: &str, required: &[S]) {
    if let Err(failure) = match_all_in_output(output, required) {
        panic!("{failure}");
    }
}

/// Assert a single substring, printing the whole haystack on failure.
#[track_caller]
pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}
