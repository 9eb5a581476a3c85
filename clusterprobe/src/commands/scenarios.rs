//! `clusterprobe scenarios`: list or run the live-cluster suite.

use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::Subcommand;
use clusterprobe_common::HarnessConfig;
use clusterprobe_common::e2e::{ScenarioEnv, ScenarioOutcome};
use serde::Serialize;
use tracing::info;

use super::indent_lines;
use crate::scenarios::{self, Scenario};

#[derive(Debug, Subcommand)]
pub enum ScenariosAction {
    /// List registered scenarios
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run scenarios against the current cluster
    Run {
        /// Only run scenarios whose name contains this text
        #[arg(long)]
        filter: Option<String>,

        /// Emit a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    name: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ScenarioReport {
    fn new(name: &'static str, outcome: &ScenarioOutcome) -> Self {
        let (status, message) = match outcome {
            ScenarioOutcome::Passed => ("passed", None),
            ScenarioOutcome::Failed(message) => ("failed", Some(message.clone())),
            ScenarioOutcome::Skipped(reason) => ("skipped", Some(reason.clone())),
        };
        Self {
            name,
            status,
            message,
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    passed: usize,
    failed: usize,
    skipped: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &ScenarioOutcome) {
        match outcome {
            ScenarioOutcome::Passed => self.passed += 1,
            ScenarioOutcome::Failed(_) => self.failed += 1,
            ScenarioOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub fn run(action: ScenariosAction, config: &HarnessConfig) -> Result<ExitCode> {
    match action {
        ScenariosAction::List { json } => {
            list(&scenarios::all(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        ScenariosAction::Run { filter, json } => {
            let selected = scenarios::matching(filter.as_deref());
            if selected.is_empty() {
                bail!(
                    "no scenario matches filter {:?}",
                    filter.unwrap_or_default()
                );
            }
            run_selected(&selected, config, json)
        }
    }
}

fn list(all: &[Scenario], json: bool) -> Result<()> {
    if json {
        let specs: Vec<_> = all.iter().map(|s| s.spec).collect();
        println!("{}", serde_json::to_string_pretty(&specs)?);
        return Ok(());
    }
    for scenario in all {
        let mut tags = Vec::new();
        if scenario.spec.openshift_only {
            tags.push("openshift-only");
        }
        if !scenario.spec.needs_project {
            tags.push("no-project");
        }
        if scenario.spec.needs_workdir {
            tags.push("workdir");
        }
        if tags.is_empty() {
            println!("{}", scenario.spec.name);
        } else {
            println!("{:<45} [{}]", scenario.spec.name, tags.join(", "));
        }
    }
    Ok(())
}

fn run_selected(selected: &[Scenario], config: &HarnessConfig, json: bool) -> Result<ExitCode> {
    let env = ScenarioEnv::from_config(config.clone());
    info!(count = selected.len(), flavor = %config.flavor, "running scenarios");

    let mut summary = RunSummary::default();
    let mut reports = Vec::with_capacity(selected.len());
    for scenario in selected {
        let outcome = scenario.run(&env);
        summary.record(&outcome);
        if !json {
            print_outcome(scenario.spec.name, &outcome);
        }
        reports.push(ScenarioReport::new(scenario.spec.name, &outcome));
    }

    if json {
        let body = serde_json::json!({ "scenarios": reports, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "\n{} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped
        );
    }

    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_outcome(name: &str, outcome: &ScenarioOutcome) {
    match outcome {
        ScenarioOutcome::Passed => println!("{} {name}", outcome.label()),
        ScenarioOutcome::Skipped(reason) => println!("{} {name}: {reason}", outcome.label()),
        ScenarioOutcome::Failed(message) => {
            println!("{} {name}", outcome.label());
            println!("{}", indent_lines(message, "    "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_outcome() {
        let mut summary = RunSummary::default();
        summary.record(&ScenarioOutcome::Passed);
        summary.record(&ScenarioOutcome::Failed("boom".to_string()));
        summary.record(&ScenarioOutcome::Skipped("kubernetes".to_string()));
        summary.record(&ScenarioOutcome::Passed);
        assert_eq!((summary.passed, summary.failed, summary.skipped), (2, 1, 1));
    }

    #[test]
    fn report_carries_status_and_message() {
        let report = ScenarioReport::new(
            "catalog/search",
            &ScenarioOutcome::Failed("no service matched".to_string()),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "catalog/search");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "no service matched");

        let passed = ScenarioReport::new("json/catalog-list", &ScenarioOutcome::Passed);
        let json = serde_json::to_value(&passed).unwrap();
        assert!(json.get("message").is_none());
    }
}
