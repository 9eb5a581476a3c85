//! Scenario registry.

pub mod operatorhub;

use clusterprobe_common::HarnessResult;
use clusterprobe_common::e2e::{
    ScenarioContext, ScenarioEnv, ScenarioOutcome, ScenarioSpec, run_scenario,
};

pub type ScenarioFn = fn(&mut ScenarioContext) -> HarnessResult<()>;

/// A named scenario body plus its lifecycle requirements.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub spec: ScenarioSpec,
    pub body: ScenarioFn,
}

impl Scenario {
    pub fn new(spec: ScenarioSpec, body: ScenarioFn) -> Self {
        Self { spec, body }
    }

    pub fn run(&self, env: &ScenarioEnv) -> ScenarioOutcome {
        run_scenario(env, &self.spec, self.body)
    }
}

/// Every registered scenario, in execution order.
pub fn all() -> Vec<Scenario> {
    operatorhub::scenarios()
}

/// Scenarios whose name contains `filter`; all of them without a filter.
pub fn matching(filter: Option<&str>) -> Vec<Scenario> {
    all()
        .into_iter()
        .filter(|s| filter.is_none_or(|f| s.spec.name.contains(f)))
        .collect()
}
