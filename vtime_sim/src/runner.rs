//! Scenario runner - executes scheduling scenarios and judges their traces.

use crate::events::{Observation, StepRecord};
use crate::oracle::{Oracle, TraceSummary, Violation};
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use tracing::{debug, info, warn};
use vtime_core::{TimePoint, VirtualClock};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the run reached quiescence with a clean trace
    pub passed: bool,

    /// Cranks executed
    pub total_steps: u64,

    /// Final virtual time
    pub final_time: TimePoint,

    /// Applications sharing the clock
    pub num_apps: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Every property violation the oracle found
    pub violations: Vec<Violation>,

    /// Counts collected from the trace
    pub metrics: TraceSummary,

    /// Digest of the observation log
    pub trace_digest: u64,
}

/// A finished run together with its raw trace.
pub struct RecordedRun {
    pub result: ScenarioResult,
    pub observations: Vec<Observation>,
    pub steps: Vec<StepRecord>,
}

/// Runs scenarios against a base configuration.
pub struct ScenarioRunner {
    base: SimConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_apps: usize) -> Self {
        Self::from_config(SimConfig {
            seed,
            num_apps,
            ..Default::default()
        })
    }

    /// Creates a runner whose scenarios start from `config`.
    pub fn from_config(config: SimConfig) -> Self {
        Self { base: config }
    }

    /// Sets the crank budget.
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.base.max_steps = max_steps;
        self
    }

    /// Returns the base configuration.
    pub fn config(&self) -> &SimConfig {
        &self.base
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_recorded(scenario).result
    }

    /// Runs a scenario and keeps the trace.
    pub fn run_recorded(&self, scenario: ScenarioId) -> RecordedRun {
        let config = scenario.configure(&self.base);
        info!("Starting scenario: {} (seed={})", scenario.name(), config.seed);
        debug!(?config, "scenario configuration");

        let mut world = SimWorld::new(config);
        let num_apps = world.spawn_nodes();
        world.install_workload();
        let outcome = world.run();

        let observations = world.observations();
        let steps = world.steps().to_vec();
        let violations = Oracle::new(&observations, &steps).check();
        let metrics = TraceSummary::from_trace(&observations, &steps);

        let failure_reason = if !outcome.quiescent {
            Some(format!("not quiescent after {} steps", outcome.steps))
        } else if let Some(first) = violations.first() {
            Some(format!("{} violation(s), first: {}", violations.len(), first))
        } else {
            None
        };

        match &failure_reason {
            None => info!(
                "   {} steps, {} tasks, {} timers fired, {} cancelled, t={}",
                outcome.steps,
                metrics.tasks_run,
                metrics.timers_fired,
                metrics.waits_cancelled,
                VirtualClock::format_iso8601(world.time()),
            ),
            Some(reason) => warn!("   {} failed: {}", scenario.name(), reason),
        }

        let result = ScenarioResult {
            scenario,
            seed: world.config.seed,
            passed: failure_reason.is_none(),
            total_steps: outcome.steps,
            final_time: world.time(),
            num_apps,
            failure_reason,
            violations,
            metrics,
            trace_digest: world.trace_digest(),
        };

        RecordedRun {
            result,
            observations,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dispatch_order_scenario() {
        let result = ScenarioRunner::new(42, 4).run(ScenarioId::DispatchOrder);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.num_apps, 1);
        assert_eq!(result.metrics.timers_fired, 32);
        assert_eq!(result.metrics.tasks_run, 0);
    }

    #[test]
    fn test_shared_idle_scenario() {
        let result = ScenarioRunner::new(42, 4).run(ScenarioId::SharedIdle);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.tasks_run >= 64);
        assert!(result.metrics.timers_fired >= 32);
        assert_eq!(result.metrics.apps_touched, 4);
    }

    #[test]
    fn test_rearm_storm_cancels_superseded_waits() {
        let result = ScenarioRunner::new(7, 3).run(ScenarioId::RearmStorm);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.metrics.waits_cancelled > 0);
    }

    #[test]
    fn test_step_budget_exhaustion_fails() {
        let result = ScenarioRunner::new(42, 4)
            .with_max_steps(3)
            .run(ScenarioId::Fleet);

        assert!(!result.passed);
        assert_eq!(result.total_steps, 3);
        assert!(result
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("not quiescent")));
    }

    #[test]
    fn test_fleet_deterministic() {
        // Same seed should give the same trace
        let result1 = ScenarioRunner::new(1234, 4).run(ScenarioId::Fleet);
        let result2 = ScenarioRunner::new(1234, 4).run(ScenarioId::Fleet);

        assert_eq!(result1.trace_digest, result2.trace_digest);
        assert_eq!(result1.final_time, result2.final_time);
        assert_eq!(result1.metrics, result2.metrics);
    }

    #[test]
    fn test_recorded_run_keeps_trace() {
        let run = ScenarioRunner::new(5, 2).run_recorded(ScenarioId::CancelRace);

        assert!(run.result.passed, "{:?}", run.result.failure_reason);
        assert_eq!(run.steps.len() as u64, run.result.total_steps);
        assert!(!run.observations.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_every_scenario_passes(seed in any::<u64>(), num_apps in 1usize..6) {
            let runner = ScenarioRunner::new(seed, num_apps);
            for scenario in ScenarioId::all() {
                let result = runner.run(scenario);
                prop_assert!(result.passed, "{} seed={}: {:?}", scenario, seed, result.violations);
            }
        }

        #[test]
        fn prop_same_seed_same_trace(seed in any::<u64>()) {
            let runner = ScenarioRunner::new(seed, 3);
            let a = runner.run(ScenarioId::Fleet);
            let b = runner.run(ScenarioId::Fleet);
            prop_assert_eq!(a.trace_digest, b.trace_digest);
            prop_assert_eq!(a.total_steps, b.total_steps);
        }
    }
}
