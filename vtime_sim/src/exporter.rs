//! JSON exporter for simulation traces.
//!
//! Writes the observation log and per-crank step records of one run so a
//! failing seed can be inspected offline.

use crate::error::SimError;
use crate::events::{Observation, StepRecord};
use crate::oracle::TraceSummary;
use crate::runner::RecordedRun;
use crate::world::SimConfig;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete trace export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Effective configuration of the run
    pub config: SimConfig,

    /// Final result
    pub passed: bool,

    /// Failure message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Rendered oracle violations
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub violations: Vec<String>,

    /// Final virtual time, `YYYY-MM-DDThh:mm:ssZ`
    pub final_time: String,

    /// Trace counts
    pub summary: TraceSummary,

    /// Every observation, in recording order
    pub observations: Vec<Observation>,

    /// One record per crank
    pub steps: Vec<StepRecord>,
}

impl TraceExport {
    /// Builds an export from a recorded run.
    pub fn from_run(run: &RecordedRun, config: SimConfig) -> Self {
        let result = &run.result;
        Self {
            scenario: result.scenario.name().to_string(),
            seed: result.seed,
            config,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            violations: result.violations.iter().map(ToString::to_string).collect(),
            final_time: vtime_core::VirtualClock::format_iso8601(result.final_time),
            summary: result.metrics.clone(),
            observations: run.observations.clone(),
            steps: run.steps.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_round_trip() {
        let runner = ScenarioRunner::new(3, 2);
        let run = runner.run_recorded(ScenarioId::DispatchOrder);
        let export = TraceExport::from_run(&run, ScenarioId::DispatchOrder.configure(runner.config()));

        let path = std::env::temp_dir().join(format!("vtime_trace_{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let parsed: TraceExport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.scenario, "dispatch_order");
        assert_eq!(parsed.seed, 3);
        assert!(parsed.passed);
        assert_eq!(parsed.config.num_apps, 1);
        assert_eq!(parsed.observations, run.observations);
        assert_eq!(parsed.steps.len(), run.steps.len());
        assert_eq!(parsed.summary.timers_fired, 32);
    }
}
