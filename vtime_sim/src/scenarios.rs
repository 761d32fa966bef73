//! Scheduling scenarios for DST.

use crate::error::SimError;
use crate::world::SimConfig;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// VT-001: one application, timers only, deadline order and exact times
    DispatchOrder,

    /// VT-002: several applications with queued work gating a shared clock
    SharedIdle,

    /// VT-003: most timers are rearmed before they can fire
    RearmStorm,

    /// VT-004: coarse deadlines and handlers cancelling each other
    CancelRace,

    /// VT-005: large fleet with cross-application posts and everything mixed
    Fleet,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::DispatchOrder,
            ScenarioId::SharedIdle,
            ScenarioId::RearmStorm,
            ScenarioId::CancelRace,
            ScenarioId::Fleet,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::DispatchOrder => "dispatch_order",
            ScenarioId::SharedIdle => "shared_idle",
            ScenarioId::RearmStorm => "rearm_storm",
            ScenarioId::CancelRace => "cancel_race",
            ScenarioId::Fleet => "fleet",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::DispatchOrder => "Single app, 32 timers, fire order and exact deadlines",
            ScenarioId::SharedIdle => "Queued work on any app holds the shared clock",
            ScenarioId::RearmStorm => "80% of timers rearmed, superseded waits never complete",
            ScenarioId::CancelRace => "100ms deadline buckets, handlers cancel same-bucket peers",
            ScenarioId::Fleet => "3x apps, cross posts, chains, rearms and cancels together",
        }
    }

    /// Derives the run configuration from a base configuration.
    ///
    /// Seed, step budget and application count come from `base`; the
    /// workload shape comes from the scenario.
    pub fn configure(&self, base: &SimConfig) -> SimConfig {
        let mut config = base.clone();
        match self {
            ScenarioId::DispatchOrder => {
                config.num_apps = 1;
                config.tasks_per_app = 0;
                config.timers_per_app = 32;
                config.chain_probability = 0.0;
                config.cross_post_probability = 0.0;
                config.rearm_probability = 0.0;
                config.cancel_probability = 0.0;
            }
            ScenarioId::SharedIdle => {
                config.tasks_per_app = 16;
                config.timers_per_app = 8;
                config.chain_probability = 0.5;
                config.cross_post_probability = 0.0;
            }
            ScenarioId::RearmStorm => {
                config.tasks_per_app = 4;
                config.timers_per_app = 16;
                config.rearm_probability = 0.8;
            }
            ScenarioId::CancelRace => {
                config.tasks_per_app = 4;
                config.timers_per_app = 16;
                config.horizon_ms = 500;
                config.granularity_ms = 100;
                config.cancel_probability = 0.5;
            }
            ScenarioId::Fleet => {
                config.num_apps = base.num_apps.max(1) * 3;
                config.tasks_per_app = 12;
                config.timers_per_app = 12;
                config.chain_probability = 0.4;
                config.cross_post_probability = 0.3;
                config.rearm_probability = 0.3;
                config.cancel_probability = 0.2;
            }
        }
        config
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dispatch_order" | "dispatchorder" | "vt-001" => Ok(ScenarioId::DispatchOrder),
            "shared_idle" | "sharedidle" | "vt-002" => Ok(ScenarioId::SharedIdle),
            "rearm_storm" | "rearmstorm" | "vt-003" => Ok(ScenarioId::RearmStorm),
            "cancel_race" | "cancelrace" | "vt-004" => Ok(ScenarioId::CancelRace),
            "fleet" | "vt-005" => Ok(ScenarioId::Fleet),
            _ => Err(SimError::UnknownScenario(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert_eq!("VT-004".parse::<ScenarioId>().unwrap(), ScenarioId::CancelRace);
    }

    #[test]
    fn test_unknown_scenario() {
        let err = "split_brain".parse::<ScenarioId>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown scenario: split_brain");
    }

    #[test]
    fn test_configure_keeps_seed_and_budget() {
        let base = SimConfig {
            seed: 9,
            num_apps: 2,
            max_steps: 77,
            ..Default::default()
        };

        let dispatch = ScenarioId::DispatchOrder.configure(&base);
        assert_eq!((dispatch.seed, dispatch.max_steps, dispatch.num_apps), (9, 77, 1));

        let fleet = ScenarioId::Fleet.configure(&base);
        assert_eq!(fleet.num_apps, 6);

        for scenario in ScenarioId::all() {
            assert!(scenario.configure(&base).validate().is_ok());
        }
    }
}
