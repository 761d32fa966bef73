//! SimWorld - the simulation harness container.

use crate::error::SimError;
use crate::events::{EventLog, Observation, StepRecord};
use crate::node::{FollowUp, SimNode};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, trace};
use vtime_core::{TimePoint, VirtualClock};

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of applications sharing the clock
    pub num_apps: usize,

    /// Immediate tasks posted per application before the run
    pub tasks_per_app: usize,

    /// Timers armed per application before the run
    pub timers_per_app: usize,

    /// Latest deadline offset in milliseconds
    pub horizon_ms: u64,

    /// Deadlines are rounded down to a multiple of this (coarser = more ties)
    pub granularity_ms: u64,

    /// Probability that a task schedules a follow-up task or timer
    pub chain_probability: f64,

    /// Probability that a task is posted to a random peer instead
    pub cross_post_probability: f64,

    /// Probability that a timer is rearmed right after its first wait
    pub rearm_probability: f64,

    /// Probability that a timer is cancelled up front, and separately that
    /// its handler cancels another timer when it fires
    pub cancel_probability: f64,

    /// Crank budget before the run is declared non-terminating
    pub max_steps: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_apps: 4,
            tasks_per_app: 8,
            timers_per_app: 8,
            horizon_ms: 1_000,
            granularity_ms: 1,
            chain_probability: 0.25,
            cross_post_probability: 0.0,
            rearm_probability: 0.0,
            cancel_probability: 0.0,
            max_steps: 100_000,
        }
    }
}

impl SimConfig {
    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that probabilities lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), SimError> {
        let probabilities = [
            ("chain_probability", self.chain_probability),
            ("cross_post_probability", self.cross_post_probability),
            ("rearm_probability", self.rearm_probability),
            ("cancel_probability", self.cancel_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(SimError::invalid_config(format!("{} must be within [0, 1], got {}", name, p)));
            }
        }
        Ok(())
    }
}

/// Outcome of [`SimWorld::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Cranks executed
    pub steps: u64,

    /// Whether the group reached quiescence within the step budget
    pub quiescent: bool,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared virtual clock
    clock: VirtualClock,

    /// Observation log
    log: EventLog,

    /// Simulated nodes
    nodes: Vec<SimNode>,

    /// Seeded RNG driving workload and crank order
    rng: ChaCha8Rng,

    /// One record per crank
    steps: Vec<StepRecord>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        let clock = VirtualClock::new();
        let log = EventLog::new(&clock);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        Self {
            config,
            clock,
            log,
            nodes: Vec::new(),
            rng,
            steps: Vec::new(),
        }
    }

    /// Spawns `num_apps` nodes on the shared clock.
    pub fn spawn_nodes(&mut self) -> usize {
        for index in self.nodes.len()..self.config.num_apps {
            self.nodes.push(SimNode::new(&self.clock, index, &self.log));
        }
        self.nodes.len()
    }

    /// Installs the randomised workload on every node.
    pub fn install_workload(&mut self) {
        let config = self.config.clone();
        let apps: Vec<_> = self.nodes.iter().map(|n| n.app().handle()).collect();

        for index in 0..self.nodes.len() {
            for _ in 0..config.tasks_per_app {
                let target = if apps.len() > 1 && self.rng.gen_bool(config.cross_post_probability) {
                    &apps[self.rng.gen_range(0..apps.len())]
                } else {
                    &apps[index]
                };

                let follow_up = if self.rng.gen_bool(config.chain_probability) {
                    let owner = apps[self.rng.gen_range(0..apps.len())].clone();
                    if self.rng.gen_bool(0.5) {
                        FollowUp::Task(owner)
                    } else {
                        let delay = self.random_delay();
                        FollowUp::Timer(owner, delay)
                    }
                } else {
                    FollowUp::None
                };

                SimNode::post_task(&self.log, target, follow_up);
            }

            let mut slots = Vec::with_capacity(config.timers_per_app);
            for _ in 0..config.timers_per_app {
                slots.push(self.nodes[index].add_timer());
            }

            for (k, slot) in slots.iter().enumerate() {
                let victim = if k > 0 && self.rng.gen_bool(config.cancel_probability) {
                    Some(Rc::clone(&slots[self.rng.gen_range(0..k)]))
                } else {
                    None
                };
                let delay = self.random_delay();
                slot.arm(delay, victim);

                if self.rng.gen_bool(config.rearm_probability) {
                    let delay = self.random_delay();
                    slot.arm(delay, None);
                }
                if self.rng.gen_bool(config.cancel_probability) {
                    slot.cancel();
                }
            }
        }

        debug!(
            apps = self.nodes.len(),
            observations = self.log.len(),
            "workload installed"
        );
    }

    fn random_delay(&mut self) -> Duration {
        let granularity = self.config.granularity_ms.max(1);
        let ms = self.rng.gen_range(0..=self.config.horizon_ms);
        Duration::from_millis(ms - ms % granularity)
    }

    /// Cranks one node, chosen by the seeded RNG, and records the step.
    ///
    /// Returns what `crank` returned.
    pub fn step(&mut self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let index = self.rng.gen_range(0..self.nodes.len());
        let app = self.nodes[index].app();

        let before = self.clock.now();
        let queued_before: usize = self.nodes.iter().map(|n| n.app().queue_len()).sum();
        let own_queued_before = app.queue_len();
        let start = self.log.len();

        let returned = app.crank(false);

        let record = StepRecord {
            app: app.id(),
            before,
            after: self.clock.now(),
            queued_before,
            own_queued_before,
            returned,
            start,
            end: self.log.len(),
        };
        trace!(step = self.steps.len(), app = %record.app, returned, "step");
        self.steps.push(record);
        returned
    }

    /// Returns true if no node has queued tasks or pending waits.
    pub fn is_quiescent(&self) -> bool {
        self.nodes.iter().all(SimNode::is_quiescent)
    }

    /// Steps until quiescent or `max_steps` cranks have run.
    pub fn run(&mut self) -> RunOutcome {
        let mut steps = 0;
        while !self.is_quiescent() && steps < self.config.max_steps {
            self.step();
            steps += 1;
        }
        RunOutcome {
            steps,
            quiescent: self.is_quiescent(),
        }
    }

    /// Returns the shared clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Returns the current virtual time.
    pub fn time(&self) -> TimePoint {
        self.clock.now()
    }

    /// Returns the simulated nodes.
    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Returns a copy of the observation log.
    pub fn observations(&self) -> Vec<Observation> {
        self.log.snapshot()
    }

    /// Returns the step records so far.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Digest of the observation log.
    pub fn trace_digest(&self) -> u64 {
        self.log.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Oracle;

    #[test]
    fn test_sim_world_creation() {
        let config = SimConfig {
            num_apps: 3,
            ..Default::default()
        };

        let mut world = SimWorld::new(config);
        assert_eq!(world.spawn_nodes(), 3);
        assert_eq!(world.clock().app_count(), 3);
        assert_eq!(world.time(), TimePoint::EPOCH);
        assert!(world.is_quiescent());
    }

    #[test]
    fn test_sim_world_runs_to_quiescence() {
        let mut world = SimWorld::new(SimConfig::default());
        world.spawn_nodes();
        world.install_workload();
        assert!(!world.is_quiescent());

        let outcome = world.run();
        assert!(outcome.quiescent);
        assert_eq!(outcome.steps as usize, world.steps().len());

        let observations = world.observations();
        let violations = Oracle::new(&observations, world.steps()).check();
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn test_sim_world_determinism() {
        let config = SimConfig {
            cross_post_probability: 0.3,
            rearm_probability: 0.3,
            cancel_probability: 0.2,
            ..Default::default()
        };

        let mut world1 = SimWorld::new(config.clone());
        let mut world2 = SimWorld::new(config);
        for world in [&mut world1, &mut world2] {
            world.spawn_nodes();
            world.install_workload();
            world.run();
        }

        assert_eq!(world1.trace_digest(), world2.trace_digest());
        assert_eq!(world1.time(), world2.time());
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let path = std::env::temp_dir().join(format!("vtime_sim_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "seed": 7, "num_apps": 2 }"#).unwrap();

        let config = SimConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.num_apps, 2);
        assert_eq!(config.horizon_ms, SimConfig::default().horizon_ms);
    }

    #[test]
    fn test_unfinished_world_releases_group_on_drop() {
        let config = SimConfig {
            chain_probability: 1.0,
            cross_post_probability: 0.5,
            max_steps: 3,
            ..Default::default()
        };
        let mut world = SimWorld::new(config);
        world.spawn_nodes();
        world.install_workload();

        let outcome = world.run();
        assert!(!outcome.quiescent);

        let clock = world.clock().clone();
        assert_eq!(clock.app_count(), 4);
        drop(world);
        assert_eq!(clock.app_count(), 0);
    }

    #[test]
    fn test_config_rejects_bad_probability() {
        let config = SimConfig {
            rearm_probability: 1.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
        assert!(err.to_string().contains("rearm_probability"));
    }

    #[test]
    fn test_config_from_missing_file_fails() {
        let result = SimConfig::from_json_file("/nonexistent/vtime/config.json");
        assert!(matches!(result, Err(SimError::Io(_))));
    }
}
