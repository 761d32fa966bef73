//! vtime Deterministic Simulation Testing (DST) Harness
//!
//! Drives a group of applications sharing one [`vtime_core::VirtualClock`]
//! with a seeded random workload, records what every callback observed, and
//! checks the trace against the scheduler's guarantees.
//!
//! # Core Principle: Seeded Interleavings
//!
//! The scheduler is already deterministic; the harness adds controlled
//! variety on top:
//! - **Workload**: tasks, chained follow-ups, cross-application posts,
//!   timers, rearms and cancels, all drawn from one 64-bit seed
//! - **Crank order**: each step cranks an application picked by the same RNG
//! - **Judgement**: the [`Oracle`] replays the observation log and the
//!   per-crank [`StepRecord`]s and reports every [`Violation`]
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                       SimWorld                        │
//! │   ┌───────────────────────────────────────────────┐   │
//! │   │ VirtualClock (shared time + app registry)     │   │
//! │   └───────────────────────────────────────────────┘   │
//! │        │                    │                         │
//! │   ┌────▼────┐          ┌────▼────┐                    │
//! │   │ SimNode │  posts   │ SimNode │     ...            │
//! │   │ node-0  │◄────────►│ node-1  │                    │
//! │   └────┬────┘          └────┬────┘                    │
//! │        └──────► EventLog ◄──┘                         │
//! │                    │                                  │
//! │              ┌─────▼─────┐                            │
//! │              │  Oracle   │                            │
//! │              └───────────┘                            │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use vtime_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 4).run(ScenarioId::SharedIdle);
//! assert!(result.passed);
//! ```

mod error;
mod events;
mod exporter;
mod node;
mod oracle;
mod runner;
mod world;
pub mod scenarios;

pub use error::SimError;
pub use events::{EventKind, EventLog, Observation, StepRecord};
pub use exporter::TraceExport;
pub use node::{FollowUp, SimNode, TimerSlot};
pub use oracle::{Oracle, TraceSummary, Violation};
pub use runner::{RecordedRun, ScenarioResult, ScenarioRunner};
pub use world::{RunOutcome, SimConfig, SimWorld};
