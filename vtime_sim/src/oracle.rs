//! Oracle - checks a simulation trace against the scheduler's guarantees.
//!
//! The oracle sees two things:
//! - the observation log written by workload callbacks
//! - one [`StepRecord`] per crank, written by the world
//!
//! and reports every property that does not hold:
//! - virtual time never decreases
//! - every posted task runs exactly once, on its own application's crank
//! - every wait resolves exactly once; superseded waits are cancelled,
//!   all others fire exactly at their deadline
//! - waits fire in (deadline, registration) order
//! - time never advances, and timers never fire, while any task is queued
//! - a crank returns exactly the number of callbacks it ran, and drains
//!   exactly the tasks queued at entry

use crate::events::{EventKind, Observation, StepRecord};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use vtime_core::{AppId, TimePoint};

/// A property that failed to hold.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("time moved backwards at observation {index}: {from}ns -> {to}ns")]
    TimeReversed { index: usize, from: u64, to: u64 },

    #[error("task {task} ran {count} times")]
    TaskRunCount { task: u64, count: usize },

    #[error("wait {wait} resolved {count} times")]
    WaitResolutionCount { wait: u64, count: usize },

    #[error("wait {wait} fired at {actual}ns, deadline {deadline}ns")]
    FiredOffDeadline { wait: u64, actual: u64, deadline: u64 },

    #[error("superseded wait {wait} completed normally")]
    SupersededFired { wait: u64 },

    #[error("wait {wait} was cancelled but never superseded")]
    SpuriousCancel { wait: u64 },

    #[error("wait {wait} fired after wait {previous} out of deadline order")]
    FireOrder { wait: u64, previous: u64 },

    #[error("step {step} ({app}) advanced time with {queued} tasks queued in the group")]
    AdvancedWhileBusy { step: usize, app: AppId, queued: usize },

    #[error("step {step} ({app}) ran immediate work belonging to {other}")]
    QueueIsolation { step: usize, app: AppId, other: AppId },

    #[error("step {step} ({app}) returned {returned} but {observed} callbacks ran")]
    CountMismatch { step: usize, app: AppId, returned: usize, observed: usize },

    #[error("step {step} ({app}) ran {ran} tasks with {queued} queued at entry")]
    SnapshotMismatch { step: usize, app: AppId, ran: usize, queued: usize },

    #[error("step {step} ({app}) covers observations {start}..{end} outside a log of {len}")]
    MalformedStep { step: usize, app: AppId, start: usize, end: usize, len: usize },
}

/// Wait bookkeeping built from the log.
#[derive(Default)]
struct WaitTrace {
    deadline: TimePoint,
    armed_at: usize,
    superseded: bool,
    fired: Vec<TimePoint>,
    cancelled: usize,
}

/// Trace checker.
pub struct Oracle<'a> {
    observations: &'a [Observation],
    steps: &'a [StepRecord],
}

impl<'a> Oracle<'a> {
    /// Creates an oracle over a finished trace.
    pub fn new(observations: &'a [Observation], steps: &'a [StepRecord]) -> Self {
        Self { observations, steps }
    }

    /// Runs every check and returns the violations found.
    pub fn check(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_monotonic(&mut violations);
        self.check_tasks(&mut violations);
        self.check_waits(&mut violations);
        self.check_steps(&mut violations);
        violations
    }

    fn check_monotonic(&self, out: &mut Vec<Violation>) {
        for (index, pair) in self.observations.windows(2).enumerate() {
            if pair[1].time < pair[0].time {
                out.push(Violation::TimeReversed {
                    index: index + 1,
                    from: pair[0].time.as_nanos(),
                    to: pair[1].time.as_nanos(),
                });
            }
        }
    }

    fn check_tasks(&self, out: &mut Vec<Violation>) {
        let mut runs: HashMap<u64, usize> = HashMap::new();
        for obs in self.observations {
            match obs.kind {
                EventKind::TaskPosted { task } => {
                    runs.entry(task).or_insert(0);
                }
                EventKind::TaskRan { task } => *runs.entry(task).or_insert(0) += 1,
                _ => {}
            }
        }

        let mut bad: Vec<(u64, usize)> = runs.into_iter().filter(|(_, n)| *n != 1).collect();
        bad.sort_unstable();
        out.extend(bad.into_iter().map(|(task, count)| Violation::TaskRunCount { task, count }));
    }

    fn collect_waits(&self) -> HashMap<u64, WaitTrace> {
        let mut waits: HashMap<u64, WaitTrace> = HashMap::new();
        for (index, obs) in self.observations.iter().enumerate() {
            match obs.kind {
                EventKind::WaitArmed { wait, deadline } => {
                    let trace = waits.entry(wait).or_default();
                    trace.deadline = deadline;
                    trace.armed_at = index;
                }
                EventKind::WaitSuperseded { wait } => waits.entry(wait).or_default().superseded = true,
                EventKind::WaitFired { wait } => waits.entry(wait).or_default().fired.push(obs.time),
                EventKind::WaitCancelled { wait } => waits.entry(wait).or_default().cancelled += 1,
                _ => {}
            }
        }
        waits
    }

    fn check_waits(&self, out: &mut Vec<Violation>) {
        let waits = self.collect_waits();

        let mut ids: Vec<u64> = waits.keys().copied().collect();
        ids.sort_unstable();
        for wait in ids {
            let trace = &waits[&wait];
            let count = trace.fired.len() + trace.cancelled;
            if count != 1 {
                out.push(Violation::WaitResolutionCount { wait, count });
                continue;
            }
            match (trace.superseded, trace.fired.first()) {
                (true, Some(_)) => out.push(Violation::SupersededFired { wait }),
                (false, None) => out.push(Violation::SpuriousCancel { wait }),
                (false, Some(&actual)) if actual != trace.deadline => {
                    out.push(Violation::FiredOffDeadline {
                        wait,
                        actual: actual.as_nanos(),
                        deadline: trace.deadline.as_nanos(),
                    })
                }
                _ => {}
            }
        }

        // Firing order: strictly increasing (deadline, registration index)
        let mut previous: Option<(u64, (TimePoint, usize))> = None;
        for obs in self.observations {
            let EventKind::WaitFired { wait } = obs.kind else {
                continue;
            };
            let Some(trace) = waits.get(&wait) else {
                continue;
            };
            let key = (trace.deadline, trace.armed_at);
            if let Some((prev_wait, prev_key)) = previous {
                if key <= prev_key {
                    out.push(Violation::FireOrder { wait, previous: prev_wait });
                }
            }
            previous = Some((wait, key));
        }
    }

    fn check_steps(&self, out: &mut Vec<Violation>) {
        for (step, record) in self.steps.iter().enumerate() {
            let Some(range) = self.observations.get(record.start..record.end) else {
                out.push(Violation::MalformedStep {
                    step,
                    app: record.app,
                    start: record.start,
                    end: record.end,
                    len: self.observations.len(),
                });
                continue;
            };
            let completions: Vec<&Observation> =
                range.iter().filter(|o| o.kind.is_completion()).collect();

            if completions.len() != record.returned {
                out.push(Violation::CountMismatch {
                    step,
                    app: record.app,
                    returned: record.returned,
                    observed: completions.len(),
                });
            }

            if record.after < record.before {
                out.push(Violation::TimeReversed {
                    index: record.start,
                    from: record.before.as_nanos(),
                    to: record.after.as_nanos(),
                });
            }

            let fired = completions
                .iter()
                .any(|o| matches!(o.kind, EventKind::WaitFired { .. }));
            if (record.after > record.before || fired) && record.queued_before > 0 {
                out.push(Violation::AdvancedWhileBusy {
                    step,
                    app: record.app,
                    queued: record.queued_before,
                });
            }

            let immediate: Vec<&&Observation> =
                completions.iter().filter(|o| o.kind.is_immediate()).collect();
            if let Some(foreign) = immediate.iter().find(|o| o.app != record.app) {
                out.push(Violation::QueueIsolation {
                    step,
                    app: record.app,
                    other: foreign.app,
                });
            }
            if immediate.len() != record.own_queued_before {
                out.push(Violation::SnapshotMismatch {
                    step,
                    app: record.app,
                    ran: immediate.len(),
                    queued: record.own_queued_before,
                });
            }
        }
    }
}

/// Counts of what a trace contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub tasks_run: u64,
    pub timers_fired: u64,
    pub waits_cancelled: u64,
    pub clock_advances: u64,
    pub blocked_cranks: u64,
    pub apps_touched: usize,
}

impl TraceSummary {
    /// Summarises a trace.
    pub fn from_trace(observations: &[Observation], steps: &[StepRecord]) -> Self {
        let mut summary = TraceSummary::default();
        let mut apps = HashSet::new();
        for obs in observations {
            apps.insert(obs.app);
            match obs.kind {
                EventKind::TaskRan { .. } => summary.tasks_run += 1,
                EventKind::WaitFired { .. } => summary.timers_fired += 1,
                EventKind::WaitCancelled { .. } => summary.waits_cancelled += 1,
                _ => {}
            }
        }
        for step in steps {
            if step.after > step.before {
                summary.clock_advances += 1;
            }
            if step.returned == 0 && step.own_queued_before == 0 && step.queued_before > 0 {
                summary.blocked_cranks += 1;
            }
        }
        summary.apps_touched = apps.len();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(app: u64, nanos: u64, kind: EventKind) -> Observation {
        Observation { app: AppId(app), time: TimePoint::from_nanos(nanos), kind }
    }

    fn step(app: u64, before: u64, after: u64, queued: usize, own: usize, returned: usize, range: (usize, usize)) -> StepRecord {
        StepRecord {
            app: AppId(app),
            before: TimePoint::from_nanos(before),
            after: TimePoint::from_nanos(after),
            queued_before: queued,
            own_queued_before: own,
            returned,
            start: range.0,
            end: range.1,
        }
    }

    #[test]
    fn test_clean_trace_passes() {
        let log = vec![
            obs(0, 0, EventKind::TaskPosted { task: 0 }),
            obs(0, 0, EventKind::WaitArmed { wait: 1, deadline: TimePoint::from_nanos(5) }),
            obs(0, 0, EventKind::TaskRan { task: 0 }),
            obs(0, 5, EventKind::WaitFired { wait: 1 }),
        ];
        let steps = vec![step(0, 0, 0, 1, 1, 1, (2, 3)), step(0, 0, 5, 0, 0, 1, (3, 4))];

        assert!(Oracle::new(&log, &steps).check().is_empty());
        let summary = TraceSummary::from_trace(&log, &steps);
        assert_eq!(summary.tasks_run, 1);
        assert_eq!(summary.timers_fired, 1);
        assert_eq!(summary.clock_advances, 1);
    }

    #[test]
    fn test_detects_unrun_and_double_run_tasks() {
        let log = vec![
            obs(0, 0, EventKind::TaskPosted { task: 0 }),
            obs(0, 0, EventKind::TaskPosted { task: 1 }),
            obs(0, 0, EventKind::TaskRan { task: 1 }),
            obs(0, 0, EventKind::TaskRan { task: 1 }),
        ];
        let violations = Oracle::new(&log, &[]).check();
        assert_eq!(
            violations,
            vec![
                Violation::TaskRunCount { task: 0, count: 0 },
                Violation::TaskRunCount { task: 1, count: 2 },
            ]
        );
    }

    #[test]
    fn test_detects_superseded_wait_firing() {
        let log = vec![
            obs(0, 0, EventKind::WaitArmed { wait: 0, deadline: TimePoint::from_nanos(1) }),
            obs(0, 0, EventKind::WaitSuperseded { wait: 0 }),
            obs(0, 1, EventKind::WaitFired { wait: 0 }),
        ];
        let violations = Oracle::new(&log, &[]).check();
        assert_eq!(violations, vec![Violation::SupersededFired { wait: 0 }]);
    }

    #[test]
    fn test_detects_fire_off_deadline_and_order() {
        let log = vec![
            obs(0, 0, EventKind::WaitArmed { wait: 0, deadline: TimePoint::from_nanos(10) }),
            obs(0, 0, EventKind::WaitArmed { wait: 1, deadline: TimePoint::from_nanos(20) }),
            obs(0, 20, EventKind::WaitFired { wait: 1 }),
            obs(0, 21, EventKind::WaitFired { wait: 0 }),
        ];
        let violations = Oracle::new(&log, &[]).check();
        assert!(violations.contains(&Violation::FiredOffDeadline { wait: 0, actual: 21, deadline: 10 }));
        assert!(violations.contains(&Violation::FireOrder { wait: 0, previous: 1 }));
    }

    #[test]
    fn test_detects_advance_while_busy_and_isolation() {
        let log = vec![
            obs(1, 0, EventKind::TaskPosted { task: 0 }),
            obs(1, 0, EventKind::TaskRan { task: 0 }),
        ];
        // app 0 cranked, ran app 1's task, and moved time while 1 task was queued
        let steps = vec![step(0, 0, 3, 1, 1, 1, (1, 2))];
        let violations = Oracle::new(&log, &steps).check();

        assert!(violations.contains(&Violation::AdvancedWhileBusy { step: 0, app: AppId(0), queued: 1 }));
        assert!(violations.contains(&Violation::QueueIsolation { step: 0, app: AppId(0), other: AppId(1) }));
    }

    #[test]
    fn test_detects_count_mismatch() {
        let log = vec![
            obs(0, 0, EventKind::TaskPosted { task: 0 }),
            obs(0, 0, EventKind::TaskRan { task: 0 }),
        ];
        let steps = vec![step(0, 0, 0, 1, 1, 2, (1, 2))];
        let violations = Oracle::new(&log, &steps).check();
        assert_eq!(
            violations,
            vec![Violation::CountMismatch { step: 0, app: AppId(0), returned: 2, observed: 1 }]
        );
    }

    #[test]
    fn test_reports_out_of_range_step() {
        let log = vec![
            obs(0, 0, EventKind::TaskPosted { task: 0 }),
            obs(0, 0, EventKind::TaskRan { task: 0 }),
        ];
        let steps = vec![step(0, 0, 0, 1, 1, 1, (5, 3)), step(0, 0, 0, 1, 1, 1, (1, 9))];
        let violations = Oracle::new(&log, &steps).check();
        assert_eq!(
            violations,
            vec![
                Violation::MalformedStep { step: 0, app: AppId(0), start: 5, end: 3, len: 2 },
                Violation::MalformedStep { step: 1, app: AppId(0), start: 1, end: 9, len: 2 },
            ]
        );
    }

    #[test]
    fn test_violation_messages() {
        let v = Violation::AdvancedWhileBusy { step: 3, app: AppId(1), queued: 2 };
        assert_eq!(v.to_string(), "step 3 (app-1) advanced time with 2 tasks queued in the group");
    }
}
